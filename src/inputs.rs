use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::hash::Hash;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::experiment::Bio;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("{path}: missing column {column:?}")]
    MissingColumn { path: String, column: &'static str },

    #[error("{path}:{line}: {source}")]
    BadJson {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Page identifiers from the `bio_url` column of the labeled spreadsheet export.
pub fn read_identifiers(path: &Path) -> Result<Vec<String>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("reading {}", path.display()))?;
    let column = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == "bio_url")
        .ok_or_else(|| InputError::MissingColumn {
            path: path.display().to_string(),
            column: "bio_url",
        })?;

    let mut ids = Vec::new();
    for row in reader.records() {
        let row = row?;
        if let Some(url) = row.get(column).map(str::trim).filter(|u| !u.is_empty()) {
            ids.push(url.to_string());
        }
    }
    info!("{} identifiers from {}", ids.len(), path.display());
    Ok(ids)
}

/// Snapshot names, one per line, in crawl order.
pub fn read_snapshots(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("reading {}", path.display()))?;
    let mut snapshots = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let name = line.trim().trim_matches(',');
        if !name.is_empty() {
            snapshots.push(name.to_string());
        }
    }
    Ok(snapshots)
}

/// One row of the labeled dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct LabeledBio {
    pub bio_url: String,
    pub bio_gender: String,
    pub true_occupation: String,
}

/// One entry of the bio corpus export.
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusBio {
    #[serde(rename = "URI")]
    pub uri: String,
    pub gender: String,
    pub title: String,
    pub bio: String,
}

pub fn read_labeled(path: &Path) -> Result<Vec<LabeledBio>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("reading {}", path.display()))?;
    let rows = reader
        .deserialize()
        .collect::<Result<Vec<LabeledBio>, _>>()
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(rows)
}

/// JSON-lines corpus, one object per line.
pub fn read_corpus(path: &Path) -> Result<Vec<CorpusBio>> {
    let file = File::open(path).with_context(|| format!("reading {}", path.display()))?;
    let mut bios = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let bio = serde_json::from_str(&line).map_err(|source| InputError::BadJson {
            path: path.display().to_string(),
            line: i + 1,
            source,
        })?;
        bios.push(bio);
    }
    Ok(bios)
}

/// Drop every row whose key occurs more than once.
pub fn remove_duplicate_keys<T, K, F>(rows: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut counts: HashMap<K, usize> = HashMap::new();
    for row in &rows {
        *counts.entry(key(row)).or_default() += 1;
    }
    rows.into_iter().filter(|row| counts[&key(row)] == 1).collect()
}

/// Inner-join the labeled rows and the corpus on (url, gender, occupation)
/// after removing ambiguous keys from both sides.
pub fn merge_bios(labeled: Vec<LabeledBio>, corpus: Vec<CorpusBio>) -> Vec<Bio> {
    let labeled = remove_duplicate_keys(labeled, |l| {
        (l.bio_url.clone(), l.bio_gender.clone(), l.true_occupation.clone())
    });
    let corpus = remove_duplicate_keys(corpus, |c| (c.uri.clone(), c.gender.clone(), c.title.clone()));

    let keys: HashSet<(&str, &str, &str)> = labeled
        .iter()
        .map(|l| (l.bio_url.as_str(), l.bio_gender.as_str(), l.true_occupation.as_str()))
        .collect();

    let merged: Vec<Bio> = corpus
        .into_iter()
        .filter(|c| keys.contains(&(c.uri.as_str(), c.gender.as_str(), c.title.as_str())))
        .map(|c| Bio {
            url: c.uri,
            gender: c.gender,
            title: c.title,
            text: c.bio,
        })
        .collect();

    info!("{} bios after merge", merged.len());
    merged
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn labeled(url: &str, gender: &str, occ: &str) -> LabeledBio {
        LabeledBio {
            bio_url: url.into(),
            bio_gender: gender.into(),
            true_occupation: occ.into(),
        }
    }

    fn corpus(url: &str, gender: &str, title: &str) -> CorpusBio {
        CorpusBio {
            uri: url.into(),
            gender: gender.into(),
            title: title.into(),
            bio: format!("bio of {}", url),
        }
    }

    #[test]
    fn duplicate_keys_are_removed_entirely() {
        let rows = vec![1, 2, 2, 3, 3, 3, 4];
        assert_eq!(remove_duplicate_keys(rows, |n| *n), vec![1, 4]);
    }

    #[test]
    fn merge_is_exact_and_skips_ambiguous_rows() {
        let labeled = vec![
            labeled("u1", "F", "surgeon"),
            labeled("u2", "M", "surgeon"),
            labeled("u3", "M", "teacher"),
            labeled("u3", "M", "teacher"),
            labeled("u4", "F", "attorney"),
        ];
        let corpus = vec![
            corpus("u1", "F", "surgeon"),
            corpus("u2", "F", "surgeon"),
            corpus("u3", "M", "teacher"),
            corpus("u4", "F", "attorney"),
            corpus("u4", "F", "attorney"),
        ];
        let merged = merge_bios(labeled, corpus);
        let urls: Vec<&str> = merged.iter().map(|b| b.url.as_str()).collect();
        assert_eq!(urls, vec!["u1"]);
        assert_eq!(merged[0].text, "bio of u1");
    }

    #[test]
    fn reads_identifier_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        fs::write(&path, "id,bio_url,true_occupation\n0,https://a.com/x,surgeon\n1,,teacher\n").unwrap();
        assert_eq!(read_identifiers(&path).unwrap(), vec!["https://a.com/x"]);
    }

    #[test]
    fn missing_identifier_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        fs::write(&path, "id,url\n0,https://a.com/x\n").unwrap();
        assert!(read_identifiers(&path).is_err());
    }

    #[test]
    fn reads_snapshot_list_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawl_list.csv");
        fs::write(&path, "CC-MAIN-2014-10\n\nCC-MAIN-2015-06\n").unwrap();
        assert_eq!(
            read_snapshots(&path).unwrap(),
            vec!["CC-MAIN-2014-10", "CC-MAIN-2015-06"]
        );
    }

    #[test]
    fn reads_corpus_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bios.jsonl");
        fs::write(
            &path,
            "{\"URI\": \"u1\", \"gender\": \"F\", \"title\": \"surgeon\", \"bio\": \"She operates.\", \"raw\": \"x\"}\n",
        )
        .unwrap();
        let bios = read_corpus(&path).unwrap();
        assert_eq!(bios[0].uri, "u1");
        assert_eq!(bios[0].bio, "She operates.");
    }
}
