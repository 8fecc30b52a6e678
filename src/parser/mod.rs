pub mod gender;
pub mod mask;
pub mod paragraphs;

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::store::PageRecord;
use gender::Gender;

const CHUNK_SIZE: usize = 500;

/// One matched paragraph with its masked rendition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParagraphRecord {
    pub identifier: String,
    pub snapshot: Option<String>,
    pub paragraph: String,
    pub masked: String,
    pub declaratory: Vec<String>,
    pub profession: String,
    pub gender: Gender,
}

/// Paragraphs that open with a name + profession sentence, normalized,
/// masked and labeled. `None` when the page has no such paragraph.
pub fn extract(body: &[u8], identifier: &str, snapshot: Option<&str>) -> Option<Vec<ParagraphRecord>> {
    let matches = paragraphs::matching_paragraphs(body);
    if matches.is_empty() {
        info!("Found 0 matches for {}", identifier);
        return None;
    }

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for raw in matches {
        let paragraph = paragraphs::normalize(&raw);
        // Same leading match as before normalization.
        let profession = paragraphs::LEADING_BIO_RE
            .captures(&paragraph)
            .map(|c| c[3].to_string())
            .unwrap_or_default();
        let entities = mask::capture_entities(&paragraph);
        let masked = mask::mask(&paragraph, &entities);

        let record = ParagraphRecord {
            identifier: identifier.to_string(),
            snapshot: snapshot.map(str::to_string),
            gender: gender::infer(&paragraph),
            paragraph,
            masked: masked.text,
            declaratory: masked.declaratory,
            profession,
        };
        if seen.insert(record.clone()) {
            records.push(record);
        }
    }
    Some(records)
}

/// Extract every page in parallel chunks, keeping input order and dropping
/// records already produced by an earlier page.
pub fn extract_pages(pages: &[PageRecord]) -> Vec<ParagraphRecord> {
    let pb = ProgressBar::new(pages.len() as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec})")
    {
        pb.set_style(style.progress_chars("=> "));
    }

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for chunk in pages.chunks(CHUNK_SIZE) {
        let results: Vec<_> = chunk
            .par_iter()
            .map(|page| extract(&page.body, &page.identifier, page.snapshot.as_deref()))
            .collect();
        for record in results.into_iter().flatten().flatten() {
            if seen.insert(record.clone()) {
                records.push(record);
            }
        }
        pb.inc(chunk.len() as u64);
    }
    pb.finish_and_clear();

    info!("{} paragraphs from {} pages", records.len(), pages.len());
    records
}

#[derive(Serialize)]
struct ParagraphRow<'a> {
    url: &'a str,
    crawl: &'a str,
    paragraph: &'a str,
    test_paragraph: &'a str,
    /// JSON array.
    declaratory_sentences: String,
    profession: &'a str,
    gender: &'static str,
}

pub fn write_csv(path: &Path, records: &[ParagraphRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("writing {}", path.display()))?;
    for r in records {
        writer.serialize(ParagraphRow {
            url: &r.identifier,
            crawl: r.snapshot.as_deref().unwrap_or_default(),
            paragraph: &r.paragraph,
            test_paragraph: &r.masked,
            declaratory_sentences: serde_json::to_string(&r.declaratory)?,
            profession: &r.profession,
            gender: r.gender.as_str(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &[u8] = include_bytes!("../../tests/fixtures/bio_page.html");

    fn page(id: &str, snapshot: Option<&str>, body: &[u8]) -> PageRecord {
        PageRecord {
            identifier: id.to_string(),
            snapshot: snapshot.map(str::to_string),
            body: body.to_vec(),
        }
    }

    #[test]
    fn extracts_fixture_page() {
        let records = extract(FIXTURE, "https://firm.example/ann-lee", Some("CC-MAIN-2019-04")).unwrap();
        assert_eq!(records.len(), 2);

        let ann = &records[0];
        assert_eq!(ann.profession, "attorney");
        assert_eq!(ann.gender, Gender::Female);
        assert_eq!(ann.declaratory, vec!["Ann Lee is an experienced attorney".to_string()]);
        assert!(!ann.masked.contains("Lee"));
        assert!(ann.masked.contains("LAST_NAME"));
        assert_eq!(ann.snapshot.as_deref(), Some("CC-MAIN-2019-04"));

        let mark = &records[1];
        assert_eq!(mark.profession, "surgeon");
        assert_eq!(mark.gender, Gender::Male);
    }

    #[test]
    fn page_without_bio_paragraph_yields_none() {
        assert_eq!(extract(b"<p>Contact us today.</p>", "u", None), None);
    }

    #[test]
    fn duplicate_paragraphs_collapse() {
        let body = b"<p>Ann Lee is an attorney. She litigates.</p><p>Ann Lee is an attorney.  She litigates.</p>";
        assert_eq!(extract(body, "u", None).unwrap().len(), 1);
    }

    #[test]
    fn extraction_is_pure() {
        assert_eq!(extract(FIXTURE, "u", None), extract(FIXTURE, "u", None));
    }

    #[test]
    fn parallel_run_keeps_order_and_dedupes_across_pages() {
        let pages = vec![
            page("a", None, b"<p>Bob Ray is a teacher. He teaches.</p>"),
            page("b", None, b"<p>nothing here</p>"),
            page("a", None, b"<p>Bob Ray is a teacher. He teaches.</p>"),
            page("c", None, b"<p>Kim Park is a professor. They research.</p>"),
        ];
        let records = extract_pages(&pages);
        let ids: Vec<&str> = records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(records[1].gender, Gender::Unsure);
    }

    #[test]
    fn writes_paragraph_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cc_paragraphs.csv");
        let records = extract(FIXTURE, "https://firm.example/ann-lee", Some("CC-1")).unwrap();
        write_csv(&path, &records).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(
            "url,crawl,paragraph,test_paragraph,declaratory_sentences,profession,gender\n"
        ));
        assert!(text.contains("female"));
    }
}
