use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Directory used in a `DirStore` for pages fetched live.
const LIVE_SNAPSHOT_DIR: &str = "current";

/// Longest page directory name written; most filesystems cap a component at 255 bytes.
const MAX_DIR_NAME: usize = 200;

/// Holds the full identifier inside a page directory whose name was shortened.
const IDENTIFIER_FILE: &str = "identifier.txt";

/// One fetched page body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub identifier: String,
    pub snapshot: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreKind {
    /// One file per body under `root/snapshot/identifier/n.html`.
    Dir,
    /// One appended CSV row per body.
    Csv,
}

/// Append-only sink for page bodies.
pub trait PageStore {
    fn store(&mut self, record: &PageRecord) -> Result<()>;

    fn store_all(&mut self, records: &[PageRecord]) -> Result<()> {
        for record in records {
            self.store(record)?;
        }
        Ok(())
    }

    /// Every stored record, in storage order.
    fn read_all(&self) -> Result<Vec<PageRecord>>;

    /// Number of stored records, without loading their bodies.
    fn count(&self) -> Result<usize>;
}

pub fn open(kind: StoreKind, path: impl AsRef<Path>, archived: bool) -> Box<dyn PageStore> {
    let path = path.as_ref().to_path_buf();
    match kind {
        StoreKind::Dir => Box::new(DirStore::new(path)),
        StoreKind::Csv => Box::new(CsvStore::new(path, archived)),
    }
}

// ── Directory tree ──

pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn page_dir(&self, record: &PageRecord) -> PathBuf {
        let snapshot = record.snapshot.as_deref().unwrap_or(LIVE_SNAPSHOT_DIR);
        self.root.join(snapshot).join(dir_name(&record.identifier))
    }
}

/// Percent-encoded identifier. Names over `MAX_DIR_NAME` bytes keep a prefix
/// followed by the SHA-256 of the whole identifier.
fn dir_name(identifier: &str) -> String {
    let encoded = urlencoding::encode(identifier).into_owned();
    if encoded.len() <= MAX_DIR_NAME {
        return encoded;
    }
    let digest = hex::encode(Sha256::digest(identifier.as_bytes()));
    // Encoded text is ASCII, so any byte index is a char boundary.
    let prefix = &encoded[..MAX_DIR_NAME - digest.len() - 1];
    format!("{}-{}", prefix, digest)
}

impl PageStore for DirStore {
    fn store(&mut self, record: &PageRecord) -> Result<()> {
        let dir = self.page_dir(record);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

        let sidecar = dir.join(IDENTIFIER_FILE);
        if file_name(&dir) != urlencoding::encode(&record.identifier) && !sidecar.exists() {
            fs::write(&sidecar, &record.identifier)
                .with_context(|| format!("writing {}", sidecar.display()))?;
        }

        // Continue numbering so a re-fetch never overwrites earlier bodies.
        let next = numbered_files(&dir)?
            .last()
            .map(|(n, _)| n + 1)
            .unwrap_or(0);
        let path = dir.join(format!("{}.html", next));
        fs::write(&path, &record.body).with_context(|| format!("writing {}", path.display()))?;
        debug!("Stored {}", path.display());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<PageRecord>> {
        let mut records = Vec::new();
        if !self.root.exists() {
            return Ok(records);
        }

        for snapshot_dir in sorted_dirs(&self.root)? {
            let name = file_name(&snapshot_dir);
            let snapshot = (name != LIVE_SNAPSHOT_DIR).then(|| name.clone());
            for page_dir in sorted_dirs(&snapshot_dir)? {
                let identifier = page_identifier(&page_dir)?;
                for (_, path) in numbered_files(&page_dir)? {
                    let body = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
                    records.push(PageRecord {
                        identifier: identifier.clone(),
                        snapshot: snapshot.clone(),
                        body,
                    });
                }
            }
        }
        Ok(records)
    }

    fn count(&self) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }
        let mut n = 0;
        for snapshot_dir in sorted_dirs(&self.root)? {
            for page_dir in sorted_dirs(&snapshot_dir)? {
                n += numbered_files(&page_dir)?.len();
            }
        }
        Ok(n)
    }
}

/// The sidecar identifier when present, otherwise the decoded directory name.
fn page_identifier(page_dir: &Path) -> Result<String> {
    let sidecar = page_dir.join(IDENTIFIER_FILE);
    if sidecar.exists() {
        return fs::read_to_string(&sidecar)
            .with_context(|| format!("reading {}", sidecar.display()));
    }
    let encoded = file_name(page_dir);
    Ok(urlencoding::decode(&encoded)
        .map(|s| s.into_owned())
        .unwrap_or(encoded))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sorted_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// `n.html` files in `dir`, sorted by `n`.
fn numbered_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        let n = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".html"))
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(n) = n {
            files.push((n, path));
        }
    }
    files.sort();
    Ok(files)
}

// ── Tabular file ──

#[derive(Serialize, Deserialize)]
struct ArchivedRow {
    url: String,
    crawl: String,
    html: String,
}

#[derive(Serialize, Deserialize)]
struct LiveRow {
    url: String,
    html: String,
}

pub struct CsvStore {
    path: PathBuf,
    archived: bool,
}

impl CsvStore {
    /// `archived` selects the `url,crawl,html` layout over `url,html`.
    pub fn new(path: impl Into<PathBuf>, archived: bool) -> Self {
        Self {
            path: path.into(),
            archived,
        }
    }
}

impl PageStore for CsvStore {
    fn store(&mut self, record: &PageRecord) -> Result<()> {
        self.store_all(std::slice::from_ref(record))
    }

    fn store_all(&mut self, records: &[PageRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        for record in records {
            let html = String::from_utf8_lossy(&record.body).into_owned();
            if self.archived {
                writer.serialize(ArchivedRow {
                    url: record.identifier.clone(),
                    crawl: record.snapshot.clone().unwrap_or_default(),
                    html,
                })?;
            } else {
                writer.serialize(LiveRow {
                    url: record.identifier.clone(),
                    html,
                })?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<PageRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;

        if self.archived {
            reader
                .deserialize::<ArchivedRow>()
                .map(|row| -> Result<PageRecord> {
                    let row = row?;
                    Ok(PageRecord {
                        identifier: row.url,
                        snapshot: Some(row.crawl).filter(|c| !c.is_empty()),
                        body: row.html.into_bytes(),
                    })
                })
                .collect()
        } else {
            reader
                .deserialize::<LiveRow>()
                .map(|row| -> Result<PageRecord> {
                    let row = row?;
                    Ok(PageRecord {
                        identifier: row.url,
                        snapshot: None,
                        body: row.html.into_bytes(),
                    })
                })
                .collect()
        }
    }

    fn count(&self) -> Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let mut row = csv::ByteRecord::new();
        let mut n = 0;
        while reader.read_byte_record(&mut row)? {
            n += 1;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, snapshot: Option<&str>, body: &str) -> PageRecord {
        PageRecord {
            identifier: id.to_string(),
            snapshot: snapshot.map(str::to_string),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn dir_store_numbers_bodies_and_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirStore::new(dir.path());
        store
            .store_all(&[
                record("https://a.com/bio", Some("CC-1"), "<p>one</p>"),
                record("https://a.com/bio", Some("CC-1"), "<p>two</p>"),
            ])
            .unwrap();

        // A second process appending to the same target.
        let mut again = DirStore::new(dir.path());
        again
            .store(&record("https://a.com/bio", Some("CC-1"), "<p>three</p>"))
            .unwrap();

        let page_dir = dir.path().join("CC-1").join("https%3A%2F%2Fa.com%2Fbio");
        assert!(page_dir.join("0.html").exists());
        assert!(page_dir.join("2.html").exists());

        assert_eq!(again.count().unwrap(), 3);
        let all = again.read_all().unwrap();
        let bodies: Vec<_> = all.iter().map(|r| r.body.clone()).collect();
        assert_eq!(
            bodies,
            vec![b"<p>one</p>".to_vec(), b"<p>two</p>".to_vec(), b"<p>three</p>".to_vec()]
        );
        assert_eq!(all[0].identifier, "https://a.com/bio");
        assert_eq!(all[0].snapshot.as_deref(), Some("CC-1"));
    }

    #[test]
    fn dir_store_shortens_long_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let long = format!("https://firm.example/people/{}", "partner-".repeat(40));
        let other = format!("{}x", long);
        assert!(urlencoding::encode(&long).len() > 255);

        let mut store = DirStore::new(dir.path());
        store
            .store_all(&[
                record(&long, Some("CC-1"), "<p>long</p>"),
                record(&long, Some("CC-1"), "<p>again</p>"),
                record(&other, Some("CC-1"), "<p>other</p>"),
            ])
            .unwrap();

        let names: Vec<String> = sorted_dirs(&dir.path().join("CC-1"))
            .unwrap()
            .iter()
            .map(|p| file_name(p))
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| n.len() <= MAX_DIR_NAME));

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.iter().filter(|r| r.identifier == long).count(), 2);
        assert_eq!(all.iter().filter(|r| r.identifier == other).count(), 1);
    }

    #[test]
    fn dir_store_live_records_have_no_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirStore::new(dir.path());
        store.store(&record("https://b.com", None, "x")).unwrap();
        assert!(dir.path().join("current").exists());
        assert_eq!(store.read_all().unwrap()[0].snapshot, None);
    }

    #[test]
    fn csv_store_writes_header_once_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cc_htmls.csv");

        CsvStore::new(&path, true)
            .store(&record("https://a.com", Some("CC-1"), "<p>a, \"quoted\"\nline</p>"))
            .unwrap();
        CsvStore::new(&path, true)
            .store(&record("https://b.com", Some("CC-2"), "<p>b</p>"))
            .unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("url,crawl,html").count(), 1);

        let rows = CsvStore::new(&path, true).read_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(CsvStore::new(&path, true).count().unwrap(), 2);
        assert_eq!(rows[0].body, b"<p>a, \"quoted\"\nline</p>".to_vec());
        assert_eq!(rows[1].snapshot.as_deref(), Some("CC-2"));
    }

    #[test]
    fn missing_or_empty_stores_count_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cc_htmls.csv");
        assert_eq!(CsvStore::new(&path, true).count().unwrap(), 0);
        assert_eq!(DirStore::new(dir.path().join("htmls")).count().unwrap(), 0);

        fs::write(&path, "").unwrap();
        assert_eq!(CsvStore::new(&path, true).count().unwrap(), 0);
        assert!(!dir.path().join("htmls").exists());
    }

    #[test]
    fn csv_store_live_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current_htmls.csv");
        let mut store = CsvStore::new(&path, false);
        store.store(&record("https://a.com", None, "<p>a</p>")).unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("url,html\n"));
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.read_all().unwrap()[0].identifier, "https://a.com");
    }
}
