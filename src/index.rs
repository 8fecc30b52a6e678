use serde::Deserialize;

use crate::warc::DecodeError;

pub const INDEX_HOST: &str = "http://index.commoncrawl.org";

/// Where one capture lives inside a remote compressed archive file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLocator {
    pub filename: String,
    pub offset: u64,
    pub length: u64,
}

impl ArchiveLocator {
    /// Inclusive byte range covering this capture. Parsed locators always
    /// satisfy `offset + length <= u64::MAX`.
    pub fn range_header(&self) -> String {
        let end = self.offset.saturating_add(self.length).saturating_sub(1);
        format!("bytes={}-{}", self.offset, end)
    }
}

// The index reports offset/length as strings; some mirrors emit plain numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumField {
    Text(String),
    Num(u64),
}

impl NumField {
    fn value(&self) -> Result<u64, DecodeError> {
        match self {
            NumField::Num(n) => Ok(*n),
            NumField::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| DecodeError::BadNumber(s.clone())),
        }
    }
}

#[derive(Deserialize)]
struct IndexLine {
    filename: String,
    offset: NumField,
    length: NumField,
}

/// Build the lookup URL for one identifier in one snapshot.
pub fn lookup_url(host: &str, snapshot: &str, identifier: &str) -> String {
    format!(
        "{}/{}-index?url={}&output=json",
        host.trim_end_matches('/'),
        snapshot,
        urlencoding::encode(identifier)
    )
}

/// Parse a newline-delimited JSON index response into locators.
pub fn parse_index_response(body: &str) -> Result<Vec<ArchiveLocator>, DecodeError> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let entry: IndexLine = serde_json::from_str(line).map_err(DecodeError::IndexLine)?;
            let offset = entry.offset.value()?;
            let length = entry.length.value()?;
            offset
                .checked_add(length)
                .ok_or_else(|| DecodeError::BadNumber(format!("{} + {}", offset, length)))?;
            Ok(ArchiveLocator {
                filename: entry.filename,
                offset,
                length,
            })
        })
        .collect()
}
