use std::io::Read;

use flate2::read::{GzDecoder, MultiGzDecoder, ZlibDecoder};
use httparse::Status;
use tracing::debug;
use warc::{BufferedBody, Record, RecordType, WarcHeader, WarcReader};

/// Upper bound on HTTP header lines parsed from a captured response.
const MAX_HTTP_HEADERS: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed index line: {0}")]
    IndexLine(#[source] serde_json::Error),

    #[error("non-numeric or out of range offset/length: {0:?}")]
    BadNumber(String),

    #[error("gzip stream: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("archive record: {0}")]
    Record(#[source] warc::Error),
}

/// Decode a range-fetched segment: concatenated gzip members, each one a
/// WARC record. Returns the content of every record in order.
pub fn decode_segment(bytes: &[u8]) -> Result<Vec<Vec<u8>>, DecodeError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let mut raw = Vec::new();
    MultiGzDecoder::new(bytes)
        .read_to_end(&mut raw)
        .map_err(DecodeError::Gzip)?;

    WarcReader::new(raw.as_slice())
        .iter_records()
        .map(|record| {
            let record = record.map_err(DecodeError::Record)?;
            debug!(
                kind = ?record.warc_type(),
                bytes = record.body().len(),
                "Decoded archive record"
            );
            Ok(content(&record))
        })
        .collect()
}

/// The captured resource body. For HTTP request and response records the
/// HTTP head is stripped and transfer/content encodings are undone.
fn content(record: &Record<BufferedBody>) -> Vec<u8> {
    let block = record.body();
    let is_http = record
        .header(WarcHeader::ContentType)
        .is_some_and(|ct| ct.starts_with("application/http"));
    let is_exchange = matches!(record.warc_type(), RecordType::Response | RecordType::Request);
    if !is_http || !is_exchange {
        return block.to_vec();
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_HTTP_HEADERS];
    let parsed = match record.warc_type() {
        RecordType::Request => httparse::Request::new(&mut headers).parse(block),
        _ => httparse::Response::new(&mut headers).parse(block),
    };
    let head_len = match parsed {
        Ok(Status::Complete(n)) => n,
        Ok(Status::Partial) => return Vec::new(),
        Err(e) => {
            debug!("HTTP head not parsed, keeping raw block: {}", e);
            return block.to_vec();
        }
    };
    let fields = http_headers(&headers);

    let mut payload = block[head_len..].to_vec();
    if field(&fields, "Transfer-Encoding").is_some_and(|te| te.eq_ignore_ascii_case("chunked")) {
        if let Some(dechunked) = dechunk(&payload) {
            payload = dechunked;
        }
    }
    match field(&fields, "Content-Encoding").map(|e| e.to_ascii_lowercase()) {
        Some(enc) if enc == "gzip" || enc == "x-gzip" => {
            inflate(GzDecoder::new(payload.as_slice())).unwrap_or(payload)
        }
        Some(enc) if enc == "deflate" => {
            inflate(ZlibDecoder::new(payload.as_slice())).unwrap_or(payload)
        }
        _ => payload,
    }
}

/// Owned copy of the parsed header fields; empty slots are skipped.
fn http_headers(headers: &[httparse::Header<'_>]) -> Vec<(String, String)> {
    headers
        .iter()
        .take_while(|h| !h.name.is_empty())
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect()
}

fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn inflate(mut reader: impl Read) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    match reader.read_to_end(&mut out) {
        Ok(_) => Some(out),
        Err(e) => {
            debug!("Content-Encoding could not be undone, keeping raw payload: {}", e);
            None
        }
    }
}

/// Reassemble a chunked body. `None` when a size line or chunk is malformed.
fn dechunk(mut bytes: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let Ok(Status::Complete((start, size))) = httparse::parse_chunk_size(bytes) else {
            return None;
        };
        if size == 0 {
            return Some(out);
        }
        let end = start.checked_add(usize::try_from(size).ok()?)?;
        out.extend_from_slice(bytes.get(start..end)?);
        // Each chunk is followed by CRLF.
        bytes = bytes.get(end + 2..).unwrap_or(&[]);
    }
}
