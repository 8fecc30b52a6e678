use async_trait::async_trait;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use tracing::debug;

use crate::index::{self, ArchiveLocator};
use crate::warc::{self, DecodeError};

pub const STORAGE_HOST: &str = "https://data.commoncrawl.org";

/// Every way a single fetch attempt can fail. The ledger treats all of them
/// the same: the target is recorded and never retried in this run.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{identifier} not in {snapshot} (index returned {status})")]
    NotFound {
        identifier: String,
        snapshot: String,
        status: u16,
    },

    #[error("transfer of {url} failed: {reason}")]
    Transfer { url: String, reason: String },

    #[error("could not decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: DecodeError,
    },
}

impl FetchError {
    fn transfer(url: &str, reason: impl ToString) -> Self {
        FetchError::Transfer {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
pub trait Fetch: Send + Sync {
    /// All page bodies captured for `identifier` in `snapshot`.
    async fn fetch_archived(
        &self,
        identifier: &str,
        snapshot: &str,
    ) -> Result<Vec<Vec<u8>>, FetchError>;

    /// The current body served at `url`.
    async fn fetch_live(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    index_host: String,
    storage_host: String,
}

impl HttpFetcher {
    pub fn new(index_host: &str, storage_host: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            index_host: index_host.trim_end_matches('/').to_string(),
            storage_host: storage_host.trim_end_matches('/').to_string(),
        }
    }

    pub async fn lookup(
        &self,
        identifier: &str,
        snapshot: &str,
    ) -> Result<Vec<ArchiveLocator>, FetchError> {
        let url = index::lookup_url(&self.index_host, snapshot, identifier);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::transfer(&url, e))?;

        if resp.status() != StatusCode::OK {
            return Err(FetchError::NotFound {
                identifier: identifier.to_string(),
                snapshot: snapshot.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::transfer(&url, e))?;
        index::parse_index_response(&body).map_err(|source| FetchError::Decode { what: url, source })
    }

    pub async fn fetch_range(&self, locator: &ArchiveLocator) -> Result<Vec<u8>, FetchError> {
        let url = format!("{}/{}", self.storage_host, locator.filename);
        let resp = self
            .client
            .get(&url)
            .header(RANGE, locator.range_header())
            .send()
            .await
            .map_err(|e| FetchError::transfer(&url, e))?;

        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(FetchError::transfer(&url, format!("status {}", status)));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::transfer(&url, e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch_archived(
        &self,
        identifier: &str,
        snapshot: &str,
    ) -> Result<Vec<Vec<u8>>, FetchError> {
        let locators = self.lookup(identifier, snapshot).await?;
        debug!("{} captures of {} in {}", locators.len(), identifier, snapshot);

        // Bodies are only handed back once every locator decoded.
        let mut bodies = Vec::new();
        for locator in &locators {
            let segment = self.fetch_range(locator).await?;
            let decoded = warc::decode_segment(&segment).map_err(|source| FetchError::Decode {
                what: locator.filename.clone(),
                source,
            })?;
            bodies.extend(decoded);
        }
        Ok(bodies)
    }

    async fn fetch_live(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transfer(url, e))?;

        if resp.status() != StatusCode::OK {
            return Err(FetchError::transfer(url, format!("status {}", resp.status())));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::transfer(url, e))?;
        debug!("Fetched {} ({} bytes)", url, bytes.len());
        Ok(bytes.to_vec())
    }
}
