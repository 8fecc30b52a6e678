use std::collections::HashSet;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::fetcher::Fetch;
use crate::ledger::{CheckpointEntry, Ledger, Outcome};
use crate::store::{PageRecord, PageStore};

/// One page to look for: archived when `snapshot` is set, live otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchTarget {
    pub identifier: String,
    pub snapshot: Option<String>,
}

impl FetchTarget {
    pub fn checkpoint(&self) -> CheckpointEntry {
        CheckpointEntry::new(self.identifier.clone(), self.snapshot.as_deref())
    }
}

/// Crawl stats returned after completion.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub total: usize,
    pub ok: usize,
    /// Lookups that worked but found no capture; counted in `ok` too.
    pub empty: usize,
    pub errors: usize,
    /// Targets covered by an entry appended earlier in the same run.
    pub skipped: usize,
    pub pages: usize,
    pub checkpointed: usize,
}

/// Every identifier crossed with every snapshot, identifier-major.
pub fn archived_targets(identifiers: &[String], snapshots: &[String]) -> Vec<FetchTarget> {
    identifiers
        .iter()
        .flat_map(|id| {
            snapshots.iter().map(move |s| FetchTarget {
                identifier: id.clone(),
                snapshot: Some(s.clone()),
            })
        })
        .collect()
}

pub fn live_targets(identifiers: &[String]) -> Vec<FetchTarget> {
    identifiers
        .iter()
        .map(|id| FetchTarget {
            identifier: id.clone(),
            snapshot: None,
        })
        .collect()
}

/// Targets not yet in the ledger, first occurrence order, duplicates dropped.
pub fn pending(targets: Vec<FetchTarget>, ledger: &Ledger, limit: Option<usize>) -> Vec<FetchTarget> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .filter(|t| !ledger.is_done(&t.checkpoint()) && seen.insert(t.clone()))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

/// Fetch targets one at a time: fetch, store, then checkpoint, before moving on.
pub async fn run<F: Fetch + ?Sized>(
    fetcher: &F,
    store: &mut dyn PageStore,
    ledger: &mut Ledger,
    targets: Vec<FetchTarget>,
) -> Result<CrawlStats> {
    let total = targets.len();
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut stats = CrawlStats {
        total,
        ..Default::default()
    };

    for target in targets {
        let entry = target.checkpoint();
        // A success earlier in this run may already cover this target.
        if ledger.is_done(&entry) {
            stats.skipped += 1;
            pb.inc(1);
            continue;
        }

        let fetched = match target.snapshot.as_deref() {
            Some(snapshot) => fetcher.fetch_archived(&target.identifier, snapshot).await,
            None => fetcher.fetch_live(&target.identifier).await.map(|body| vec![body]),
        };

        let outcome = match fetched {
            Ok(bodies) if bodies.is_empty() => {
                debug!("No capture for {} in {:?}", target.identifier, target.snapshot);
                stats.ok += 1;
                stats.empty += 1;
                Outcome::NoCapture
            }
            Ok(bodies) => {
                let records: Vec<PageRecord> = bodies
                    .into_iter()
                    .map(|body| PageRecord {
                        identifier: target.identifier.clone(),
                        snapshot: target.snapshot.clone(),
                        body,
                    })
                    .collect();
                store.store_all(&records)?;
                stats.ok += 1;
                stats.pages += records.len();
                Outcome::Success
            }
            Err(e) => {
                warn!("{}", e);
                stats.errors += 1;
                Outcome::Failure
            }
        };

        stats.checkpointed += ledger.mark_done(&entry, outcome)?;
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "Crawled {} targets ({} ok, {} empty, {} errors, {} skipped, {} pages)",
        stats.total, stats.ok, stats.empty, stats.errors, stats.skipped, stats.pages
    );

    Ok(stats)
}
