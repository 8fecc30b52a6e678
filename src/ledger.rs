use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

/// One "already attempted" record. Presence means the target is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointEntry {
    pub identifier: String,
    pub snapshot: Option<String>,
}

impl CheckpointEntry {
    pub fn new(identifier: impl Into<String>, snapshot: Option<&str>) -> Self {
        Self {
            identifier: identifier.into(),
            snapshot: snapshot.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// At least one capture was found.
    Success,
    /// The lookup worked but found nothing to store.
    NoCapture,
    Failure,
}

/// On-disk layout of the ledger file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LedgerFormat {
    /// `identifier,snapshot` (or `identifier`) lines, no header.
    Legacy,
    /// Tab-separated with a header line.
    Tabular,
}

/// Whether entries carry a snapshot column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    Archived,
    Live,
}

/// What a successful archived fetch implies about the snapshots after it.
///
/// `LaterSnapshots` treats one hit in snapshot S as grounds to skip every
/// snapshot listed after S for the same identifier. That can miss content
/// that changed later; it is kept because it saves most of the lookups.
/// A lookup that found zero captures is not a hit and never propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationPolicy {
    None,
    LaterSnapshots,
}

impl PropagationPolicy {
    /// Entries to append for `entry` given `outcome`. Always starts with
    /// `entry` itself.
    pub fn entries_for(
        &self,
        entry: &CheckpointEntry,
        outcome: Outcome,
        snapshots: &[String],
    ) -> Vec<CheckpointEntry> {
        let later: &[String] = match (self, outcome, entry.snapshot.as_deref()) {
            (PropagationPolicy::LaterSnapshots, Outcome::Success, Some(snapshot)) => snapshots
                .iter()
                .position(|s| s == snapshot)
                .map(|pos| &snapshots[pos + 1..])
                .unwrap_or(&[]),
            _ => &[],
        };

        std::iter::once(entry.clone())
            .chain(
                later
                    .iter()
                    .map(|s| CheckpointEntry::new(entry.identifier.clone(), Some(s))),
            )
            .collect()
    }
}

/// Append-only skip-set backed by a flat file.
pub struct Ledger {
    path: PathBuf,
    format: LedgerFormat,
    mode: LedgerMode,
    policy: PropagationPolicy,
    snapshots: Vec<String>,
    done: HashSet<CheckpointEntry>,
    file: File,
}

impl Ledger {
    /// Load every entry already on disk, then keep the file open for appends.
    pub fn open(
        path: impl AsRef<Path>,
        format: LedgerFormat,
        mode: LedgerMode,
        policy: PropagationPolicy,
        snapshots: Vec<String>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating ledger directory {}", parent.display()))?;
        }

        let done = if path.exists() {
            load_entries(&path, format, mode)?
        } else {
            HashSet::new()
        };
        info!("Ledger {}: {} entries", path.display(), done.len());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening ledger {}", path.display()))?;

        if format == LedgerFormat::Tabular && file.metadata()?.len() == 0 {
            let header = match mode {
                LedgerMode::Archived => "url\tcrawl\n",
                LedgerMode::Live => "url\n",
            };
            file.write_all(header.as_bytes())
                .with_context(|| format!("writing ledger header {}", path.display()))?;
        }

        Ok(Self {
            path,
            format,
            mode,
            policy,
            snapshots,
            done,
            file,
        })
    }

    pub fn is_done(&self, entry: &CheckpointEntry) -> bool {
        self.done.contains(entry)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.done.len()
    }

    /// Record an attempt. Returns how many new entries were appended; entries
    /// already present are not written again.
    pub fn mark_done(&mut self, entry: &CheckpointEntry, outcome: Outcome) -> Result<usize> {
        let policy = match self.mode {
            LedgerMode::Live => PropagationPolicy::None,
            LedgerMode::Archived => self.policy,
        };

        let mut appended = 0;
        for e in policy.entries_for(entry, outcome, &self.snapshots) {
            if self.done.contains(&e) {
                continue;
            }
            let line = format_line(&e, self.format, self.mode);
            self.file
                .write_all(line.as_bytes())
                .with_context(|| format!("appending to ledger {}", self.path.display()))?;
            self.done.insert(e);
            appended += 1;
        }
        self.file.flush()?;

        debug!("{:?} {} (+{} entries)", outcome, entry.identifier, appended);
        Ok(appended)
    }
}

/// Distinct entries in a ledger file, read without opening it for append.
/// A missing file has none.
pub fn count_entries(path: &Path, format: LedgerFormat, mode: LedgerMode) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    Ok(load_entries(path, format, mode)?.len())
}

fn format_line(entry: &CheckpointEntry, format: LedgerFormat, mode: LedgerMode) -> String {
    let sep = match format {
        LedgerFormat::Legacy => ',',
        LedgerFormat::Tabular => '\t',
    };
    match (mode, &entry.snapshot) {
        (LedgerMode::Archived, Some(s)) => format!("{}{}{}\n", entry.identifier, sep, s),
        (LedgerMode::Archived, None) => format!("{}{}None\n", entry.identifier, sep),
        (LedgerMode::Live, _) => format!("{}\n", entry.identifier),
    }
}

/// Parse one ledger line. Archived lines split on the last separator so
/// identifiers containing the separator survive.
fn parse_line(line: &str, format: LedgerFormat, mode: LedgerMode) -> Option<CheckpointEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }
    let sep = match format {
        LedgerFormat::Legacy => ',',
        LedgerFormat::Tabular => '\t',
    };
    match mode {
        LedgerMode::Live => Some(CheckpointEntry::new(line, None)),
        LedgerMode::Archived => {
            let (identifier, snapshot) = line.rsplit_once(sep)?;
            let snapshot = match snapshot.trim() {
                "" | "None" => None,
                s => Some(s),
            };
            Some(CheckpointEntry::new(identifier, snapshot))
        }
    }
}

fn load_entries(
    path: &Path,
    format: LedgerFormat,
    mode: LedgerMode,
) -> Result<HashSet<CheckpointEntry>> {
    let file = File::open(path).with_context(|| format!("reading ledger {}", path.display()))?;
    let skip = usize::from(format == LedgerFormat::Tabular);

    let mut done = HashSet::new();
    for line in BufReader::new(file).lines().skip(skip) {
        let line = line.with_context(|| format!("reading ledger {}", path.display()))?;
        if let Some(entry) = parse_line(&line, format, mode) {
            done.insert(entry);
        }
    }
    Ok(done)
}
