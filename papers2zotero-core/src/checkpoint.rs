//! Checkpoint Store: the durable ledger of handled source records.
//!
//! Entries are JSON lines appended on [`CheckpointStore::flush`]; on reload the
//! last entry per id wins. A torn trailing line (crash mid-append) is cut off
//! on open, so later appends start on a fresh line and at worst the records of
//! the last unflushed batch are redone.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{CheckpointError, FailureKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub id: i64,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub kind: FailureKind,
    pub diagnostic: Option<String>,
}

#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    retry: bool,
    succeeded: BTreeSet<i64>,
    failed: BTreeMap<i64, FailedEntry>,
    pending: Vec<CheckpointEntry>,
}

impl CheckpointStore {
    /// Load the ledger at `path`, or start empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>, retry: bool) -> Result<Self, CheckpointError> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self {
            path: path.clone(),
            retry,
            succeeded: BTreeSet::new(),
            failed: BTreeMap::new(),
            pending: Vec::new(),
        };

        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "[CHECKPOINT] No checkpoint file yet; starting fresh");
                return Ok(store);
            }
            Err(source) => return Err(CheckpointError::Io { path, source }),
        };

        let complete = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |p| p + 1);
        if complete < bytes.len() {
            warn!(
                path = %path.display(),
                bytes = bytes.len() - complete,
                "[CHECKPOINT] Truncating torn trailing line"
            );
            truncate(&path, complete as u64)?;
        }

        for (lineno, line) in bytes[..complete].split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<CheckpointEntry>(line) {
                Ok(entry) => store.apply(entry),
                Err(e) => warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "[CHECKPOINT] Skipping malformed checkpoint line"
                ),
            }
        }
        info!(
            path = %path.display(),
            succeeded = store.succeeded.len(),
            failed = store.failed.len(),
            retry,
            "[CHECKPOINT] Loaded checkpoint"
        );
        Ok(store)
    }

    fn apply(&mut self, entry: CheckpointEntry) {
        match entry.status {
            Status::Succeeded => {
                self.failed.remove(&entry.id);
                self.succeeded.insert(entry.id);
            }
            Status::Failed => {
                self.succeeded.remove(&entry.id);
                self.failed.insert(
                    entry.id,
                    FailedEntry {
                        kind: entry.kind.unwrap_or(FailureKind::Retryable),
                        diagnostic: entry.diagnostic,
                    },
                );
            }
        }
    }

    /// Succeeded ids are always done; failed ids are done unless retrying.
    pub fn is_done(&self, id: i64) -> bool {
        self.succeeded.contains(&id) || (!self.retry && self.failed.contains_key(&id))
    }

    pub fn is_succeeded(&self, id: i64) -> bool {
        self.succeeded.contains(&id)
    }

    pub fn is_failed(&self, id: i64) -> bool {
        self.failed.contains_key(&id)
    }

    pub fn is_failed_permanently(&self, id: i64) -> bool {
        self.failed
            .get(&id)
            .is_some_and(|f| f.kind == FailureKind::Permanent)
    }

    pub fn failure(&self, id: i64) -> Option<&FailedEntry> {
        self.failed.get(&id)
    }

    pub fn record_success(&mut self, id: i64) {
        if self.succeeded.contains(&id) {
            debug!(id, "[CHECKPOINT] Already succeeded; ignoring duplicate");
            return;
        }
        let entry = CheckpointEntry { id, status: Status::Succeeded, kind: None, diagnostic: None };
        self.apply(entry.clone());
        self.pending.push(entry);
    }

    pub fn record_failure(&mut self, id: i64, kind: FailureKind, diagnostic: impl Into<String>) {
        if self.succeeded.contains(&id) {
            warn!(id, "[CHECKPOINT] Refusing to mark a succeeded record as failed");
            return;
        }
        let entry = CheckpointEntry {
            id,
            status: Status::Failed,
            kind: Some(kind),
            diagnostic: Some(diagnostic.into()),
        };
        self.apply(entry.clone());
        self.pending.push(entry);
    }

    /// Append pending entries and sync them to disk.
    pub fn flush(&mut self) -> Result<(), CheckpointError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let io = |source| CheckpointError::Io { path: self.path.clone(), source };
        let mut buf = Vec::new();
        for entry in &self.pending {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io)?;
        file.write_all(&buf).map_err(io)?;
        file.sync_all().map_err(io)?;
        debug!(entries = self.pending.len(), path = %self.path.display(), "[CHECKPOINT] Flushed");
        self.pending.clear();
        Ok(())
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn truncate(path: &Path, len: u64) -> Result<(), CheckpointError> {
    let io = |source| CheckpointError::Io { path: path.to_path_buf(), source };
    let file = OpenOptions::new().write(true).open(path).map_err(io)?;
    file.set_len(len).map_err(io)?;
    file.sync_all().map_err(io)
}
