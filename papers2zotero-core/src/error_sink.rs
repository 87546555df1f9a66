//! Human-readable errors file for the operator.
//!
//! One line per failed record, appended across runs:
//! `2024-05-01T10:00:00Z | PERMANENT | record 354 (Some Title): publication 354 has no title`

use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{CheckpointError, FailureKind};

#[derive(Debug)]
pub struct ErrorSink {
    target: Option<(PathBuf, File)>,
    entries: usize,
}

impl ErrorSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| CheckpointError::Io { path: path.clone(), source })?;
        Ok(Self { target: Some((path, file)), entries: 0 })
    }

    /// A sink that only counts; used for dry runs and in tests.
    pub fn disabled() -> Self {
        Self { target: None, entries: 0 }
    }

    pub fn begin_run(&mut self, summary: &str) {
        self.write_line(&format!("{} | RUN | {summary}", timestamp()));
    }

    pub fn record(&mut self, id: i64, title: &str, kind: FailureKind, diagnostic: &str) {
        let label = match kind {
            FailureKind::Permanent => "PERMANENT",
            FailureKind::Retryable => "RETRYABLE",
        };
        self.write_line(&format!(
            "{} | {label} | record {id} ({title}): {diagnostic}",
            timestamp()
        ));
        self.entries += 1;
    }

    /// Failures recorded during this run.
    pub fn entries(&self) -> usize {
        self.entries
    }

    // Losing an errors-file line must not fail the run; the checkpoint still has it.
    fn write_line(&mut self, line: &str) {
        if let Some((path, file)) = self.target.as_mut() {
            if let Err(e) = writeln!(file, "{line}").and_then(|_| file.flush()) {
                warn!(path = %path.display(), error = %e, "[ERRORS] Failed to write errors file");
            }
        }
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
