//! Error types for the migration pipeline.
//!
//! Per-record errors ([`RecordError`] and the errors it wraps) never abort a
//! run: the scheduler classifies them with [`FailureKind`] and records them in
//! the checkpoint ledger and the error sink. Only [`SyncError`] is fatal.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Whether re-running without code or data changes may resolve a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Retryable,
    Permanent,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Retryable => f.write_str("retryable"),
            FailureKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// Structurally invalid source data. Always permanent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("publication {id} has no title")]
    MissingTitle { id: i64 },

    #[error("publication {id} has an author with unsupported role {role}")]
    UnsupportedCreatorRole { id: i64, role: i64 },
}

/// Errors reported by a [`crate::contract::CloudProvider`].
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("cloud authentication failed: {0}")]
    Authentication(String),

    #[error("cloud API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("cloud rate limit exceeded")]
    RateLimited,

    #[error("cloud transport error: {0}")]
    Transport(String),

    #[error("failed to parse cloud API response: {0}")]
    Parse(String),
}

impl CloudError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CloudError::Api { status, .. } if *status < 500 && *status != 408 => {
                FailureKind::Permanent
            }
            CloudError::Parse(_) => FailureKind::Permanent,
            _ => FailureKind::Retryable,
        }
    }
}

/// Failure to materialize one attachment.
#[derive(Error, Debug)]
pub enum AttachmentError {
    #[error("attachment {} does not exist", path.display())]
    Missing { path: PathBuf },

    #[error("cloud object {path} not found at source or target")]
    CloudObjectMissing { path: String },

    #[error("failed to read attachment {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cloud move failed for {path}: {source}")]
    Cloud {
        path: String,
        #[source]
        source: CloudError,
    },
}

impl AttachmentError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AttachmentError::Missing { .. } | AttachmentError::CloudObjectMissing { .. } => {
                FailureKind::Permanent
            }
            AttachmentError::Read { .. } => FailureKind::Retryable,
            AttachmentError::Cloud { source, .. } => source.kind(),
        }
    }
}

/// Errors reported by a [`crate::contract::RemoteLibrary`].
#[derive(Error, Debug, Clone)]
pub enum RemoteError {
    #[error("remote transport error: {0}")]
    Transport(String),

    #[error("remote authentication failed (status {status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("remote rate limit exceeded (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("remote server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("remote rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("failed to decode remote response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Transport, auth, rate-limit and server errors are retryable; schema
    /// rejections and undecodable responses are permanent.
    pub fn kind(&self) -> FailureKind {
        match self {
            RemoteError::Transport(_)
            | RemoteError::Authentication { .. }
            | RemoteError::RateLimited { .. }
            | RemoteError::Server { .. } => FailureKind::Retryable,
            RemoteError::Rejected { .. } | RemoteError::Decode(_) => FailureKind::Permanent,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => RemoteError::Authentication { status, message },
            429 => RemoteError::RateLimited { retry_after: None },
            408 | 500..=599 => RemoteError::Server { status, message },
            _ => RemoteError::Rejected { status, message },
        }
    }
}

/// Errors reading the source library.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("publication {0} not found")]
    NotFound(i64),

    #[error("publication {id} has unknown publication subtype {subtype}")]
    UnknownPubType { id: i64, subtype: i64 },
}

/// Everything that can go wrong for a single source record.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RecordError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RecordError::Mapping(_) => FailureKind::Permanent,
            RecordError::Attachment(e) => e.kind(),
            RecordError::Remote(e) => e.kind(),
            RecordError::Store(StoreError::UnknownPubType { .. }) => FailureKind::Permanent,
            RecordError::Store(_) => FailureKind::Retryable,
        }
    }
}

/// Invalid run configuration. Detected before any batch starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch size must be between 1 and {max}, got {got}")]
    InvalidBatchSize { got: usize, max: usize },

    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid value {value:?} for `{setting}`: {reason}")]
    Invalid {
        setting: &'static str,
        value: String,
        reason: String,
    },
}

/// Checkpoint ledger I/O failures.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("failed to access checkpoint file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode checkpoint entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fatal, run-aborting errors.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("failed to write dry-run output: {0}")]
    Output(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_status_classification() {
        assert_eq!(RemoteError::from_status(429, "slow down").kind(), FailureKind::Retryable);
        assert_eq!(RemoteError::from_status(503, "down").kind(), FailureKind::Retryable);
        assert_eq!(RemoteError::from_status(403, "bad key").kind(), FailureKind::Retryable);
        assert_eq!(RemoteError::from_status(400, "bad item").kind(), FailureKind::Permanent);
        assert_eq!(RemoteError::from_status(413, "too big").kind(), FailureKind::Permanent);
    }

    #[test]
    fn attachment_error_classification() {
        let missing = AttachmentError::Missing { path: PathBuf::from("/nope.pdf") };
        assert_eq!(missing.kind(), FailureKind::Permanent);

        let read = AttachmentError::Read {
            path: PathBuf::from("/busy.pdf"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
        };
        assert_eq!(read.kind(), FailureKind::Retryable);
        assert_eq!(
            RecordError::from(MappingError::MissingTitle { id: 1 }).kind(),
            FailureKind::Permanent
        );
    }

    #[test]
    fn error_display() {
        let err = ConfigError::InvalidBatchSize { got: 51, max: 50 };
        assert_eq!(err.to_string(), "batch size must be between 1 and 50, got 51");
    }
}
