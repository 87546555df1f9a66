use tracing::{debug, info};

use crate::attachments::{AttachmentMode, AttachmentStrategy};
use crate::collections::CollectionFilter;
use crate::error::ConfigError;
use crate::mapper::MappingOptions;

/// Upper bound the remote API accepts for objects per write.
pub const MAX_BATCH_SIZE: usize = crate::sync_client::MAX_WRITE_OBJECTS;

/// Records per remote commit, validated to `1..=MAX_BATCH_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSize(usize);

impl BatchSize {
    pub fn new(n: usize) -> Result<Self, ConfigError> {
        if n == 0 || n > MAX_BATCH_SIZE {
            return Err(ConfigError::InvalidBatchSize { got: n, max: MAX_BATCH_SIZE });
        }
        Ok(Self(n))
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for BatchSize {
    fn default() -> Self {
        Self(MAX_BATCH_SIZE)
    }
}

/// Everything the scheduler needs for one run, already validated.
#[derive(Debug, Clone)]
pub struct SynchroniseConfig {
    pub batch_size: BatchSize,
    /// Cap on records added to batches (not on ids considered).
    pub max_pubs: Option<usize>,
    pub rowids: Option<Vec<i64>>,
    pub retry: bool,
    pub attachments: AttachmentMode,
    pub strategy: AttachmentStrategy,
    pub mapping: MappingOptions,
    pub collections: CollectionFilter,
}

impl Default for SynchroniseConfig {
    fn default() -> Self {
        Self {
            batch_size: BatchSize::default(),
            max_pubs: None,
            rowids: None,
            retry: false,
            attachments: AttachmentMode::All,
            strategy: AttachmentStrategy::Upload,
            mapping: MappingOptions::default(),
            collections: CollectionFilter::All,
        }
    }
}

impl SynchroniseConfig {
    pub fn trace_loaded(&self) {
        info!(
            batch_size = self.batch_size.get(),
            max_pubs = ?self.max_pubs,
            rowids = self.rowids.as_ref().map(Vec::len),
            retry = self.retry,
            attachments = ?self.attachments,
            "Loaded SynchroniseConfig"
        );
        debug!(?self, "SynchroniseConfig loaded (full debug)");
    }

    /// Short form for the errors file run header.
    pub fn summary(&self) -> String {
        let strategy = match &self.strategy {
            AttachmentStrategy::Upload => "upload",
            AttachmentStrategy::Link { .. } => "link",
            AttachmentStrategy::CloudMove { .. } => "cloud_move",
        };
        format!(
            "batch_size={} retry={} attachments={:?} strategy={strategy}",
            self.batch_size.get(),
            self.retry,
            self.attachments
        )
    }
}
