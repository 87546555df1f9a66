//! # contract: collaborator interfaces for the migration pipeline
//!
//! This module defines the three seams the pipeline talks through:
//!
//! - [`RecordStore`]: read-only access to the source library (publications by id)
//! - [`RemoteLibrary`]: the destination reference-manager API (items, files, collections)
//! - [`CloudProvider`]: a cloud drive holding attachment files (locate, move, share)
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall` so tests can script collaborators
//!   deterministically. Mocks are exported with the `test-export-mocks` feature.
//!
//! ## Error Handling
//! - Each trait returns its own typed error from [`crate::error`], which carries
//!   the retryable/permanent classification the scheduler needs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use mockall::automock;

use crate::error::{CloudError, RemoteError, StoreError};
use crate::record::SourceRecord;

/// Read-only repository over the source library.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All eligible record identifiers in library order, optionally restricted
    /// to the given subset.
    async fn list_ids(&self, rowids: Option<Vec<i64>>) -> Result<Vec<i64>, StoreError>;

    /// Load one full record snapshot.
    async fn get_record(&self, id: i64) -> Result<SourceRecord, StoreError>;

    /// Names of every source collection, whether or not a record references it.
    async fn collection_names(&self) -> Result<Vec<String>, StoreError>;
}

/// A per-object failure inside an otherwise accepted write request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFailure {
    pub code: u16,
    pub message: String,
}

/// Outcome of a multi-object write, keyed by the object's index in the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    #[serde(default)]
    pub success: BTreeMap<usize, String>,
    #[serde(default)]
    pub unchanged: BTreeMap<usize, String>,
    #[serde(default)]
    pub failed: BTreeMap<usize, WriteFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCollection {
    pub key: String,
    pub name: String,
}

/// The destination library API.
///
/// Implementations are responsible for transport, authentication and for
/// mapping HTTP outcomes onto [`RemoteError`] variants; the pipeline only sees
/// the classification.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteLibrary: Send + Sync {
    /// Field names accepted for an item of the given type.
    async fn item_template(&self, item_type: &str) -> Result<Vec<String>, RemoteError>;

    /// Create (or, for existing keys, report) up to 50 objects in one call.
    async fn create_items(
        &self,
        payload: Vec<serde_json::Value>,
    ) -> Result<WriteResponse, RemoteError>;

    /// Attach file content to an existing `imported_file` attachment item.
    async fn upload_file(
        &self,
        item_key: &str,
        filename: &str,
        mime_type: &str,
        content: &[u8],
    ) -> Result<(), RemoteError>;

    async fn list_collections(&self) -> Result<Vec<RemoteCollection>, RemoteError>;

    async fn create_collection(&self, name: &str) -> Result<RemoteCollection, RemoteError>;
}

/// A file or folder in a cloud drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudObject {
    pub id: String,
    pub name: String,
    /// Absolute path inside the drive, e.g. `/Zotero/Journal Article/A/Abe/x.pdf`.
    pub path: String,
}

/// Capability set needed to move attachments between cloud folders.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Resolve an absolute drive path to an object, if it exists.
    async fn locate(&self, path: &str) -> Result<Option<CloudObject>, CloudError>;

    /// Move the object into `folder` (created if needed) under `name`.
    async fn move_to_folder(
        &self,
        object: &CloudObject,
        folder: &str,
        name: &str,
    ) -> Result<CloudObject, CloudError>;

    /// A link that opens the object in the provider's UI.
    async fn shareable_reference(&self, object: &CloudObject) -> Result<String, CloudError>;
}
