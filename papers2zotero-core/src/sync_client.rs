//! Remote Sync Client: submits a batch of normalized items and classifies the
//! outcome per item.
//!
//! Items are written with deterministic keys and `version: 0`, so a replayed
//! create for an item that already exists comes back as a per-object `412`
//! and is treated as success. Child notes and attachments are created only for
//! accepted parents; a child failure downgrades the parent's result.

use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

use crate::attachments::AttachmentRef;
use crate::contract::{RemoteLibrary, WriteResponse};
use crate::error::{FailureKind, RemoteError};
use crate::mapper::{remote_key, NormalizedItem};

/// Objects accepted by one write call.
pub const MAX_WRITE_OBJECTS: usize = 50;

/// Per-object code for "object with this key already exists".
const ALREADY_EXISTS: u16 = 412;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PerItemResult {
    Created(String),
    RetryableFailure(String),
    PermanentFailure(String),
}

impl PerItemResult {
    pub fn failure(kind: FailureKind, reason: impl Into<String>) -> Self {
        match kind {
            FailureKind::Retryable => PerItemResult::RetryableFailure(reason.into()),
            FailureKind::Permanent => PerItemResult::PermanentFailure(reason.into()),
        }
    }

    pub fn from_error(err: &RemoteError) -> Self {
        Self::failure(err.kind(), err.to_string())
    }

    pub fn is_created(&self) -> bool {
        matches!(self, PerItemResult::Created(_))
    }
}

/// Outcome of one object in a write call.
enum ObjectOutcome {
    Written,
    Failed(RemoteError),
}

fn outcome(response: &WriteResponse, index: usize) -> ObjectOutcome {
    if response.success.contains_key(&index) || response.unchanged.contains_key(&index) {
        return ObjectOutcome::Written;
    }
    match response.failed.get(&index) {
        Some(f) if f.code == ALREADY_EXISTS => ObjectOutcome::Written,
        Some(f) => ObjectOutcome::Failed(RemoteError::from_status(f.code, f.message.clone())),
        None => ObjectOutcome::Failed(RemoteError::Server {
            status: 0,
            message: format!("no result reported for object {index}"),
        }),
    }
}

/// A child object waiting to be written, with the index of its parent item.
struct Child {
    owner: usize,
    payload: Value,
    upload: Option<Upload>,
}

struct Upload {
    key: String,
    filename: String,
    mime_type: String,
    content: Vec<u8>,
}

pub struct SyncClient<'a, R: RemoteLibrary + ?Sized> {
    remote: &'a R,
    templates: HashMap<String, BTreeSet<String>>,
}

impl<'a, R: RemoteLibrary + ?Sized> SyncClient<'a, R> {
    pub fn new(remote: &'a R) -> Self {
        Self { remote, templates: HashMap::new() }
    }

    /// One result per input item, in input order. Upload contents are moved
    /// out of `items` once their attachment objects are written.
    pub async fn submit_batch(&mut self, items: &mut [NormalizedItem]) -> Vec<PerItemResult> {
        let mut results: Vec<Option<PerItemResult>> = vec![None; items.len()];
        let mut payloads = Vec::with_capacity(items.len());
        let mut owners = Vec::with_capacity(items.len());

        for (i, item) in items.iter().enumerate() {
            match self.item_payload(item).await {
                Ok(payload) => {
                    payloads.push(payload);
                    owners.push(i);
                }
                Err(e) => {
                    warn!(source_id = item.source_id, error = %e, "[REMOTE] Could not build item payload");
                    results[i] = Some(PerItemResult::from_error(&e));
                }
            }
        }

        if !payloads.is_empty() {
            match self.remote.create_items(payloads).await {
                Ok(response) => {
                    for (pos, &i) in owners.iter().enumerate() {
                        results[i] = Some(match outcome(&response, pos) {
                            ObjectOutcome::Written => PerItemResult::Created(items[i].key.clone()),
                            ObjectOutcome::Failed(e) => PerItemResult::from_error(&e),
                        });
                    }
                }
                Err(e) => {
                    warn!(items = owners.len(), error = %e, "[REMOTE] Item write failed for the whole batch");
                    for &i in &owners {
                        results[i] = Some(PerItemResult::from_error(&e));
                    }
                }
            }
        }

        let mut results: Vec<PerItemResult> = results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| PerItemResult::RetryableFailure("not submitted".into())))
            .collect();

        self.write_children(items, &mut results).await;

        let created = results.iter().filter(|r| r.is_created()).count();
        info!(items = items.len(), created, "[REMOTE] Batch submitted");
        results
    }

    async fn item_payload(&mut self, item: &NormalizedItem) -> Result<Value, RemoteError> {
        let template = self.template(&item.item_type).await?;

        let mut payload = Map::new();
        payload.insert("key".into(), item.key.clone().into());
        payload.insert("version".into(), 0.into());
        payload.insert("itemType".into(), item.item_type.clone().into());
        for (name, value) in &item.fields {
            if template.contains(name) {
                payload.insert(name.clone(), value.clone());
            } else {
                debug!(field = %name, item_type = %item.item_type, "[REMOTE] Dropping field not in item template");
            }
        }
        if template.contains("creators") {
            payload.insert("creators".into(), json!(item.creators));
        }
        payload.insert("tags".into(), json!(item.tags));
        payload.insert("collections".into(), json!(item.collections));
        Ok(Value::Object(payload))
    }

    async fn template(&mut self, item_type: &str) -> Result<&BTreeSet<String>, RemoteError> {
        if !self.templates.contains_key(item_type) {
            let fields = self.remote.item_template(item_type).await?;
            debug!(item_type, fields = fields.len(), "[REMOTE] Cached item template");
            self.templates
                .insert(item_type.to_string(), fields.into_iter().collect());
        }
        self.templates
            .get(item_type)
            .ok_or_else(|| RemoteError::Decode(format!("no template for {item_type}")))
    }

    async fn write_children(&mut self, items: &mut [NormalizedItem], results: &mut [PerItemResult]) {
        let mut children = Vec::new();
        for (i, item) in items.iter_mut().enumerate() {
            if results[i].is_created() {
                children.extend(child_objects(i, item));
            }
        }
        if children.is_empty() {
            return;
        }

        let mut uploads = Vec::new();
        for chunk in children.chunks_mut(MAX_WRITE_OBJECTS) {
            let payloads: Vec<Value> = chunk.iter().map(|c| c.payload.clone()).collect();
            match self.remote.create_items(payloads).await {
                Ok(response) => {
                    for (pos, child) in chunk.iter_mut().enumerate() {
                        match outcome(&response, pos) {
                            ObjectOutcome::Written => {
                                if let Some(upload) = child.upload.take() {
                                    uploads.push((child.owner, upload));
                                }
                            }
                            ObjectOutcome::Failed(e) => downgrade(results, items, child.owner, &e),
                        }
                    }
                }
                Err(e) => {
                    for child in chunk.iter() {
                        downgrade(results, items, child.owner, &e);
                    }
                }
            }
        }

        for (owner, upload) in uploads {
            if !results[owner].is_created() {
                continue;
            }
            match self
                .remote
                .upload_file(&upload.key, &upload.filename, &upload.mime_type, &upload.content)
                .await
            {
                Ok(()) => debug!(key = %upload.key, bytes = upload.content.len(), "[REMOTE] Uploaded attachment"),
                Err(e) => downgrade(results, items, owner, &e),
            }
        }
    }
}

fn downgrade(results: &mut [PerItemResult], items: &[NormalizedItem], owner: usize, err: &RemoteError) {
    warn!(source_id = items[owner].source_id, error = %err, "[REMOTE] Child object failed");
    // Keep the first failure reason.
    if results[owner].is_created() {
        results[owner] = PerItemResult::from_error(err);
    }
}

fn child_objects(owner: usize, item: &mut NormalizedItem) -> Vec<Child> {
    let mut children = Vec::new();
    for (n, note) in item.notes.iter().enumerate() {
        children.push(Child {
            owner,
            payload: json!({
                "key": remote_key(item.source_id, &format!("note:{n}")),
                "version": 0,
                "itemType": "note",
                "parentItem": item.key,
                "note": note,
                "tags": [],
            }),
            upload: None,
        });
    }

    for attachment in &mut item.attachments {
        let (payload, upload) = match attachment {
            AttachmentRef::Upload { key, title, mime_type, content, .. } => (
                json!({
                    "key": key,
                    "version": 0,
                    "itemType": "attachment",
                    "linkMode": "imported_file",
                    "parentItem": item.key,
                    "title": title,
                    "contentType": mime_type,
                    "filename": title,
                    "tags": [],
                }),
                Some(Upload {
                    key: key.clone(),
                    filename: title.clone(),
                    mime_type: mime_type.clone(),
                    content: std::mem::take(content),
                }),
            ),
            AttachmentRef::Linked { key, title, mime_type, path, tags, .. } => (
                linked_payload(&item.key, key, title, mime_type, path, tags, None),
                None,
            ),
            AttachmentRef::Moved { key, title, mime_type, path, object_ref, tags, .. } => (
                linked_payload(&item.key, key, title, mime_type, path, tags, object_ref.as_deref()),
                None,
            ),
        };
        children.push(Child { owner, payload, upload });
    }
    children
}

fn linked_payload(
    parent: &str,
    key: &str,
    title: &str,
    mime_type: &str,
    path: &str,
    tags: &[String],
    url: Option<&str>,
) -> Value {
    let mut payload = json!({
        "key": key,
        "version": 0,
        "itemType": "attachment",
        "linkMode": "linked_file",
        "parentItem": parent,
        "title": title,
        "contentType": mime_type,
        "path": path,
        "tags": tags.iter().map(|t| json!({ "tag": t })).collect::<Vec<_>>(),
    });
    if let (Some(url), Some(obj)) = (url, payload.as_object_mut()) {
        obj.insert("url".into(), url.into());
    }
    payload
}
