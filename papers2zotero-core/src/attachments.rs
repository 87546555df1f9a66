//! Attachment Materializer.
//!
//! Turns an [`AttachmentDescriptor`] into an [`AttachmentRef`] the item can
//! carry, using one of three strategies chosen once per run:
//!
//! - [`AttachmentStrategy::Upload`]: read the file so its bytes can be uploaded.
//! - [`AttachmentStrategy::Link`]: rewrite the path into the linked-file base directory.
//! - [`AttachmentStrategy::CloudMove`]: move the object between cloud folders via a
//!   [`CloudProvider`], then reference it at its new location.
//!
//! Cloud moves mutate external state, so a rerun must recognise an object that
//! was already moved (gone from the source, present at the target) and treat it
//! as done.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::contract::{CloudObject, CloudProvider};
use crate::error::{AttachmentError, ConfigError};
use crate::mapper::remote_key;
use crate::record::{AttachmentDescriptor, PubType, SourceRecord};

/// Prefix Zotero uses for paths relative to its linked attachment base directory.
pub const LINKED_BASE_PREFIX: &str = "attachments:";

const SUPPLEMENT_DIR: &str = "Supplemental";
const SUPPLEMENT_TAG: &str = "&SUPP";
const DEFAULT_MIME: &str = "application/octet-stream";

/// Which attachments of a record are eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentMode {
    #[default]
    All,
    Unread,
    None,
}

impl AttachmentMode {
    pub fn select<'a>(&self, attachments: &'a [AttachmentDescriptor]) -> Vec<&'a AttachmentDescriptor> {
        match self {
            AttachmentMode::All => attachments.iter().collect(),
            AttachmentMode::Unread => attachments.iter().filter(|a| !a.read).collect(),
            AttachmentMode::None => Vec::new(),
        }
    }
}

impl FromStr for AttachmentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(AttachmentMode::All),
            "unread" => Ok(AttachmentMode::Unread),
            "none" => Ok(AttachmentMode::None),
            other => Err(ConfigError::Invalid {
                setting: "attachments",
                value: other.to_string(),
                reason: "expected one of all, unread, none".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentStrategy {
    Upload,
    Link {
        base: PathBuf,
    },
    CloudMove {
        base: PathBuf,
        /// Drive folder mirroring the Papers2 library folder, e.g. `/Papers2`.
        source_root: String,
        /// Drive folder mirroring the linked-file base directory, e.g. `/Zotero`.
        target_root: String,
    },
}

/// A materialized attachment, ready to become a child item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttachmentRef {
    Upload {
        key: String,
        title: String,
        mime_type: String,
        source: PathBuf,
        size: u64,
        #[serde(skip)]
        content: Vec<u8>,
    },
    Linked {
        key: String,
        title: String,
        mime_type: String,
        path: String,
        target: PathBuf,
        tags: Vec<String>,
    },
    Moved {
        key: String,
        title: String,
        mime_type: String,
        path: String,
        target: PathBuf,
        object_ref: Option<String>,
        tags: Vec<String>,
    },
}

impl AttachmentRef {
    pub fn key(&self) -> &str {
        match self {
            AttachmentRef::Upload { key, .. }
            | AttachmentRef::Linked { key, .. }
            | AttachmentRef::Moved { key, .. } => key,
        }
    }
}

/// Where an attachment lands under the linked-file base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedPath {
    /// Folder relative to the base, e.g. `Journal Article/A/Abe`.
    pub folder: PathBuf,
    pub file_name: String,
    pub supplement: bool,
}

impl LinkedPath {
    pub fn relative(&self) -> PathBuf {
        self.folder.join(&self.file_name)
    }
}

/// Rewrite a Papers2-relative path (`Articles/A/Abe/Abe 2008.pdf`) into the
/// ZotFile layout (`Journal Article/A/Abe/Abe 2008.pdf`).
///
/// The top-level Papers2 folder is replaced by the publication type folder and
/// the initial folder is cut to one character. Files under
/// `<top>/<initial>/<author>/Supplemental/` are lifted into the author folder
/// and prefixed with `Supplement-`.
pub fn linked_path(pub_type: PubType, relative: &Path) -> LinkedPath {
    let mut parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    let mut file_name = parts.pop().unwrap_or_default();
    let supplement = parts.len() == 4 && parts[3] == SUPPLEMENT_DIR;
    if supplement {
        parts.truncate(3);
        file_name = format!("Supplement-{file_name}");
    }
    if let Some(initial) = parts.get_mut(1) {
        if let Some(first) = initial.chars().next() {
            *initial = first.to_string();
        }
    }

    let mut folder = PathBuf::from(pub_type.folder());
    for part in parts.iter().skip(1) {
        folder.push(part);
    }
    LinkedPath { folder, file_name, supplement }
}

fn drive_path(root: &str, relative: &Path) -> String {
    let rel: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    format!("{}/{}", root.trim_end_matches('/'), rel.join("/"))
}

fn linked_zotero_path(relative: &Path) -> String {
    let rel: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("{LINKED_BASE_PREFIX}{}", rel.join("/"))
}

pub struct Materializer<'a> {
    strategy: AttachmentStrategy,
    cloud: Option<&'a dyn CloudProvider>,
    dry_run: bool,
}

impl<'a> Materializer<'a> {
    /// A cloud provider is required for [`AttachmentStrategy::CloudMove`]
    /// unless the run is a dry run, which never contacts the provider.
    pub fn new(
        strategy: AttachmentStrategy,
        cloud: Option<&'a dyn CloudProvider>,
        dry_run: bool,
    ) -> Result<Self, ConfigError> {
        if matches!(strategy, AttachmentStrategy::CloudMove { .. }) && cloud.is_none() && !dry_run {
            return Err(ConfigError::Missing("attachment_cloud"));
        }
        Ok(Self { strategy, cloud, dry_run })
    }

    pub async fn materialize(
        &self,
        record: &SourceRecord,
        index: usize,
        attachment: &AttachmentDescriptor,
    ) -> Result<AttachmentRef, AttachmentError> {
        let key = remote_key(record.id, &format!("attachment:{index}"));
        let mime_type = attachment
            .mime_type
            .clone()
            .unwrap_or_else(|| DEFAULT_MIME.to_string());

        match &self.strategy {
            AttachmentStrategy::Upload => self.upload(key, mime_type, attachment).await,
            AttachmentStrategy::Link { base } => {
                let linked = linked_path(record.pub_type, &attachment.relative_path);
                let relative = linked.relative();
                debug!(
                    record_id = record.id,
                    from = %attachment.relative_path.display(),
                    to = %relative.display(),
                    "[ATTACH] Linking attachment"
                );
                Ok(AttachmentRef::Linked {
                    key,
                    title: linked.file_name.clone(),
                    mime_type,
                    path: linked_zotero_path(&relative),
                    target: base.join(&relative),
                    tags: supplement_tags(&linked),
                })
            }
            AttachmentStrategy::CloudMove { base, source_root, target_root } => {
                let linked = linked_path(record.pub_type, &attachment.relative_path);
                let relative = linked.relative();
                let object_ref = self
                    .cloud_move(source_root, target_root, &attachment.relative_path, &linked)
                    .await?;
                Ok(AttachmentRef::Moved {
                    key,
                    title: linked.file_name.clone(),
                    mime_type,
                    path: linked_zotero_path(&relative),
                    target: base.join(&relative),
                    object_ref,
                    tags: supplement_tags(&linked),
                })
            }
        }
    }

    async fn upload(
        &self,
        key: String,
        mime_type: String,
        attachment: &AttachmentDescriptor,
    ) -> Result<AttachmentRef, AttachmentError> {
        let path = &attachment.path;
        let classify = |e: std::io::Error| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AttachmentError::Missing { path: path.clone() }
            } else {
                AttachmentError::Read { path: path.clone(), source: e }
            }
        };

        let (size, content) = if self.dry_run {
            let meta = tokio::fs::metadata(path).await.map_err(classify)?;
            (meta.len(), Vec::new())
        } else {
            let content = tokio::fs::read(path).await.map_err(classify)?;
            (content.len() as u64, content)
        };

        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(path = %path.display(), size, "[ATTACH] Read attachment for upload");
        Ok(AttachmentRef::Upload {
            key,
            title,
            mime_type,
            source: path.clone(),
            size,
            content,
        })
    }

    /// Returns a shareable reference to the object at its target location, or
    /// `None` on a dry run.
    async fn cloud_move(
        &self,
        source_root: &str,
        target_root: &str,
        relative: &Path,
        linked: &LinkedPath,
    ) -> Result<Option<String>, AttachmentError> {
        let source_path = drive_path(source_root, relative);
        let folder = drive_path(target_root, &linked.folder);
        let target_path = format!("{folder}/{}", linked.file_name);

        if self.dry_run {
            info!(from = %source_path, to = %target_path, "[ATTACH][DRYRUN] Would move cloud object");
            return Ok(None);
        }
        let cloud = self.cloud.ok_or_else(|| AttachmentError::CloudObjectMissing {
            path: source_path.clone(),
        })?;
        let cloud_err = |path: &str| {
            let path = path.to_string();
            move |source| AttachmentError::Cloud { path, source }
        };

        let source = cloud.locate(&source_path).await.map_err(cloud_err(&source_path))?;
        let target = cloud.locate(&target_path).await.map_err(cloud_err(&target_path))?;

        let moved: CloudObject = match (source, target) {
            (Some(object), None) => {
                let moved = cloud
                    .move_to_folder(&object, &folder, &linked.file_name)
                    .await
                    .map_err(cloud_err(&source_path))?;
                info!(from = %source_path, to = %target_path, "[ATTACH] Moved cloud object");
                moved
            }
            (None, Some(existing)) => {
                info!(path = %target_path, "[ATTACH] Cloud object already moved; skipping move");
                existing
            }
            (Some(_), Some(existing)) => {
                warn!(
                    source = %source_path,
                    target = %target_path,
                    "[ATTACH] Object exists at both source and target; keeping target, leaving source in place"
                );
                existing
            }
            (None, None) => {
                return Err(AttachmentError::CloudObjectMissing { path: source_path });
            }
        };

        let reference = cloud
            .shareable_reference(&moved)
            .await
            .map_err(cloud_err(&target_path))?;
        Ok(Some(reference))
    }
}

fn supplement_tags(linked: &LinkedPath) -> Vec<String> {
    if linked.supplement {
        vec![SUPPLEMENT_TAG.to_string()]
    } else {
        Vec::new()
    }
}
