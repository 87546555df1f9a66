//! `load_config` module: merges the YAML config file, environment secrets and
//! command-line flags into one validated [`RunConfig`].
//!
//! Precedence is flags > environment > file > defaults. Secrets (`api_key`,
//! `library_id`) may come from `ZOTERO_API_KEY` / `ZOTERO_LIBRARY_ID`, which
//! `main` also loads from a `.env` file. `ZOTERO_API_URL` (or `api_url` in the
//! file) points the client at another Zotero-compatible API root.
//!
//! # Errors
//! Everything here returns `anyhow::Error` with enough context for the CLI to
//! print and exit; no batch has started when these errors surface.
use anyhow::{anyhow, bail, Context, Result};
use papers2zotero_core::attachments::{AttachmentMode, AttachmentStrategy};
use papers2zotero_core::collections::CollectionFilter;
use papers2zotero_core::config::{BatchSize, SynchroniseConfig, MAX_BATCH_SIZE};
use papers2zotero_core::mapper::{KeywordTypes, LabelMap, MappingOptions};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::cli::SyncArgs;
use crate::zotero::DEFAULT_BASE_URL;

pub const API_KEY_ENV: &str = "ZOTERO_API_KEY";
pub const LIBRARY_ID_ENV: &str = "ZOTERO_LIBRARY_ID";
pub const API_URL_ENV: &str = "ZOTERO_API_URL";

const DEFAULT_PAPERS2_FOLDER: &str = "~/Papers2";
const DEFAULT_CHECKPOINT_FILE: &str = "papers2zotero.checkpoint.jsonl";
const DEFAULT_ERRORS_FILE: &str = "papers2zotero_errors.txt";
const DEFAULT_CLOUD_AUTH_SETTINGS: &str = "settings.yaml";
const DEFAULT_CLOUD_SOURCE_ROOT: &str = "/Papers2";
const DEFAULT_CLOUD_TARGET_ROOT: &str = "/Zotero";

/// A list given either as `a,b,c` or as a YAML sequence.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ListSetting {
    Csv(String),
    List(Vec<String>),
}

impl ListSetting {
    fn joined(&self) -> String {
        match self {
            ListSetting::Csv(s) => s.clone(),
            ListSetting::List(items) => items.join(","),
        }
    }

    fn items(&self) -> Vec<String> {
        self.joined()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// `label_map` as `Purple=PriorityCurrent,...` or as a YAML mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LabelMapSetting {
    Pairs(String),
    Table(BTreeMap<String, String>),
}

impl LabelMapSetting {
    fn pairs(&self) -> String {
        match self {
            LabelMapSetting::Pairs(s) => s.clone(),
            LabelMapSetting::Table(t) => t
                .iter()
                .map(|(color, name)| format!("{color}={name}"))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// `dryrun: true` for stdout, or `dryrun: <path>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DryRunSetting {
    Enabled(bool),
    Path(PathBuf),
}

/// The YAML config file. Every key is optional; flags fill in or override.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub papers2_folder: Option<PathBuf>,
    pub library_id: Option<String>,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub library_type: Option<String>,
    pub include_collections: Option<ListSetting>,
    pub no_collections: Option<bool>,
    pub keyword_types: Option<ListSetting>,
    pub label_map: Option<LabelMapSetting>,
    pub label_tags_prefix: Option<String>,
    pub rowids: Option<Vec<i64>>,
    pub batch_size: Option<usize>,
    pub checkpoint_file: Option<PathBuf>,
    pub errors_file: Option<PathBuf>,
    pub retry: Option<bool>,
    pub dryrun: Option<DryRunSetting>,
    pub max_pubs: Option<usize>,
    pub attachments: Option<AttachmentMode>,
    pub attachment_link_base: Option<PathBuf>,
    pub attachment_cloud: Option<String>,
    pub cloud_auth_settings: Option<PathBuf>,
    pub cloud_source_root: Option<String>,
    pub cloud_target_root: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryType {
    User,
    Group,
}

impl LibraryType {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(LibraryType::User),
            "group" => Ok(LibraryType::Group),
            other => bail!("invalid library_type {other:?}: expected user or group"),
        }
    }

    /// URL path segment for the library prefix.
    pub fn segment(self) -> &'static str {
        match self {
            LibraryType::User => "users",
            LibraryType::Group => "groups",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub library_id: String,
    pub library_type: LibraryType,
    pub api_key: String,
    pub api_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudSettings {
    GoogleDrive { auth_settings: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DryRunTarget {
    Stdout,
    File(PathBuf),
}

/// Fully merged and validated run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub papers2_folder: PathBuf,
    pub checkpoint_file: PathBuf,
    pub errors_file: PathBuf,
    pub dryrun: Option<DryRunTarget>,
    /// Absent only for dry runs without credentials.
    pub remote: Option<RemoteSettings>,
    /// Present only for the cloud-move attachment strategy.
    pub cloud: Option<CloudSettings>,
    pub sync: SynchroniseConfig,
}

/// Read and parse the YAML config file.
pub fn load_file_config<P: AsRef<Path>>(path: P) -> Result<FileConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    match serde_yaml::from_str::<Option<FileConfig>>(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            Ok(conf.unwrap_or_default())
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            Err(anyhow!("Failed to parse config YAML: {e}"))
        }
    }
}

/// Merge `args` over the file named by `--config` (if any) and the environment.
pub fn load_config(args: &SyncArgs) -> Result<RunConfig> {
    let file = match &args.config {
        Some(path) => load_file_config(path)?,
        None => FileConfig::default(),
    };
    merge(args, file)
}

/// `~/x` → `$HOME/x`; other paths unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

fn env_secret(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn merge(args: &SyncArgs, file: FileConfig) -> Result<RunConfig> {
    let dryrun = match &args.dryrun {
        Some(Some(path)) => Some(DryRunTarget::File(path.clone())),
        Some(None) => Some(DryRunTarget::Stdout),
        None => match file.dryrun {
            Some(DryRunSetting::Enabled(true)) => Some(DryRunTarget::Stdout),
            Some(DryRunSetting::Enabled(false)) | None => None,
            Some(DryRunSetting::Path(path)) => Some(DryRunTarget::File(path)),
        },
    };

    let batch_size = BatchSize::new(args.batch_size.or(file.batch_size).unwrap_or(MAX_BATCH_SIZE))?;

    let library_type = LibraryType::parse(
        args.library_type
            .as_deref()
            .or(file.library_type.as_deref())
            .unwrap_or("user"),
    )?;
    let library_id = args
        .library_id
        .clone()
        .or_else(|| env_secret(LIBRARY_ID_ENV))
        .or(file.library_id);
    let api_key = args
        .api_key
        .clone()
        .or_else(|| env_secret(API_KEY_ENV))
        .or(file.api_key);
    let api_url = env_secret(API_URL_ENV)
        .or(file.api_url)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let remote = match (library_id, api_key) {
        (Some(library_id), Some(api_key)) => {
            Some(RemoteSettings { library_id, library_type, api_key, api_url })
        }
        (None, _) if dryrun.is_none() => bail!("missing required setting `library_id` (or {LIBRARY_ID_ENV})"),
        (_, None) if dryrun.is_none() => bail!("missing required setting `api_key` (or {API_KEY_ENV})"),
        _ => None,
    };

    let keyword_types = match args.keyword_types.as_deref() {
        Some(list) => KeywordTypes::parse(list)?,
        None => match &file.keyword_types {
            Some(setting) => KeywordTypes::parse(&setting.joined())?,
            None => KeywordTypes::all(),
        },
    };
    let prefix = args
        .label_tags_prefix
        .clone()
        .or(file.label_tags_prefix)
        .unwrap_or_else(|| LabelMap::DEFAULT_PREFIX.to_string());
    let label_pairs = args
        .label_map
        .clone()
        .or_else(|| file.label_map.as_ref().map(LabelMapSetting::pairs))
        .unwrap_or_default();
    let label_map = LabelMap::parse(&label_pairs, &prefix)?;

    let no_collections = args.no_collections || file.no_collections.unwrap_or(false);
    let include = if args.include_collections.is_empty() {
        file.include_collections.as_ref().map(ListSetting::items).unwrap_or_default()
    } else {
        args.include_collections.clone()
    };

    let attachments = match args.attachments.as_deref() {
        Some(mode) => mode.parse::<AttachmentMode>()?,
        None => file.attachments.unwrap_or_default(),
    };

    let link_base = args
        .attachment_link_base
        .clone()
        .or(file.attachment_link_base)
        .map(|p| expand_home(&p));
    let cloud_kind = args.attachment_cloud.clone().or(file.attachment_cloud);
    let cloud_auth = expand_home(
        &args
            .cloud_auth_settings
            .clone()
            .or(file.cloud_auth_settings)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CLOUD_AUTH_SETTINGS)),
    );

    let (strategy, cloud) = match (link_base, cloud_kind) {
        (None, None) => (AttachmentStrategy::Upload, None),
        (None, Some(_)) => bail!("`attachment_cloud` requires `attachment_link_base`"),
        (Some(base), None) => (AttachmentStrategy::Link { base }, None),
        (Some(base), Some(kind)) => {
            let cloud = match kind.trim().to_ascii_lowercase().as_str() {
                "gdrive" => CloudSettings::GoogleDrive { auth_settings: cloud_auth },
                other => bail!("unknown attachment_cloud {other:?}: only `gdrive` is supported"),
            };
            let source_root = args
                .cloud_source_root
                .clone()
                .or(file.cloud_source_root)
                .unwrap_or_else(|| DEFAULT_CLOUD_SOURCE_ROOT.to_string());
            let target_root = args
                .cloud_target_root
                .clone()
                .or(file.cloud_target_root)
                .unwrap_or_else(|| DEFAULT_CLOUD_TARGET_ROOT.to_string());
            (AttachmentStrategy::CloudMove { base, source_root, target_root }, Some(cloud))
        }
    };

    let rowids = if args.rowids.is_empty() { file.rowids } else { Some(args.rowids.clone()) };

    let sync = SynchroniseConfig {
        batch_size,
        max_pubs: args.max_pubs.or(file.max_pubs),
        rowids,
        retry: args.retry || file.retry.unwrap_or(false),
        attachments,
        strategy,
        mapping: MappingOptions { keyword_types, label_map },
        collections: CollectionFilter::from_settings(no_collections, include),
    };

    let papers2_folder = expand_home(
        &args
            .papers2_folder
            .clone()
            .or(file.papers2_folder)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PAPERS2_FOLDER)),
    );

    Ok(RunConfig {
        papers2_folder,
        checkpoint_file: args
            .checkpoint_file
            .clone()
            .or(file.checkpoint_file)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_FILE)),
        errors_file: args
            .errors_file
            .clone()
            .or(file.errors_file)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ERRORS_FILE)),
        dryrun,
        remote,
        cloud,
        sync,
    })
}

/// Read the log level from the config file early, before tracing is set up.
pub fn peek_log_level(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_yaml::from_str::<Option<FileConfig>>(&s).ok().flatten())
        .and_then(|c| c.log_level)
}

impl RunConfig {
    pub fn trace_loaded(&self) {
        info!(
            papers2_folder = %self.papers2_folder.display(),
            checkpoint_file = %self.checkpoint_file.display(),
            errors_file = %self.errors_file.display(),
            dryrun = ?self.dryrun,
            library = ?self.remote.as_ref().map(|r| (r.library_type, r.library_id.clone())),
            cloud = ?self.cloud,
            "Loaded RunConfig"
        );
        self.sync.trace_loaded();
    }
}

/// Context helper for config-dependent file opens.
pub fn with_path<T, E>(result: std::result::Result<T, E>, what: &str, path: &Path) -> Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    result.with_context(|| format!("failed to open {what} {}", path.display()))
}
