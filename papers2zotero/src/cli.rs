//! CLI glue for papers2zotero: argument parsing, wiring of the concrete
//! collaborators, and the async [`run`] entrypoint used by `main` and tests.
//!
//! All migration logic lives in `papers2zotero-core`; this module only builds
//! a [`RunConfig`](crate::load_config::RunConfig), opens the Papers2 store, the
//! checkpoint and the errors file, and hands them to the core scheduler.
use crate::gdrive::{DriveSettings, GoogleDriveClient};
use crate::load_config::{load_config, with_path, CloudSettings, DryRunTarget, RunConfig};
use crate::zotero::ZoteroClient;
use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use papers2zotero_core::checkpoint::CheckpointStore;
use papers2zotero_core::contract::CloudProvider;
use papers2zotero_core::dryrun::DryRunWriter;
use papers2zotero_core::error_sink::ErrorSink;
use papers2zotero_core::papers2::Papers2Store;
use papers2zotero_core::synchronise::{dry_run, synchronise, SynchroniseReport};
use std::path::PathBuf;

/// CLI for papers2zotero: migrate a Papers2 library into Zotero.
#[derive(Parser, Debug)]
#[clap(
    name = "papers2zotero",
    version,
    about = "Migrate Papers2 publications, notes, tags, collections and attachments into a Zotero library"
)]
pub struct Cli {
    /// Log filter (e.g. warn, info, papers2zotero_core=debug); overrides RUST_LOG
    #[clap(long, global = true)]
    pub log_level: Option<String>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Migrate publications, resuming from the checkpoint file
    Sync(SyncArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct SyncArgs {
    /// Path to the YAML config file; flags override its values
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Path to the Papers2 folder [default: ~/Papers2]
    #[clap(short = 'f', long)]
    pub papers2_folder: Option<PathBuf>,

    /// Zotero library ID (or ZOTERO_LIBRARY_ID)
    #[clap(short = 'i', long)]
    pub library_id: Option<String>,

    /// Zotero API key (or ZOTERO_API_KEY)
    #[clap(short = 'a', long)]
    pub api_key: Option<String>,

    /// Zotero library type: user or group [default: user]
    #[clap(short = 't', long)]
    pub library_type: Option<String>,

    /// Only convert these Papers2 collections into Zotero collections
    #[clap(short = 'C', long, value_delimiter = ',')]
    pub include_collections: Vec<String>,

    /// Do not put items into Zotero collections
    #[clap(long)]
    pub no_collections: bool,

    /// Keyword types to convert into tags: user, auto, label [default: user,label,auto]
    #[clap(short = 'k', long)]
    pub keyword_types: Option<String>,

    /// Color label renames, e.g. Purple=PriorityCurrent,Red=Urgent
    #[clap(short = 'l', long)]
    pub label_map: Option<String>,

    /// Prefix for label tags without an explicit rename [default: Label]
    #[clap(short = 'L', long)]
    pub label_tags_prefix: Option<String>,

    /// Only process these Papers2 publication ids
    #[clap(short = 'r', long, value_delimiter = ',')]
    pub rowids: Vec<i64>,

    /// Items per Zotero write, 1 to 50 [default: 50]
    #[clap(long)]
    pub batch_size: Option<usize>,

    /// Ledger of handled publication ids [default: papers2zotero.checkpoint.jsonl]
    #[clap(long)]
    pub checkpoint_file: Option<PathBuf>,

    /// Human-readable log of failed publications [default: papers2zotero_errors.txt]
    #[clap(long)]
    pub errors_file: Option<PathBuf>,

    /// Reprocess publications that failed in earlier runs
    #[clap(long)]
    pub retry: bool,

    /// Print the would-be Zotero payloads instead of sending them (to FILE if given)
    #[clap(long, value_name = "FILE", num_args = 0..=1)]
    pub dryrun: Option<Option<PathBuf>>,

    /// Stop after this many publications
    #[clap(long)]
    pub max_pubs: Option<usize>,

    /// Which attachments to migrate: all, unread, none [default: all]
    #[clap(long)]
    pub attachments: Option<String>,

    /// Zotero linked attachment base directory; link files instead of uploading
    #[clap(long)]
    pub attachment_link_base: Option<PathBuf>,

    /// Cloud provider holding the attachment folders (only `gdrive`)
    #[clap(long)]
    pub attachment_cloud: Option<String>,

    /// Cloud authentication settings file [default: settings.yaml]
    #[clap(long)]
    pub cloud_auth_settings: Option<PathBuf>,

    /// Drive folder mirroring the Papers2 folder [default: /Papers2]
    #[clap(long)]
    pub cloud_source_root: Option<String>,

    /// Drive folder mirroring the linked attachment base directory [default: /Zotero]
    #[clap(long)]
    pub cloud_target_root: Option<String>,
}

/// Result of a completed run, used by `main` to pick the exit code.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: SynchroniseReport,
    pub dry_run: bool,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        !self.report.has_permanent_failures()
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<RunOutcome> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync(args) => {
            let config = load_config(&args)?;
            config.trace_loaded();
            tracing::info!(command = "sync", "Starting synchronisation process");
            let outcome = sync(&config).await;
            match &outcome {
                Ok(outcome) => {
                    tracing::info!(command = "sync", report = ?outcome.report, "Synchronisation complete");
                    print_summary(&outcome.report, outcome.dry_run);
                }
                Err(e) => tracing::error!(command = "sync", error = %e, "Synchronisation failed"),
            }
            outcome
        }
    }
}

async fn sync(config: &RunConfig) -> Result<RunOutcome> {
    let store = with_path(
        Papers2Store::open(&config.papers2_folder).await,
        "Papers2 library",
        &Papers2Store::database_path(&config.papers2_folder),
    )?;

    if let Some(target) = &config.dryrun {
        let mut writer = match target {
            DryRunTarget::Stdout => DryRunWriter::stdout(),
            DryRunTarget::File(path) => with_path(DryRunWriter::create(path), "dry-run output", path)?,
        };
        let report = dry_run(&config.sync, &store, &mut writer).await?;
        return Ok(RunOutcome { report, dry_run: true });
    }

    let remote_settings = config
        .remote
        .as_ref()
        .ok_or_else(|| anyhow!("Zotero library_id and api_key are required"))?;
    let remote = ZoteroClient::new(remote_settings)?;

    let cloud: Option<Box<dyn CloudProvider>> = match &config.cloud {
        Some(CloudSettings::GoogleDrive { auth_settings }) => {
            let settings = DriveSettings::load(auth_settings)?;
            Some(Box::new(GoogleDriveClient::new(settings)))
        }
        None => None,
    };

    let mut checkpoint = CheckpointStore::open(&config.checkpoint_file, config.sync.retry)?;
    let mut errors = ErrorSink::open(&config.errors_file)?;

    let report = synchronise(
        &config.sync,
        &store,
        &remote,
        cloud.as_deref(),
        &mut checkpoint,
        &mut errors,
    )
    .await?;
    Ok(RunOutcome { report, dry_run: false })
}

fn print_summary(report: &SynchroniseReport, dry_run: bool) {
    if dry_run {
        eprintln!(
            "Dry run: {} publications mapped, {} would fail",
            report.succeeded,
            report.failed()
        );
        return;
    }
    eprintln!(
        "Migrated {} publications in {} batches; {} failed ({} permanent, {} retryable); \
         skipped {} already migrated and {} previously failed",
        report.succeeded,
        report.batches,
        report.failed(),
        report.failed_permanent,
        report.failed_retryable,
        report.skipped_done,
        report.skipped_failed,
    );
    if !report.failed_ids.is_empty() {
        eprintln!("Failed publication ids: {:?}", report.failed_ids);
    }
}
