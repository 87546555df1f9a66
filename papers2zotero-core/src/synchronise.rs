//! Batch Scheduler: drives the Papers2 → Zotero migration.
//!
//! The pipeline for each eligible source record is:
//!   - load the record from the [`RecordStore`]
//!   - validate it, so bad source data fails before any side effect
//!   - resolve its collections ([`CollectionResolver`])
//!   - materialize its attachments ([`Materializer`])
//!   - map it to a [`NormalizedItem`]
//!
//! Items are committed in batches of at most `batch_size` through the
//! [`SyncClient`]; every per-item result goes to the [`CheckpointStore`] (and,
//! for failures, the [`ErrorSink`]) and the checkpoint is flushed after every
//! batch.
//!
//! # Error Handling
//! Per-record failures are classified and recorded; they never abort the run.
//! Only configuration errors, failing to list records, and failing to persist
//! the checkpoint are fatal ([`SyncError`]).
//!
//! # Navigation
//! - Live run: [`synchronise`]
//! - Dry run: [`dry_run`], which never touches the remote API or the checkpoint
//! - Summary: [`SynchroniseReport`]

use tracing::{debug, error, info, warn};

use crate::attachments::Materializer;
use crate::checkpoint::CheckpointStore;
use crate::collections::CollectionResolver;
use crate::config::SynchroniseConfig;
use crate::contract::{CloudProvider, RecordStore, RemoteLibrary};
use crate::dryrun::DryRunWriter;
use crate::error::{FailureKind, RecordError, SyncError};
use crate::error_sink::ErrorSink;
use crate::mapper::{self, NormalizedItem};
use crate::record::SourceRecord;
use crate::sync_client::{PerItemResult, SyncClient};

/// What happened during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynchroniseReport {
    /// Ids returned by the record store (after the `rowids` restriction).
    pub considered: usize,
    /// Skipped because the checkpoint already has them as succeeded.
    pub skipped_done: usize,
    /// Skipped because they failed in an earlier run and retry was not requested.
    pub skipped_failed: usize,
    /// The permanent subset of `skipped_failed`.
    pub skipped_failed_permanent: usize,
    pub succeeded: usize,
    pub failed_retryable: usize,
    pub failed_permanent: usize,
    /// Batches submitted to the remote (or written, for a dry run).
    pub batches: usize,
    pub failed_ids: Vec<i64>,
}

impl SynchroniseReport {
    /// True when any record ends the run permanently failed, including ones
    /// skipped from earlier runs.
    pub fn has_permanent_failures(&self) -> bool {
        self.failed_permanent > 0 || self.skipped_failed_permanent > 0
    }

    pub fn failed(&self) -> usize {
        self.failed_retryable + self.failed_permanent
    }

    fn count_failure(&mut self, id: i64, kind: FailureKind) {
        match kind {
            FailureKind::Retryable => self.failed_retryable += 1,
            FailureKind::Permanent => self.failed_permanent += 1,
        }
        self.failed_ids.push(id);
    }
}

/// Migrate every eligible record, committing in batches.
pub async fn synchronise<S, R>(
    config: &SynchroniseConfig,
    store: &S,
    remote: &R,
    cloud: Option<&dyn CloudProvider>,
    checkpoint: &mut CheckpointStore,
    errors: &mut ErrorSink,
) -> Result<SynchroniseReport, SyncError>
where
    S: RecordStore + ?Sized,
    R: RemoteLibrary + ?Sized,
{
    info!(
        batch_size = config.batch_size.get(),
        retry = config.retry,
        "[SYNC] Starting synchronisation"
    );
    let materializer = Materializer::new(config.strategy.clone(), cloud, false)?;
    let mut resolver = CollectionResolver::new(config.collections.clone());
    let mut client = SyncClient::new(remote);
    errors.begin_run(&config.summary());

    let ids = store.list_ids(config.rowids.clone()).await?;
    info!(count = ids.len(), "[SYNC] Listed source records");

    let mut report = SynchroniseReport { considered: ids.len(), ..Default::default() };
    let mut batch: Vec<NormalizedItem> = Vec::with_capacity(config.batch_size.get());
    let mut added = 0usize;

    for id in ids {
        if checkpoint.is_done(id) {
            if checkpoint.is_succeeded(id) {
                report.skipped_done += 1;
            } else {
                report.skipped_failed += 1;
                if checkpoint.is_failed_permanently(id) {
                    report.skipped_failed_permanent += 1;
                }
            }
            debug!(id, "[SYNC] Skipping checkpointed record");
            continue;
        }
        if config.max_pubs.is_some_and(|max| added >= max) {
            info!(max_pubs = added, "[SYNC] Reached max_pubs; stopping");
            break;
        }

        let record = match store.get_record(id).await {
            Ok(record) => record,
            Err(e) => {
                let e = RecordError::from(e);
                fail(checkpoint, errors, &mut report, id, "<unknown>", &e);
                continue;
            }
        };

        match prepare(config, &record, remote, &mut resolver, &materializer).await {
            Ok(item) => {
                batch.push(item);
                added += 1;
            }
            Err(e) => {
                fail(checkpoint, errors, &mut report, id, record.display_title(), &e);
                continue;
            }
        }

        if batch.len() >= config.batch_size.get() {
            commit(&mut client, &mut batch, checkpoint, errors, &mut report).await?;
        }
    }
    if !batch.is_empty() {
        commit(&mut client, &mut batch, checkpoint, errors, &mut report).await?;
    }
    checkpoint.flush()?;

    info!(
        considered = report.considered,
        skipped_done = report.skipped_done,
        skipped_failed = report.skipped_failed,
        succeeded = report.succeeded,
        failed_retryable = report.failed_retryable,
        failed_permanent = report.failed_permanent,
        batches = report.batches,
        collections = resolver.cached(),
        "[SYNC] Synchronisation finished"
    );
    Ok(report)
}

async fn prepare<R>(
    config: &SynchroniseConfig,
    record: &SourceRecord,
    remote: &R,
    resolver: &mut CollectionResolver,
    materializer: &Materializer<'_>,
) -> Result<NormalizedItem, RecordError>
where
    R: RemoteLibrary + ?Sized,
{
    mapper::validate(record)?;
    let collections = resolver.resolve(remote, &record.collections).await?;

    let mut attachments = Vec::new();
    for (index, descriptor) in config.attachments.select(&record.attachments).into_iter().enumerate() {
        attachments.push(materializer.materialize(record, index, descriptor).await?);
    }
    Ok(mapper::map(record, &config.mapping, collections, attachments)?)
}

async fn commit<R>(
    client: &mut SyncClient<'_, R>,
    batch: &mut Vec<NormalizedItem>,
    checkpoint: &mut CheckpointStore,
    errors: &mut ErrorSink,
    report: &mut SynchroniseReport,
) -> Result<(), SyncError>
where
    R: RemoteLibrary + ?Sized,
{
    let mut items = std::mem::take(batch);
    info!(batch = report.batches + 1, items = items.len(), "[SYNC] Committing batch");
    let results = client.submit_batch(&mut items).await;
    report.batches += 1;

    for (item, result) in items.iter().zip(results) {
        let (kind, reason) = match result {
            PerItemResult::Created(key) => {
                debug!(id = item.source_id, key = %key, "[SYNC] Record migrated");
                checkpoint.record_success(item.source_id);
                report.succeeded += 1;
                continue;
            }
            PerItemResult::RetryableFailure(reason) => (FailureKind::Retryable, reason),
            PerItemResult::PermanentFailure(reason) => (FailureKind::Permanent, reason),
        };
        warn!(id = item.source_id, kind = %kind, reason = %reason, "[SYNC] Record failed remotely");
        checkpoint.record_failure(item.source_id, kind, reason.clone());
        errors.record(item.source_id, item.title(), kind, &reason);
        report.count_failure(item.source_id, kind);
    }

    if let Err(e) = checkpoint.flush() {
        error!(error = %e, "[SYNC][ERROR] Failed to persist checkpoint; aborting");
        return Err(e.into());
    }
    Ok(())
}

fn fail(
    checkpoint: &mut CheckpointStore,
    errors: &mut ErrorSink,
    report: &mut SynchroniseReport,
    id: i64,
    title: &str,
    err: &RecordError,
) {
    let kind = err.kind();
    warn!(id, kind = %kind, error = %err, "[SYNC] Record could not be prepared");
    checkpoint.record_failure(id, kind, err.to_string());
    errors.record(id, title, kind, &err.to_string());
    report.count_failure(id, kind);
}

/// Map every eligible record and write the would-be payloads to `output`.
///
/// No remote calls, no cloud calls, no checkpoint or errors-file writes.
/// Collections are shown as `<name>` placeholders.
pub async fn dry_run<S>(
    config: &SynchroniseConfig,
    store: &S,
    output: &mut DryRunWriter,
) -> Result<SynchroniseReport, SyncError>
where
    S: RecordStore + ?Sized,
{
    info!("[SYNC][DRYRUN] Starting dry run");
    let materializer = Materializer::new(config.strategy.clone(), None, true)?;
    let resolver = CollectionResolver::new(config.collections.clone());

    let names: Vec<String> = store
        .collection_names()
        .await?
        .into_iter()
        .filter(|n| config.collections.admits(n))
        .collect();
    output.write_collections(&names)?;

    let ids = store.list_ids(config.rowids.clone()).await?;
    let mut report = SynchroniseReport { considered: ids.len(), ..Default::default() };

    for id in ids {
        if config.max_pubs.is_some_and(|max| report.succeeded >= max) {
            break;
        }

        let outcome = prepare_offline(config, store, id, &resolver, &materializer).await;

        match outcome {
            Ok((record, item)) => {
                output.write_record(&record)?;
                output.write_item(&item)?;
                report.succeeded += 1;
            }
            Err(e) => {
                warn!(id, kind = %e.kind(), error = %e, "[SYNC][DRYRUN] Record would fail");
                report.count_failure(id, e.kind());
            }
        }
    }
    output.finish()?;

    let batch_size = config.batch_size.get();
    report.batches = report.succeeded.div_ceil(batch_size);
    info!(
        items = output.items(),
        would_fail = report.failed(),
        "[SYNC][DRYRUN] Dry run finished"
    );
    Ok(report)
}

async fn prepare_offline<S>(
    config: &SynchroniseConfig,
    store: &S,
    id: i64,
    resolver: &CollectionResolver,
    materializer: &Materializer<'_>,
) -> Result<(SourceRecord, NormalizedItem), RecordError>
where
    S: RecordStore + ?Sized,
{
    let record = store.get_record(id).await?;
    mapper::validate(&record)?;
    let collections = resolver.resolve_placeholders(&record.collections);
    let mut attachments = Vec::new();
    for (index, descriptor) in config.attachments.select(&record.attachments).into_iter().enumerate() {
        attachments.push(materializer.materialize(&record, index, descriptor).await?);
    }
    let item = mapper::map(&record, &config.mapping, collections, attachments)?;
    Ok((record, item))
}
