use papers2zotero_core::attachments::{AttachmentMode, AttachmentStrategy};
use papers2zotero_core::checkpoint::CheckpointStore;
use papers2zotero_core::config::{BatchSize, SynchroniseConfig};
use papers2zotero_core::contract::{
    CloudObject, MockCloudProvider, MockRecordStore, MockRemoteLibrary, RemoteCollection,
    WriteFailure, WriteResponse,
};
use papers2zotero_core::dryrun::DryRunWriter;
use papers2zotero_core::error::{RemoteError, StoreError};
use papers2zotero_core::error_sink::ErrorSink;
use papers2zotero_core::mapper::remote_key;
use papers2zotero_core::record::{AttachmentDescriptor, CollectionRef, PubType, SourceRecord};
use papers2zotero_core::synchronise::{dry_run, synchronise};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn paper(id: i64) -> SourceRecord {
    SourceRecord::new(id, PubType::JournalArticle, format!("Paper {id}"))
}

fn store_of(records: Vec<SourceRecord>) -> MockRecordStore {
    let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
    let mut store = MockRecordStore::new();
    store
        .expect_list_ids()
        .returning(move |_| Ok(ids.clone()));
    store.expect_get_record().returning(move |id| {
        records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    });
    store
}

fn keys(payload: &[Value]) -> Vec<String> {
    payload
        .iter()
        .map(|p| p["key"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Accept every object except the items of `rejected` records, which fail with 400.
fn respond(payload: &[Value], rejected: &[i64]) -> WriteResponse {
    let rejected: Vec<String> = rejected.iter().map(|id| remote_key(*id, "item")).collect();
    let mut response = WriteResponse::default();
    for (i, key) in keys(payload).into_iter().enumerate() {
        if rejected.contains(&key) {
            response.failed.insert(i, WriteFailure { code: 400, message: "invalid field".into() });
        } else {
            response.success.insert(i, key);
        }
    }
    response
}

fn remote_accepting(rejected: Vec<i64>) -> MockRemoteLibrary {
    let mut remote = MockRemoteLibrary::new();
    remote
        .expect_item_template()
        .returning(|_| Ok(vec!["title".into(), "creators".into(), "date".into()]));
    remote
        .expect_create_items()
        .returning(move |payload| Ok(respond(&payload, &rejected)));
    remote
}

fn config(batch_size: usize) -> SynchroniseConfig {
    SynchroniseConfig {
        batch_size: BatchSize::new(batch_size).expect("valid batch size"),
        ..Default::default()
    }
}

struct Ledger {
    _dir: tempfile::TempDir,
    checkpoint: PathBuf,
    errors: PathBuf,
}

impl Ledger {
    fn new() -> Self {
        let dir = tempdir().expect("tempdir");
        let checkpoint = dir.path().join("checkpoint.jsonl");
        let errors = dir.path().join("errors.txt");
        Self { _dir: dir, checkpoint, errors }
    }

    fn checkpoint(&self, retry: bool) -> CheckpointStore {
        CheckpointStore::open(&self.checkpoint, retry).expect("open checkpoint")
    }

    fn errors(&self) -> ErrorSink {
        ErrorSink::open(&self.errors).expect("open errors file")
    }

    fn error_lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.errors)
            .unwrap_or_default()
            .lines()
            .filter(|l| !l.contains("| RUN |"))
            .map(str::to_string)
            .collect()
    }
}

#[tokio::test]
async fn permanent_failure_is_checkpointed_and_retried_on_request() {
    let ledger = Ledger::new();
    let records = vec![paper(1), paper(2), paper(3)];

    // First run: record 3 (alone in batch 2) is rejected by the remote.
    let store = store_of(records.clone());
    let mut remote = remote_accepting(vec![3]);
    remote.expect_list_collections().never();
    let mut checkpoint = ledger.checkpoint(false);
    let mut errors = ledger.errors();
    let report = synchronise(&config(2), &store, &remote, None, &mut checkpoint, &mut errors)
        .await
        .expect("run completes");

    assert_eq!(report.considered, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed_permanent, 1);
    assert_eq!(report.batches, 2);
    assert_eq!(report.failed_ids, vec![3]);
    assert!(report.has_permanent_failures());

    let lines = ledger.error_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("PERMANENT | record 3 (Paper 3)"), "{}", lines[0]);

    let reopened = ledger.checkpoint(false);
    assert!(reopened.is_succeeded(1));
    assert!(reopened.is_succeeded(2));
    assert!(reopened.is_failed_permanently(3));

    // Second run without retry: nothing is sent, the permanent failure still counts.
    let store = store_of(records.clone());
    let mut remote = MockRemoteLibrary::new();
    remote.expect_create_items().never();
    let mut checkpoint = ledger.checkpoint(false);
    let mut errors = ledger.errors();
    let report = synchronise(&config(2), &store, &remote, None, &mut checkpoint, &mut errors)
        .await
        .expect("run completes");
    assert_eq!(report.skipped_done, 2);
    assert_eq!(report.skipped_failed, 1);
    assert_eq!(report.skipped_failed_permanent, 1);
    assert_eq!(report.batches, 0);
    assert!(report.has_permanent_failures());

    // Third run with retry: only record 3 is resubmitted and now succeeds.
    let store = store_of(records);
    let mut remote = MockRemoteLibrary::new();
    remote
        .expect_item_template()
        .returning(|_| Ok(vec!["title".into()]));
    remote
        .expect_create_items()
        .times(1)
        .withf(|payload| keys(payload) == vec![remote_key(3, "item")])
        .returning(|payload| Ok(respond(&payload, &[])));
    let mut checkpoint = ledger.checkpoint(true);
    let mut errors = ledger.errors();
    let report = synchronise(&config(2), &store, &remote, None, &mut checkpoint, &mut errors)
        .await
        .expect("run completes");
    assert_eq!(report.skipped_done, 2);
    assert_eq!(report.succeeded, 1);
    assert!(!report.has_permanent_failures());

    let reopened = ledger.checkpoint(false);
    assert_eq!(reopened.succeeded_count(), 3);
    assert_eq!(reopened.failed_count(), 0);
}

#[tokio::test]
async fn invalid_record_fails_before_any_remote_write() {
    let ledger = Ledger::new();
    let mut untitled = paper(2);
    untitled.title = Some("  ".into());
    let store = store_of(vec![paper(1), untitled, paper(3)]);

    let mut remote = MockRemoteLibrary::new();
    remote
        .expect_item_template()
        .returning(|_| Ok(vec!["title".into()]));
    remote
        .expect_create_items()
        .times(1)
        .withf(|payload| keys(payload) == vec![remote_key(1, "item"), remote_key(3, "item")])
        .returning(|payload| Ok(respond(&payload, &[])));

    let mut checkpoint = ledger.checkpoint(false);
    let mut errors = ledger.errors();
    let report = synchronise(&config(50), &store, &remote, None, &mut checkpoint, &mut errors)
        .await
        .expect("run completes");

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed_permanent, 1);
    assert_eq!(report.batches, 1);
    assert!(checkpoint.is_failed_permanently(2));
    assert_eq!(errors.entries(), 1);
}

#[tokio::test]
async fn retryable_batch_error_is_not_a_permanent_failure() {
    let ledger = Ledger::new();
    let store = store_of(vec![paper(1), paper(2)]);
    let mut remote = MockRemoteLibrary::new();
    remote
        .expect_item_template()
        .returning(|_| Ok(vec!["title".into()]));
    remote.expect_create_items().times(1).returning(|_| {
        Err(RemoteError::Server { status: 503, message: "maintenance".into() })
    });

    let mut checkpoint = ledger.checkpoint(false);
    let mut errors = ledger.errors();
    let report = synchronise(&config(50), &store, &remote, None, &mut checkpoint, &mut errors)
        .await
        .expect("run completes");

    assert_eq!(report.failed_retryable, 2);
    assert!(!report.has_permanent_failures());
    let reopened = ledger.checkpoint(false);
    assert!(reopened.is_failed(1) && !reopened.is_failed_permanently(1));
    assert!(!ledger.checkpoint(true).is_done(1));
}

#[tokio::test]
async fn max_pubs_counts_records_added_to_batches() {
    let ledger = Ledger::new();
    let mut records: Vec<SourceRecord> = (1..=5).map(paper).collect();
    records[0].title = None;
    let store = store_of(records);
    let remote = remote_accepting(vec![]);

    let mut config = config(50);
    config.max_pubs = Some(2);
    let mut checkpoint = ledger.checkpoint(false);
    let mut errors = ErrorSink::disabled();
    let report = synchronise(&config, &store, &remote, None, &mut checkpoint, &mut errors)
        .await
        .expect("run completes");

    assert_eq!(report.failed_permanent, 1);
    assert_eq!(report.succeeded, 2);
    assert!(checkpoint.is_succeeded(3));
    assert!(!checkpoint.is_done(4));
}

#[tokio::test]
async fn collections_are_created_once_and_notes_follow_their_parent() {
    let ledger = Ledger::new();
    let mut first = paper(1);
    first.collections = vec![CollectionRef::new("Neuro")];
    first.notes = Some("Read again".into());
    let mut second = paper(2);
    second.collections = vec![CollectionRef::new("Neuro"), CollectionRef::new("Existing")];
    let store = store_of(vec![first, second]);

    let mut remote = MockRemoteLibrary::new();
    remote
        .expect_item_template()
        .returning(|_| Ok(vec!["title".into()]));
    remote.expect_list_collections().times(1).returning(|| {
        Ok(vec![RemoteCollection { key: "EXIST222".into(), name: "Existing".into() }])
    });
    remote
        .expect_create_collection()
        .times(1)
        .withf(|name| name.to_string() == "Neuro")
        .returning(|name| Ok(RemoteCollection { key: "NEURO222".into(), name: name.to_string() }));

    let item_keys = vec![remote_key(1, "item"), remote_key(2, "item")];
    remote
        .expect_create_items()
        .times(1)
        .withf(move |payload| {
            keys(payload) == item_keys
                && payload[0]["collections"] == serde_json::json!(["NEURO222"])
                && payload[1]["collections"] == serde_json::json!(["NEURO222", "EXIST222"])
                && payload[0]["version"] == 0
        })
        .returning(|payload| Ok(respond(&payload, &[])));
    remote
        .expect_create_items()
        .times(1)
        .withf(|payload| {
            payload.len() == 1
                && payload[0]["itemType"] == "note"
                && payload[0]["parentItem"] == remote_key(1, "item").as_str()
                && payload[0]["note"] == "Read again"
        })
        .returning(|payload| Ok(respond(&payload, &[])));

    let mut checkpoint = ledger.checkpoint(false);
    let mut errors = ErrorSink::disabled();
    let report = synchronise(&config(50), &store, &remote, None, &mut checkpoint, &mut errors)
        .await
        .expect("run completes");
    assert_eq!(report.succeeded, 2);
}

#[tokio::test]
async fn cloud_move_reuses_object_already_at_target() {
    let ledger = Ledger::new();
    let mut record = paper(7);
    record.attachments = vec![AttachmentDescriptor {
        path: PathBuf::from("/library/Articles/Abe/Abe Nobuhito/Abe 2008.pdf"),
        relative_path: PathBuf::from("Articles/Abe/Abe Nobuhito/Abe 2008.pdf"),
        mime_type: Some("application/pdf".into()),
        read: true,
        primary: true,
    }];
    let store = store_of(vec![record]);

    let mut cloud = MockCloudProvider::new();
    cloud
        .expect_locate()
        .withf(|path| path.to_string() == "/Papers2/Articles/Abe/Abe Nobuhito/Abe 2008.pdf")
        .returning(|_| Ok(None));
    cloud
        .expect_locate()
        .withf(|path| path.to_string() == "/Zotero/Journal Article/A/Abe Nobuhito/Abe 2008.pdf")
        .returning(|path| {
            Ok(Some(CloudObject { id: "drive-1".into(), name: "Abe 2008.pdf".into(), path: path.to_string() }))
        });
    cloud.expect_move_to_folder().never();
    cloud
        .expect_shareable_reference()
        .returning(|object| Ok(format!("https://drive.example/{}", object.id)));

    let mut remote = MockRemoteLibrary::new();
    remote
        .expect_item_template()
        .returning(|_| Ok(vec!["title".into()]));
    remote
        .expect_create_items()
        .withf(|payload| payload[0]["itemType"] == "journalArticle")
        .times(1)
        .returning(|payload| Ok(respond(&payload, &[])));
    remote
        .expect_create_items()
        .times(1)
        .withf(|payload| {
            payload[0]["itemType"] == "attachment"
                && payload[0]["linkMode"] == "linked_file"
                && payload[0]["path"] == "attachments:Journal Article/A/Abe Nobuhito/Abe 2008.pdf"
                && payload[0]["url"] == "https://drive.example/drive-1"
        })
        .returning(|payload| Ok(respond(&payload, &[])));
    remote.expect_upload_file().never();

    let mut config = config(50);
    config.strategy = AttachmentStrategy::CloudMove {
        base: PathBuf::from("/home/me/Zotero-files"),
        source_root: "/Papers2".into(),
        target_root: "/Zotero".into(),
    };
    let mut checkpoint = ledger.checkpoint(false);
    let mut errors = ErrorSink::disabled();
    let report = synchronise(&config, &store, &remote, Some(&cloud), &mut checkpoint, &mut errors)
        .await
        .expect("run completes");
    assert_eq!(report.succeeded, 1);
}

#[tokio::test]
async fn missing_attachment_file_fails_the_record_permanently() {
    let ledger = Ledger::new();
    let mut record = paper(8);
    record.attachments = vec![AttachmentDescriptor {
        path: Path::new("/definitely/not/here.pdf").to_path_buf(),
        relative_path: PathBuf::from("Articles/N/Nobody/here.pdf"),
        mime_type: None,
        read: false,
        primary: true,
    }];
    let store = store_of(vec![record]);
    let mut remote = MockRemoteLibrary::new();
    remote.expect_create_items().never();

    let mut checkpoint = ledger.checkpoint(false);
    let mut errors = ledger.errors();
    let report = synchronise(&config(50), &store, &remote, None, &mut checkpoint, &mut errors)
        .await
        .expect("run completes");
    assert_eq!(report.failed_permanent, 1);
    assert!(ledger.error_lines()[0].contains("record 8"));

    // With attachments disabled the same record migrates.
    let ledger = Ledger::new();
    let mut config = config(50);
    config.attachments = AttachmentMode::None;
    let remote = remote_accepting(vec![]);
    let mut checkpoint = ledger.checkpoint(false);
    let report = synchronise(&config, &store, &remote, None, &mut checkpoint, &mut errors)
        .await
        .expect("run completes");
    assert_eq!(report.succeeded, 1);
}

#[tokio::test]
async fn dry_run_writes_payloads_without_remote_or_checkpoint() {
    let dir = tempdir().expect("tempdir");
    let out = dir.path().join("dryrun.txt");
    let mut record = paper(1);
    record.collections = vec![CollectionRef::new("Neuro")];
    let mut store = store_of(vec![record, paper(2)]);
    store
        .expect_collection_names()
        .returning(|| Ok(vec!["Neuro".into(), "Unused".into()]));

    let mut writer = DryRunWriter::create(&out).expect("create output");
    let report = dry_run(&config(1), &store, &mut writer).await.expect("dry run");
    drop(writer);

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.batches, 2);
    let text = std::fs::read_to_string(&out).expect("read output");
    assert!(text.starts_with("COLLECTIONS: [\"Neuro\",\"Unused\"]"));
    assert!(text.contains("RECORD 1:"));
    assert!(text.contains(&format!("ITEM 2 ({}):", remote_key(2, "item"))));
    assert!(text.contains("<Neuro>"));
    assert!(!dir.path().join("checkpoint.jsonl").exists());
}
