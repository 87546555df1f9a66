use papers2zotero_core::contract::RecordStore;
use papers2zotero_core::error::StoreError;
use papers2zotero_core::mapper::{map, KeywordTypes, LabelMap, MappingOptions};
use papers2zotero_core::papers2::Papers2Store;
use papers2zotero_core::record::{KeywordRef, KeywordType, Label, PubType};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const SCHEMA: &str = r#"
CREATE TABLE Publication (
    title TEXT, subtype INTEGER, uuid TEXT, doi TEXT, summary TEXT,
    imported_date REAL, publication_date TEXT, version TEXT, number TEXT,
    document_number TEXT, startpage TEXT, endpage TEXT, language TEXT,
    place TEXT, publisher TEXT, copyright TEXT, volume TEXT, bundle TEXT,
    bundle_string TEXT, citekey TEXT, rating INTEGER, notes TEXT,
    times_read INTEGER, label INTEGER, marked_deleted INTEGER, manuscript INTEGER
);
CREATE TABLE Author (prename TEXT, surname TEXT, institutional INTEGER);
CREATE TABLE OrderedAuthor (object_id INTEGER, author_id INTEGER, priority INTEGER, type INTEGER);
CREATE TABLE SyncEvent (device_id TEXT, source_id TEXT, remote_id TEXT, updated_at REAL);
CREATE TABLE Keyword (name TEXT);
CREATE TABLE KeywordItem (object_id INTEGER, keyword_id INTEGER, type INTEGER);
CREATE TABLE Collection (name TEXT, type INTEGER);
CREATE TABLE CollectionItem (object_id INTEGER, collection INTEGER);
CREATE TABLE Review (object_id INTEGER, content TEXT, rating INTEGER, is_mine INTEGER);
CREATE TABLE PDF (object_id INTEGER, path TEXT, mime_type TEXT, is_primary INTEGER);
"#;

const ROWS: &[&str] = &[
    // 1: a journal, the bundle of publication 2.
    "INSERT INTO Publication (ROWID, title, subtype) VALUES (1, 'Journal of Neuroscience', -100)",
    "INSERT INTO Publication (ROWID, title, subtype, uuid, doi, publication_date, startpage, endpage, \
     language, volume, bundle, bundle_string, citekey, rating, notes, times_read, label) \
     VALUES (2, 'Neural Correlates', 400, 'UUID-2', '10.1/abc', '99200803151200000000222000', \
     '101', '110', 'en', '28', '1', 'J Neurosci', 'Abe:2008', 3, 'Worth rereading', 2, 6)",
    "INSERT INTO Publication (ROWID, title, subtype, marked_deleted) VALUES (3, 'Deleted', 400, 1)",
    "INSERT INTO Publication (ROWID, title, subtype, manuscript) VALUES (4, 'My draft', 400, 1)",
    "INSERT INTO Publication (ROWID, title, subtype, label) VALUES (5, 'A Book', 0, 5)",
    "INSERT INTO Author (ROWID, prename, surname, institutional) VALUES (1, 'Nobuhito', 'Abe', 0), \
     (2, NULL, 'Allen Institute', 1), (3, 'Ed', 'Itor', 0)",
    "INSERT INTO OrderedAuthor (object_id, author_id, priority, type) VALUES \
     (2, 2, 1, 0), (2, 1, 0, 0), (2, 3, 2, 1)",
    "INSERT INTO SyncEvent (device_id, source_id, remote_id, updated_at) VALUES \
     ('UUID-2', 'gov.nih.nlm.ncbi.pubmed', '18000001', 1), \
     ('UUID-2', 'org.iso.issn', '0270-6474', 1), \
     ('UUID-2', 'com.example.web', 'http://old.example/a', 1), \
     ('UUID-2', 'com.example.web', 'https://new.example/a', 2)",
    "INSERT INTO Keyword (ROWID, name) VALUES (1, 'memory'), (2, 'fMRI')",
    "INSERT INTO KeywordItem (object_id, keyword_id, type) VALUES (2, 2, 0), (2, 1, 99)",
    "INSERT INTO Collection (ROWID, name, type) VALUES (1, 'Neuro', 0), (2, 'Smart', 3), (3, 'Projects', 5)",
    "INSERT INTO CollectionItem (object_id, collection) VALUES (2, 1), (2, 2), (2, 3)",
    "INSERT INTO Review (object_id, content, rating, is_mine) VALUES (2, 'Solid method.', 4, 1), \
     (2, 'Not mine', 1, 0)",
    "INSERT INTO PDF (object_id, path, mime_type, is_primary) VALUES \
     (2, 'Articles/Abe/Abe Nobuhito/Supplemental/figs.pdf', 'application/pdf', 0), \
     (2, 'Articles/Abe/Abe Nobuhito/Abe 2008.pdf', 'application/pdf', 1)",
];

async fn fixture(folder: &Path) -> PathBuf {
    let db = Papers2Store::database_path(folder);
    std::fs::create_dir_all(db.parent().expect("database folder")).expect("create library folder");
    let options = SqliteConnectOptions::new().filename(&db).create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("create fixture database");
    sqlx::raw_sql(SCHEMA).execute(&pool).await.expect("create schema");
    for row in ROWS {
        sqlx::query(row).execute(&pool).await.expect("insert fixture row");
    }
    pool.close().await;
    db
}

#[tokio::test]
async fn lists_only_live_publications_of_known_types() {
    let dir = tempdir().expect("tempdir");
    fixture(dir.path()).await;
    let store = Papers2Store::open(dir.path()).await.expect("open store");

    assert_eq!(store.list_ids(None).await.expect("list"), vec![2, 5]);
    assert_eq!(store.list_ids(Some(vec![5, 3])).await.expect("list"), vec![5]);
    assert_eq!(
        store.collection_names().await.expect("collections"),
        vec!["Neuro".to_string(), "Projects".to_string()]
    );
}

#[tokio::test]
async fn loads_a_full_publication() {
    let dir = tempdir().expect("tempdir");
    fixture(dir.path()).await;
    let store = Papers2Store::open(dir.path()).await.expect("open store");

    let record = store.get_record(2).await.expect("record 2");
    assert_eq!(record.pub_type, PubType::JournalArticle);
    assert_eq!(record.title.as_deref(), Some("Neural Correlates"));
    assert_eq!(record.metadata.bundle_title.as_deref(), Some("Journal of Neuroscience"));
    assert_eq!(record.metadata.bundle_abbreviation.as_deref(), Some("J Neurosci"));
    assert_eq!(record.metadata.isbn, vec!["0270-6474".to_string()]);
    assert_eq!(record.metadata.pubmed_ids, vec!["18000001".to_string()]);
    assert_eq!(
        record.metadata.urls,
        vec!["https://new.example/a".to_string(), "http://old.example/a".to_string()]
    );

    let surnames: Vec<_> = record.creators.iter().filter_map(|c| c.surname.as_deref()).collect();
    assert_eq!(surnames, vec!["Abe", "Allen Institute", "Itor"]);
    assert!(record.creators[1].institutional);
    assert_eq!(record.creators[2].role, 1);

    assert_eq!(
        record.keywords,
        vec![
            KeywordRef::User("memory".into()),
            KeywordRef::Auto("fMRI".into()),
            KeywordRef::Label(Label::Purple),
        ]
    );
    let collections: Vec<_> = record.collections.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(collections, vec!["Neuro", "Projects"]);
    assert_eq!(record.reviews.len(), 1);

    assert_eq!(record.attachments.len(), 2);
    assert!(record.attachments[0].primary);
    assert!(record.attachments.iter().all(|a| a.read));
    assert_eq!(
        record.attachments[0].path,
        dir.path().join("Articles/Abe/Abe Nobuhito/Abe 2008.pdf")
    );
}

#[tokio::test]
async fn unknown_subtype_and_missing_row_are_distinguished() {
    let dir = tempdir().expect("tempdir");
    fixture(dir.path()).await;
    let store = Papers2Store::open(dir.path()).await.expect("open store");

    assert!(matches!(
        store.get_record(1).await,
        Err(StoreError::UnknownPubType { id: 1, subtype: -100 })
    ));
    assert!(matches!(store.get_record(99).await, Err(StoreError::NotFound(99))));
}

#[tokio::test]
async fn keywords_and_labels_become_tags() {
    let dir = tempdir().expect("tempdir");
    fixture(dir.path()).await;
    let store = Papers2Store::open(dir.path()).await.expect("open store");

    let options = MappingOptions {
        keyword_types: KeywordTypes::all(),
        label_map: LabelMap::parse("Purple=PriorityCurrent", LabelMap::DEFAULT_PREFIX)
            .expect("label map"),
    };
    let record = store.get_record(2).await.expect("record 2");
    let item = map(&record, &options, vec![], vec![]).expect("map record 2");
    let tags = item.tag_names();
    for expected in ["memory", "fMRI", "PriorityCurrent", "C:Neuro", "C:Projects", "&cited", "⭐⭐⭐"] {
        assert!(tags.contains(expected), "missing tag {expected}: {tags:?}");
    }
    let auto = item.tags.iter().find(|t| t.tag == "fMRI").expect("auto tag");
    assert_eq!(auto.kind, Some(1));
    assert_eq!(item.notes.len(), 2);

    let book = store.get_record(5).await.expect("record 5");
    let item = map(&book, &options, vec![], vec![]).expect("map record 5");
    assert!(item.tag_names().contains("LabelBlue"));

    let user_only = MappingOptions {
        keyword_types: KeywordTypes::from_types([KeywordType::User]),
        ..options
    };
    let item = map(&record, &user_only, vec![], vec![]).expect("map record 2");
    assert!(item.tag_names().contains("memory"));
    assert!(!item.tag_names().contains("fMRI"));
    assert!(!item.tag_names().contains("PriorityCurrent"));
}
