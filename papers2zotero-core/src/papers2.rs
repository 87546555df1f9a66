//! Read-only [`RecordStore`] over a Papers2 library database.
//!
//! The database lives at `<folder>/Library.papers2/Database.papersdb`. Papers2
//! is loose about column types, so every selected column is cast to the type
//! we decode it as.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{query, Row, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::contract::RecordStore;
use crate::error::StoreError;
use crate::record::{
    AttachmentDescriptor, CollectionRef, CreatorRef, KeywordRef, Label, Metadata, PubType, Review,
    SourceRecord,
};

/// `KeywordItem.type` values.
const KEYWORD_AUTO: i64 = 0;
const KEYWORD_USER: i64 = 99;

/// `SyncEvent.source_id` values for external identifiers.
const PUBMED_SOURCES: [&str; 2] = ["gov.nih.nlm.ncbi.pubmed", "gov.nih.nlm.ncbi.pmc"];
const ISBN_SOURCES: [&str; 2] = ["org.iso.isbn", "org.iso.issn"];

pub struct Papers2Store {
    pool: SqlitePool,
    folder: PathBuf,
}

impl Papers2Store {
    pub fn database_path(folder: &Path) -> PathBuf {
        folder.join("Library.papers2").join("Database.papersdb")
    }

    /// Open the library in `folder` read-only.
    pub async fn open(folder: impl AsRef<Path>) -> Result<Self, StoreError> {
        let folder = folder.as_ref().to_path_buf();
        let db = Self::database_path(&folder);
        info!(database = %db.display(), "[PAPERS2] Opening library database");

        let options = SqliteConnectOptions::new().filename(&db).read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool, folder })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    async fn authors(&self, id: i64) -> Result<Vec<CreatorRef>, StoreError> {
        let rows = query(
            r#"
            SELECT CAST(a.prename AS TEXT) AS prename,
                   CAST(a.surname AS TEXT) AS surname,
                   CAST(IFNULL(a.institutional, 0) AS INTEGER) AS institutional,
                   CAST(IFNULL(oa.type, 0) AS INTEGER) AS role
            FROM OrderedAuthor oa
            JOIN Author a ON a.ROWID = oa.author_id
            WHERE oa.object_id = ?
            ORDER BY oa.priority
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<CreatorRef, StoreError> {
                Ok(CreatorRef {
                    prename: row.try_get("prename")?,
                    surname: row.try_get("surname")?,
                    institutional: row.try_get::<i64, _>("institutional")? > 0,
                    role: row.try_get("role")?,
                })
            })
            .collect()
    }

    async fn identifiers(&self, uuid: &str, sources: [&str; 2]) -> Result<Vec<String>, StoreError> {
        let rows = query(
            r#"
            SELECT CAST(remote_id AS TEXT) AS remote_id
            FROM SyncEvent
            WHERE device_id = ? AND source_id IN (?, ?) AND remote_id IS NOT NULL
            ORDER BY ROWID
            "#,
        )
        .bind(uuid)
        .bind(sources[0])
        .bind(sources[1])
        .fetch_all(&self.pool)
        .await?;
        strings(&rows, "remote_id")
    }

    async fn urls(&self, uuid: &str) -> Result<Vec<String>, StoreError> {
        let rows = query(
            r#"
            SELECT CAST(remote_id AS TEXT) AS remote_id
            FROM SyncEvent
            WHERE device_id = ? AND remote_id LIKE 'http%'
            ORDER BY updated_at DESC
            "#,
        )
        .bind(uuid)
        .fetch_all(&self.pool)
        .await?;
        strings(&rows, "remote_id")
    }

    async fn keywords(&self, id: i64, kind: i64) -> Result<Vec<String>, StoreError> {
        let rows = query(
            r#"
            SELECT CAST(k.name AS TEXT) AS name
            FROM KeywordItem ki
            JOIN Keyword k ON k.ROWID = ki.keyword_id
            WHERE ki.object_id = ? AND ki.type = ? AND k.name IS NOT NULL
            ORDER BY ki.ROWID
            "#,
        )
        .bind(id)
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;
        strings(&rows, "name")
    }

    async fn collections(&self, id: i64) -> Result<Vec<CollectionRef>, StoreError> {
        let rows = query(
            r#"
            SELECT CAST(c.name AS TEXT) AS name
            FROM CollectionItem ci
            JOIN Collection c ON c.ROWID = ci.collection
            WHERE ci.object_id = ? AND c.type IN (0, 5) AND c.name IS NOT NULL
            ORDER BY c.ROWID
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(strings(&rows, "name")?.into_iter().map(CollectionRef::new).collect())
    }

    async fn reviews(&self, id: i64) -> Result<Vec<Review>, StoreError> {
        let rows = query(
            r#"
            SELECT CAST(IFNULL(content, '') AS TEXT) AS content,
                   CAST(IFNULL(rating, 0) AS INTEGER) AS rating
            FROM Review
            WHERE object_id = ? AND is_mine = 1
            ORDER BY ROWID
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<Review, StoreError> {
                Ok(Review { content: row.try_get("content")?, rating: row.try_get("rating")? })
            })
            .collect()
    }

    async fn attachments(&self, id: i64, read: bool) -> Result<Vec<AttachmentDescriptor>, StoreError> {
        let rows = query(
            r#"
            SELECT CAST(path AS TEXT) AS path,
                   CAST(mime_type AS TEXT) AS mime_type,
                   CAST(IFNULL(is_primary, 0) AS INTEGER) AS is_primary
            FROM PDF
            WHERE object_id = ? AND path IS NOT NULL
            ORDER BY is_primary DESC, ROWID
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<AttachmentDescriptor, StoreError> {
                let relative: String = row.try_get("path")?;
                Ok(AttachmentDescriptor {
                    path: self.folder.join(&relative),
                    relative_path: PathBuf::from(relative),
                    mime_type: row.try_get("mime_type")?,
                    read,
                    primary: row.try_get::<i64, _>("is_primary")? > 0,
                })
            })
            .collect()
    }

    async fn bundle_title(&self, bundle: Option<&str>) -> Result<Option<String>, StoreError> {
        let Some(bundle_id) = bundle.and_then(|b| b.trim().parse::<i64>().ok()) else {
            return Ok(None);
        };
        let row = query("SELECT CAST(title AS TEXT) AS title FROM Publication WHERE ROWID = ?")
            .bind(bundle_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.try_get("title")?),
            None => Ok(None),
        }
    }
}

fn strings(rows: &[SqliteRow], column: &str) -> Result<Vec<String>, StoreError> {
    rows.iter()
        .map(|row| row.try_get::<String, _>(column).map_err(StoreError::from))
        .collect()
}

fn known_subtypes() -> String {
    PubType::ALL
        .iter()
        .map(|t| t.subtype().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl RecordStore for Papers2Store {
    async fn list_ids(&self, rowids: Option<Vec<i64>>) -> Result<Vec<i64>, StoreError> {
        let sql = format!(
            "SELECT ROWID AS id FROM Publication \
             WHERE subtype IN ({}) \
               AND IFNULL(marked_deleted, 0) = 0 \
               AND IFNULL(manuscript, 0) = 0 \
             ORDER BY ROWID",
            known_subtypes()
        );
        let rows = query(&sql).fetch_all(&self.pool).await?;
        let mut ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(wanted) = rowids {
            ids.retain(|id| wanted.contains(id));
        }
        debug!(count = ids.len(), "[PAPERS2] Listed eligible publications");
        Ok(ids)
    }

    async fn get_record(&self, id: i64) -> Result<SourceRecord, StoreError> {
        let row = query(
            r#"
            SELECT CAST(title AS TEXT) AS title,
                   CAST(subtype AS INTEGER) AS subtype,
                   CAST(uuid AS TEXT) AS uuid,
                   CAST(doi AS TEXT) AS doi,
                   CAST(summary AS TEXT) AS summary,
                   CAST(imported_date AS REAL) AS imported_date,
                   CAST(publication_date AS TEXT) AS publication_date,
                   CAST(version AS TEXT) AS version,
                   CAST(number AS TEXT) AS number,
                   CAST(document_number AS TEXT) AS document_number,
                   CAST(startpage AS TEXT) AS startpage,
                   CAST(endpage AS TEXT) AS endpage,
                   CAST(language AS TEXT) AS language,
                   CAST(place AS TEXT) AS place,
                   CAST(publisher AS TEXT) AS publisher,
                   CAST(copyright AS TEXT) AS copyright,
                   CAST(volume AS TEXT) AS volume,
                   CAST(bundle AS TEXT) AS bundle,
                   CAST(bundle_string AS TEXT) AS bundle_string,
                   CAST(citekey AS TEXT) AS citekey,
                   CAST(IFNULL(rating, 0) AS INTEGER) AS rating,
                   CAST(notes AS TEXT) AS notes,
                   CAST(IFNULL(times_read, 0) AS INTEGER) AS times_read,
                   CAST(IFNULL(label, 0) AS INTEGER) AS label
            FROM Publication
            WHERE ROWID = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let subtype: i64 = row.try_get("subtype")?;
        let pub_type =
            PubType::from_subtype(subtype).ok_or(StoreError::UnknownPubType { id, subtype })?;
        let uuid: Option<String> = row.try_get("uuid")?;
        let bundle: Option<String> = row.try_get("bundle")?;

        let (isbn, pubmed_ids, urls) = match uuid.as_deref() {
            Some(uuid) => (
                self.identifiers(uuid, ISBN_SOURCES).await?,
                self.identifiers(uuid, PUBMED_SOURCES).await?,
                self.urls(uuid).await?,
            ),
            None => (Vec::new(), Vec::new(), Vec::new()),
        };

        let metadata = Metadata {
            doi: row.try_get("doi")?,
            summary: row.try_get("summary")?,
            imported_date: row.try_get("imported_date")?,
            publication_date: row.try_get("publication_date")?,
            version: row.try_get("version")?,
            number: row.try_get("number")?,
            document_number: row.try_get("document_number")?,
            start_page: row.try_get("startpage")?,
            end_page: row.try_get("endpage")?,
            language: row.try_get("language")?,
            place: row.try_get("place")?,
            publisher: row.try_get("publisher")?,
            copyright: row.try_get("copyright")?,
            volume: row.try_get("volume")?,
            bundle_title: self.bundle_title(bundle.as_deref()).await?,
            bundle_abbreviation: row.try_get("bundle_string")?,
            isbn,
            pubmed_ids,
            urls,
        };

        let mut keywords: Vec<KeywordRef> = self
            .keywords(id, KEYWORD_USER)
            .await?
            .into_iter()
            .map(KeywordRef::User)
            .collect();
        keywords.extend(self.keywords(id, KEYWORD_AUTO).await?.into_iter().map(KeywordRef::Auto));
        match Label::from_num(row.try_get("label")?) {
            Some(Label::None) | None => {}
            Some(label) => keywords.push(KeywordRef::Label(label)),
        }

        let times_read: i64 = row.try_get("times_read")?;
        let record = SourceRecord {
            id,
            pub_type,
            title: row.try_get("title")?,
            metadata,
            creators: self.authors(id).await?,
            citekey: row.try_get("citekey")?,
            rating: row.try_get("rating")?,
            notes: row.try_get("notes")?,
            reviews: self.reviews(id).await?,
            keywords,
            collections: self.collections(id).await?,
            attachments: self.attachments(id, times_read > 0).await?,
        };
        debug!(id, title = record.display_title(), "[PAPERS2] Loaded publication");
        Ok(record)
    }

    async fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        let rows = query(
            "SELECT CAST(name AS TEXT) AS name FROM Collection \
             WHERE type IN (0, 5) AND name IS NOT NULL ORDER BY ROWID",
        )
        .fetch_all(&self.pool)
        .await?;
        strings(&rows, "name")
    }
}
