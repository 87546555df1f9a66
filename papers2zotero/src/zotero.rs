#![doc = "Zotero Web API v3 client: the RemoteLibrary implementation used by the CLI."]
//
//! # Zotero client
//!
//! Implements [`RemoteLibrary`] over `reqwest`. Every request carries
//! `Zotero-API-Key` and `Zotero-API-Version: 3`; library-scoped paths are
//! prefixed with `/users/<id>` or `/groups/<id>`.
//!
//! HTTP outcomes are mapped onto [`RemoteError`] with
//! [`RemoteError::from_status`], so the core sees only the retryable/permanent
//! classification. There is no automatic retry here: retries happen across
//! runs through the checkpoint.

use async_trait::async_trait;
use papers2zotero_core::contract::{RemoteCollection, RemoteLibrary, WriteResponse};
use papers2zotero_core::error::RemoteError;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, IF_NONE_MATCH, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::load_config::RemoteSettings;

pub const DEFAULT_BASE_URL: &str = "https://api.zotero.org";
const API_VERSION: &str = "3";
const PAGE_SIZE: usize = 100;

pub struct ZoteroClient {
    http: reqwest::Client,
    base_url: String,
    prefix: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct CollectionEntry {
    key: String,
    data: CollectionData,
}

#[derive(Debug, Deserialize)]
struct CollectionData {
    name: String,
}

/// Reply to an upload authorization request.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UploadAuthorization {
    Exists {
        #[allow(dead_code)]
        exists: u8,
    },
    Upload {
        url: String,
        #[serde(rename = "contentType")]
        content_type: String,
        prefix: String,
        suffix: String,
        #[serde(rename = "uploadKey")]
        upload_key: String,
    },
}

fn transport(e: reqwest::Error) -> RemoteError {
    RemoteError::Transport(e.to_string())
}

fn decode(e: impl std::fmt::Display) -> RemoteError {
    RemoteError::Decode(e.to_string())
}

impl ZoteroClient {
    pub fn new(settings: &RemoteSettings) -> Result<Self, RemoteError> {
        Self::with_base_url(settings, &settings.api_url)
    }

    /// Point the client at another API root (tests use a mock server).
    pub fn with_base_url(settings: &RemoteSettings, base_url: &str) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("papers2zotero/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(transport)?;
        let prefix = format!("/{}/{}", settings.library_type.segment(), settings.library_id);
        info!(
            base_url,
            library = %prefix,
            api_key_set = !settings.api_key.is_empty(),
            "Initialized ZoteroClient"
        );
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            prefix,
            api_key: settings.api_key.clone(),
        })
    }

    fn library_url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, self.prefix, path)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("Zotero-API-Key", &self.api_key)
            .header("Zotero-API-Version", API_VERSION)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "Zotero API request failed");
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RemoteError::RateLimited { retry_after });
        }
        Err(RemoteError::from_status(status.as_u16(), body))
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
        let text = response.text().await.map_err(transport)?;
        serde_json::from_str(&text).map_err(decode)
    }
}

fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .or_else(|| headers.get("Backoff"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[async_trait]
impl RemoteLibrary for ZoteroClient {
    async fn item_template(&self, item_type: &str) -> Result<Vec<String>, RemoteError> {
        let url = format!("{}/items/new", self.base_url);
        let response = self
            .send(self.request(Method::GET, &url).query(&[("itemType", item_type)]))
            .await?;
        let template: serde_json::Map<String, Value> = Self::json(response).await?;
        debug!(item_type, fields = template.len(), "Fetched item template");
        Ok(template.into_iter().map(|(k, _)| k).collect())
    }

    async fn create_items(&self, payload: Vec<Value>) -> Result<WriteResponse, RemoteError> {
        let count = payload.len();
        let url = self.library_url("/items");
        let response = self.send(self.request(Method::POST, &url).json(&payload)).await?;
        let result: WriteResponse = Self::json(response).await?;
        info!(
            objects = count,
            success = result.success.len(),
            unchanged = result.unchanged.len(),
            failed = result.failed.len(),
            "Wrote objects to Zotero"
        );
        Ok(result)
    }

    async fn upload_file(
        &self,
        item_key: &str,
        filename: &str,
        mime_type: &str,
        content: &[u8],
    ) -> Result<(), RemoteError> {
        let url = self.library_url(&format!("/items/{item_key}/file"));
        let md5 = format!("{:x}", md5::compute(content));
        let mtime = chrono::Utc::now().timestamp_millis().to_string();
        let filesize = content.len().to_string();

        let authorize = self
            .request(Method::POST, &url)
            .header(IF_NONE_MATCH, "*")
            .form(&[
                ("md5", md5.as_str()),
                ("filename", filename),
                ("filesize", filesize.as_str()),
                ("mtime", mtime.as_str()),
            ]);
        let authorization = match self.send(authorize).await {
            Ok(response) => Self::json::<UploadAuthorization>(response).await?,
            Err(RemoteError::Rejected { status: 412, .. }) => {
                warn!(item_key, filename, "Attachment already has a file; skipping upload");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let (upload_url, content_type, prefix, suffix, upload_key) = match authorization {
            UploadAuthorization::Exists { .. } => {
                debug!(item_key, filename, "File already stored; nothing to upload");
                return Ok(());
            }
            UploadAuthorization::Upload { url, content_type, prefix, suffix, upload_key } => {
                (url, content_type, prefix, suffix, upload_key)
            }
        };

        let mut body = Vec::with_capacity(prefix.len() + content.len() + suffix.len());
        body.extend_from_slice(prefix.as_bytes());
        body.extend_from_slice(content);
        body.extend_from_slice(suffix.as_bytes());
        let content_type = HeaderValue::from_str(&content_type).map_err(decode)?;
        self.send(
            self.http
                .post(&upload_url)
                .header(CONTENT_TYPE, content_type)
                .body(body),
        )
        .await?;

        self.send(
            self.request(Method::POST, &url)
                .header(IF_NONE_MATCH, "*")
                .form(&[("upload", upload_key.as_str())]),
        )
        .await?;
        info!(item_key, filename, mime_type, bytes = content.len(), "Uploaded attachment file");
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<RemoteCollection>, RemoteError> {
        let url = self.library_url("/collections");
        let mut collections = Vec::new();
        let mut start = 0usize;
        loop {
            let response = self
                .send(self.request(Method::GET, &url).query(&[
                    ("limit", PAGE_SIZE.to_string()),
                    ("start", start.to_string()),
                ]))
                .await?;
            let total = response
                .headers()
                .get("Total-Results")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());
            let page: Vec<CollectionEntry> = Self::json(response).await?;
            let fetched = page.len();
            collections.extend(page.into_iter().map(|c| RemoteCollection { key: c.key, name: c.data.name }));
            start += fetched;
            let done = match total {
                Some(total) => start >= total,
                None => fetched < PAGE_SIZE,
            };
            if done || fetched == 0 {
                break;
            }
        }
        debug!(count = collections.len(), "Listed Zotero collections");
        Ok(collections)
    }

    async fn create_collection(&self, name: &str) -> Result<RemoteCollection, RemoteError> {
        let url = self.library_url("/collections");
        let response = self
            .send(self.request(Method::POST, &url).json(&[serde_json::json!({ "name": name })]))
            .await?;
        let result: WriteResponse = Self::json(response).await?;
        if let Some(key) = result.success.get(&0).or_else(|| result.unchanged.get(&0)) {
            return Ok(RemoteCollection { key: key.clone(), name: name.to_string() });
        }
        match result.failed.get(&0) {
            Some(f) => Err(RemoteError::from_status(f.code, f.message.clone())),
            None => Err(RemoteError::Decode(format!("no result for collection {name:?}"))),
        }
    }
}
