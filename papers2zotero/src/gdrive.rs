//! Google Drive [`CloudProvider`] for the cloud-move attachment strategy.
//!
//! Authenticates with a long-lived refresh token read from a YAML settings
//! file and talks to the Drive v3 REST API directly. Drive has no paths, so
//! `/A/B/c.pdf` is resolved by walking folder names from `root`.

use async_trait::async_trait;
use papers2zotero_core::contract::{CloudObject, CloudProvider};
use papers2zotero_core::error::CloudError;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Contents of the `cloud_auth_settings` file.
#[derive(Debug, Clone, Deserialize)]
pub struct DriveSettings {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl DriveSettings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read cloud auth settings {}: {e}", path.display())
        })?;
        serde_yaml::from_str(&text).map_err(|e| {
            anyhow::anyhow!("Failed to parse cloud auth settings {}: {e}", path.display())
        })
    }
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(rename = "webViewLink", default)]
    web_view_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

struct AccessToken {
    token: String,
    expires_at: Instant,
}

pub struct GoogleDriveClient {
    http: reqwest::Client,
    settings: DriveSettings,
    api_base: String,
    token: Mutex<Option<AccessToken>>,
}

fn transport(e: reqwest::Error) -> CloudError {
    CloudError::Transport(e.to_string())
}

/// Drive query string literal: backslash and single quote are escaped.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

impl GoogleDriveClient {
    pub fn new(settings: DriveSettings) -> Self {
        Self::with_api_base(settings, DEFAULT_API_BASE)
    }

    pub fn with_api_base(settings: DriveSettings, api_base: &str) -> Self {
        info!(api_base, client_id = %settings.client_id, "Initialized GoogleDriveClient");
        Self {
            http: reqwest::Client::new(),
            settings,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, CloudError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.token.clone());
            }
        }

        let mut form = vec![
            ("client_id", self.settings.client_id.as_str()),
            ("refresh_token", self.settings.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        if let Some(secret) = self.settings.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        let response = self
            .http
            .post(&self.settings.token_uri)
            .form(&form)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Drive token refresh failed");
            return Err(CloudError::Authentication(format!("HTTP {}: {body}", status.as_u16())));
        }
        let parsed: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| CloudError::Parse(e.to_string()))?;
        let token = parsed["access_token"]
            .as_str()
            .ok_or_else(|| CloudError::Authentication("no access_token in response".into()))?
            .to_string();
        let expires_in = parsed["expires_in"].as_u64().unwrap_or(3600);
        // Refresh a minute early.
        let expires_at = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60));
        debug!(expires_in, "Refreshed Drive access token");
        *guard = Some(AccessToken { token: token.clone(), expires_at });
        Ok(token)
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, CloudError> {
        let token = self.access_token().await?;
        Ok(self
            .http
            .request(method, format!("{}{}", self.api_base, path))
            .bearer_auth(token))
    }

    async fn send<T: serde::de::DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CloudError> {
        let response: Response = request.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    CloudError::Authentication(format!("HTTP {}: {body}", status.as_u16()))
                }
                StatusCode::TOO_MANY_REQUESTS => CloudError::RateLimited,
                _ => CloudError::Api { status: status.as_u16(), message: body },
            });
        }
        serde_json::from_str(&body).map_err(|e| CloudError::Parse(e.to_string()))
    }

    async fn child(&self, parent: &str, name: &str) -> Result<Option<DriveFile>, CloudError> {
        let q = format!("{} in parents and name = {} and trashed = false", quote(parent), quote(name));
        let request = self
            .request(Method::GET, "/drive/v3/files")
            .await?
            .query(&[("q", q.as_str()), ("fields", "files(id,name,parents)"), ("spaces", "drive")]);
        let list: FileList = self.send(request).await?;
        if list.files.len() > 1 {
            warn!(parent, name, count = list.files.len(), "Several Drive objects share a name; using the first");
        }
        Ok(list.files.into_iter().next())
    }

    /// Id of the folder at `path`, creating missing folders along the way.
    async fn ensure_folder(&self, path: &str) -> Result<String, CloudError> {
        let mut parent = "root".to_string();
        for name in components(path) {
            parent = match self.child(&parent, name).await? {
                Some(existing) => existing.id,
                None => {
                    let request = self
                        .request(Method::POST, "/drive/v3/files")
                        .await?
                        .query(&[("fields", "id,name")])
                        .json(&json!({ "name": name, "mimeType": FOLDER_MIME, "parents": [parent] }));
                    let created: DriveFile = self.send(request).await?;
                    info!(folder = name, id = %created.id, "Created Drive folder");
                    created.id
                }
            };
        }
        Ok(parent)
    }
}

#[async_trait]
impl CloudProvider for GoogleDriveClient {
    async fn locate(&self, path: &str) -> Result<Option<CloudObject>, CloudError> {
        let parts = components(path);
        let mut parent = "root".to_string();
        let mut found = None;
        for name in &parts {
            match self.child(&parent, name).await? {
                Some(file) => {
                    parent = file.id.clone();
                    found = Some(file);
                }
                None => {
                    debug!(path, missing = *name, "Drive path not found");
                    return Ok(None);
                }
            }
        }
        Ok(found.map(|f| CloudObject { id: f.id, name: f.name, path: format!("/{}", parts.join("/")) }))
    }

    async fn move_to_folder(
        &self,
        object: &CloudObject,
        folder: &str,
        name: &str,
    ) -> Result<CloudObject, CloudError> {
        let folder_id = self.ensure_folder(folder).await?;
        let request = self
            .request(Method::GET, &format!("/drive/v3/files/{}", object.id))
            .await?
            .query(&[("fields", "id,name,parents")]);
        let current: DriveFile = self.send(request).await?;
        let remove = current.parents.join(",");

        let request = self
            .request(Method::PATCH, &format!("/drive/v3/files/{}", object.id))
            .await?
            .query(&[
                ("addParents", folder_id.as_str()),
                ("removeParents", remove.as_str()),
                ("fields", "id,name,parents"),
            ])
            .json(&json!({ "name": name }));
        let moved: DriveFile = self.send(request).await?;
        let path = format!("/{}/{}", components(folder).join("/"), moved.name);
        info!(from = %object.path, to = %path, "Moved Drive object");
        Ok(CloudObject { id: moved.id, name: moved.name, path })
    }

    async fn shareable_reference(&self, object: &CloudObject) -> Result<String, CloudError> {
        let request = self
            .request(Method::GET, &format!("/drive/v3/files/{}", object.id))
            .await?
            .query(&[("fields", "id,name,webViewLink")]);
        let file: DriveFile = self.send(request).await?;
        file.web_view_link
            .ok_or_else(|| CloudError::Parse(format!("no webViewLink for {}", object.path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_drive_literals() {
        assert_eq!(quote("Abe's notes"), "'Abe\\'s notes'");
        assert_eq!(quote("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn splits_paths() {
        assert_eq!(components("/Zotero//Journal Article/A/"), vec!["Zotero", "Journal Article", "A"]);
    }
}
