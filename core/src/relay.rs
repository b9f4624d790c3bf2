//! Re-hosting of provider images on a durable image host.
//!
//! Provider image URLs expire, so generated images are fetched once and
//! uploaded to a hosting service. [`ImageRelay`] does this in-process;
//! [`RelayClient`] asks a running relay endpoint to do it.

use crate::config::ImageKitSettings;
use crate::error::{ChatError, ChatResult};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub const IMAGEKIT_UPLOAD_URL: &str = "https://upload.imagekit.io/api/v1/files/upload";

#[async_trait]
pub trait ImageHost: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> ChatResult<String>;
}

#[async_trait]
pub trait ImageUploader: Send + Sync {
    /// Copies the image at `source_url` to the host and returns its new URL.
    async fn rehost(&self, source_url: &str) -> ChatResult<String>;
}

/// `<unix-millis>-<32 hex chars>.jpg`
pub fn hosted_file_name() -> String {
    format!(
        "{}-{}.jpg",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

pub struct ImageKitHost {
    client: reqwest::Client,
    upload_url: String,
    private_key: String,
    folder: String,
}

#[derive(Deserialize)]
struct ImageKitUpload {
    url: String,
}

impl ImageKitHost {
    pub fn new(settings: &ImageKitSettings) -> Self {
        Self::with_upload_url(settings, IMAGEKIT_UPLOAD_URL)
    }

    pub fn with_upload_url(settings: &ImageKitSettings, upload_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            upload_url: upload_url.into(),
            private_key: settings.private_key.clone(),
            folder: settings.folder.clone(),
        }
    }
}

#[async_trait]
impl ImageHost for ImageKitHost {
    async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> ChatResult<String> {
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name.to_string()))
            .text("fileName", file_name.to_string())
            .text("folder", self.folder.clone());
        let response = self
            .client
            .post(&self.upload_url)
            .basic_auth(&self.private_key, Some(""))
            .multipart(form)
            .send()
            .await
            .map_err(|err| ChatError::Upload(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Upload(format!("{status}: {}", body.trim())));
        }
        let upload: ImageKitUpload = response
            .json()
            .await
            .map_err(|err| ChatError::Upload(err.to_string()))?;
        Ok(upload.url)
    }
}

/// Keeps uploads in memory; hosted URLs are `<base_url>/<file name>`.
#[derive(Clone)]
pub struct MemoryImageHost {
    base_url: String,
    uploads: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    fail: bool,
}

impl MemoryImageHost {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            uploads: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().clone()
    }
}

impl Default for MemoryImageHost {
    fn default() -> Self {
        Self::new("memory://images")
    }
}

#[async_trait]
impl ImageHost for MemoryImageHost {
    async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> ChatResult<String> {
        if self.fail {
            return Err(ChatError::Upload("memory host rejected the upload".into()));
        }
        self.uploads.lock().push((file_name.to_string(), bytes));
        Ok(format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            file_name
        ))
    }
}

/// Fetches the source image and uploads it to an [`ImageHost`].
#[derive(Clone)]
pub struct ImageRelay {
    client: reqwest::Client,
    host: Arc<dyn ImageHost>,
}

impl ImageRelay {
    pub fn new(host: Arc<dyn ImageHost>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host,
        }
    }

    async fn fetch(&self, source: url::Url) -> ChatResult<Vec<u8>> {
        let response = self
            .client
            .get(source)
            .send()
            .await
            .map_err(|err| ChatError::UpstreamFetch(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::UpstreamFetch(format!("source returned {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ChatError::UpstreamFetch(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageUploader for ImageRelay {
    async fn rehost(&self, source_url: &str) -> ChatResult<String> {
        let source = parse_source_url(source_url)?;
        let bytes = self.fetch(source).await?;
        let file_name = hosted_file_name();
        tracing::debug!(%file_name, size = bytes.len(), "uploading relayed image");
        self.host.upload(bytes, &file_name).await
    }
}

pub fn parse_source_url(source_url: &str) -> ChatResult<url::Url> {
    let trimmed = source_url.trim();
    if trimmed.is_empty() {
        return Err(ChatError::BadRequest("Image URL is required".into()));
    }
    let url = url::Url::parse(trimmed)
        .map_err(|err| ChatError::BadRequest(format!("invalid image URL: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ChatError::BadRequest(format!(
            "unsupported image URL scheme `{other}`"
        ))),
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelayResponse {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Calls a remote relay endpoint (`POST {imageUrl}` → `{url}`).
#[derive(Clone)]
pub struct RelayClient {
    client: reqwest::Client,
    endpoint: String,
}

impl RelayClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ImageUploader for RelayClient {
    async fn rehost(&self, source_url: &str) -> ChatResult<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RelayRequest {
                image_url: Some(source_url.to_string()),
            })
            .send()
            .await
            .map_err(|err| ChatError::Upload(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            let body: RelayResponse = response
                .json()
                .await
                .map_err(|err| ChatError::Upload(err.to_string()))?;
            return Ok(body.url);
        }
        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| status.to_string());
        Err(match status {
            reqwest::StatusCode::BAD_REQUEST => ChatError::BadRequest(message),
            reqwest::StatusCode::BAD_GATEWAY => ChatError::UpstreamFetch(message),
            _ => ChatError::Upload(message),
        })
    }
}
