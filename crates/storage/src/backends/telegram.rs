//! Telegram Bot API blob store.
//!
//! Files are posted to a chat with `sendDocument`; the returned `file_id` is
//! the backing reference. Direct links come from `getFile` and stay valid for
//! roughly an hour to a day, so they must be re-resolved through `refresh`.
//!
//! Direct links have the form `<api>/file/bot<token>/<path>` and therefore
//! must never be logged.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobBody, BlobStore, StagedBlob, StoredBlob};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};

/// Telegram Bot API client acting as a blob store.
pub struct TelegramBackend {
    client: Client,
    api_url: String,
    token: String,
    chat_id: i64,
}

impl std::fmt::Debug for TelegramBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBackend")
            .field("api_url", &self.api_url)
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FileRef {
    file_id: String,
    #[serde(default)]
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Message {
    document: Option<FileRef>,
    animation: Option<FileRef>,
    #[serde(default)]
    photo: Vec<FileRef>,
}

impl Message {
    /// Telegram may turn a document into an animation (GIF) or photo.
    fn into_file_id(self) -> Option<String> {
        if let Some(doc) = self.document {
            return Some(doc.file_id);
        }
        if let Some(anim) = self.animation {
            return Some(anim.file_id);
        }
        self.photo
            .into_iter()
            .max_by_key(|p| p.file_size.unwrap_or(0))
            .map(|p| p.file_id)
    }
}

#[derive(Debug, Deserialize)]
struct TgFile {
    file_path: Option<String>,
}

impl TelegramBackend {
    /// Create a new Telegram backend.
    pub fn new(
        api_url: &str,
        token: &str,
        chat_id: i64,
        request_timeout: Duration,
    ) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StorageError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            chat_id,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_url, self.token, file_path)
    }

    /// Decode a Bot API envelope, turning `ok: false` into a backend error.
    async fn decode<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> StorageResult<T> {
        let status = response.status();
        let body: ApiResponse<T> = response.json().await.map_err(|e| {
            StorageError::UnexpectedResponse(format!(
                "{method}: status {status}: {}",
                e.without_url()
            ))
        })?;

        if !body.ok {
            return Err(StorageError::Backend(format!(
                "{method}: {} ({})",
                body.description.as_deref().unwrap_or("no description"),
                body.error_code.unwrap_or(i64::from(status.as_u16()))
            )));
        }

        body.result
            .ok_or_else(|| StorageError::UnexpectedResponse(format!("{method}: missing result")))
    }

    async fn get_file(&self, file_id: &str) -> StorageResult<String> {
        let response = self
            .client
            .get(self.method_url("getFile"))
            .query(&[("file_id", file_id)])
            .send()
            .await
            .map_err(StorageError::http)?;

        let file: TgFile = Self::decode("getFile", response).await?;
        let file_path = file
            .file_path
            .ok_or_else(|| StorageError::UnexpectedResponse("getFile: missing file_path".into()))?;
        Ok(self.file_url(&file_path))
    }
}

#[async_trait]
impl BlobStore for TelegramBackend {
    fn backend_name(&self) -> &'static str {
        "telegram"
    }

    #[instrument(skip(self, blob), fields(backend = "telegram", size = blob.size))]
    async fn put(&self, blob: &StagedBlob) -> StorageResult<StoredBlob> {
        let file = fs::File::open(&blob.path).await?;
        let part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), blob.size)
            .file_name(blob.filename.clone())
            .mime_str(&blob.content_type)
            .map_err(StorageError::http)?;

        let form = Form::new()
            .text("chat_id", self.chat_id.to_string())
            .part("document", part);

        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(StorageError::http)?;

        let message: Message = Self::decode("sendDocument", response).await?;
        let file_id = message.into_file_id().ok_or_else(|| {
            StorageError::UnexpectedResponse("sendDocument: message carries no file".into())
        })?;
        debug!(file_id = %file_id, "document stored");

        let direct_url = self.get_file(&file_id).await?;
        Ok(StoredBlob {
            backing_reference: file_id,
            direct_url,
        })
    }

    #[instrument(skip(self, backing_reference), fields(backend = "telegram"))]
    async fn refresh(&self, backing_reference: &str) -> StorageResult<String> {
        if backing_reference.is_empty() {
            return Err(StorageError::InvalidReference("empty file id".into()));
        }
        // Rows written before file ids were stored hold the link itself.
        if backing_reference.starts_with("https://") || backing_reference.starts_with("http://") {
            return Ok(backing_reference.to_string());
        }
        self.get_file(backing_reference).await
    }

    #[instrument(skip(self, direct_url), fields(backend = "telegram"))]
    async fn fetch(&self, direct_url: &str) -> StorageResult<BlobBody> {
        let response = self
            .client
            .get(direct_url)
            .send()
            .await
            .map_err(StorageError::http)?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(StorageError::NotFound("telegram file".into()));
            }
            status => {
                return Err(StorageError::Backend(format!("file download: status {status}")));
            }
        }

        let content_length = response.content_length();
        let stream = response.bytes_stream().map_err(StorageError::http);

        Ok(BlobBody {
            stream: Box::pin(stream),
            content_length,
        })
    }

    async fn health_check(&self) -> StorageResult<()> {
        let response = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .await
            .map_err(StorageError::http)?;
        let _: serde_json::Value = Self::decode("getMe", response).await?;
        Ok(())
    }
}
