//! Serving stored images through the gateway.

use crate::metrics::{FILES_SERVED, record_upstream_error};
use crate::resolve::{Resolution, ResolutionCache, ResolveError, ResolvedImage};
use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use imagegate_core::PublicHandle;
use imagegate_metadata::RecordStore;
use imagegate_storage::{BlobBody, BlobStore, ByteStream, StorageError};
use std::sync::Arc;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::instrument;

/// Served files are content-addressed by an immutable handle.
pub const CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

const EXPIRES_AFTER: time::Duration = time::Duration::days(365);

/// An image ready to be streamed to the client.
pub struct ServedImage {
    pub content_type: String,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl std::fmt::Debug for ServedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServedImage")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("not found")]
    NotFound,

    #[error("image is no longer available")]
    Inactive,

    #[error("upstream fetch failed: {0}")]
    Upstream(#[source] StorageError),

    #[error("lookup failed: {0}")]
    Lookup(#[source] imagegate_metadata::MetadataError),
}

impl From<ResolveError> for ServeError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Lookup(e) => Self::Lookup(e),
            ResolveError::Refresh(e) => Self::Upstream(e),
        }
    }
}

pub struct ProxyReader {
    cache: Arc<ResolutionCache>,
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
}

impl ProxyReader {
    pub fn new(
        cache: Arc<ResolutionCache>,
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            cache,
            blobs,
            records,
        }
    }

    /// Resolve `handle` and open its upstream byte stream.
    #[instrument(skip(self), fields(backend = self.blobs.backend_name()))]
    pub async fn serve(&self, handle: &PublicHandle) -> Result<ServedImage, ServeError> {
        let resolved = self.resolve(handle).await?;

        let (body, content_type) = match self.blobs.fetch(&resolved.direct_url).await {
            Ok(body) => (body, resolved.content_type),
            Err(e) if resolved.cached => {
                tracing::debug!(error = %e, "cached direct link failed, re-resolving");
                self.cache.invalidate(handle);
                let fresh = self.resolve(handle).await?;
                let body = self.fetch(&fresh.direct_url).await?;
                (body, fresh.content_type)
            }
            Err(e) => return Err(self.upstream("fetch", e)),
        };

        FILES_SERVED.inc();
        self.count_view(*handle);

        Ok(ServedImage {
            content_type,
            content_length: body.content_length,
            body: body.stream,
        })
    }

    async fn resolve(&self, handle: &PublicHandle) -> Result<ResolvedImage, ServeError> {
        match self.cache.resolve(handle).await {
            Ok(Resolution::Found(image)) => Ok(image),
            Ok(Resolution::NotFound) => Err(ServeError::NotFound),
            Ok(Resolution::Inactive) => Err(ServeError::Inactive),
            Err(ResolveError::Refresh(e)) => Err(self.upstream("refresh", e)),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch(&self, direct_url: &str) -> Result<BlobBody, ServeError> {
        self.blobs
            .fetch(direct_url)
            .await
            .map_err(|e| self.upstream("fetch", e))
    }

    fn upstream(&self, operation: &str, err: StorageError) -> ServeError {
        record_upstream_error(self.blobs.backend_name(), operation);
        ServeError::Upstream(err)
    }

    fn count_view(&self, handle: PublicHandle) {
        let records = self.records.clone();
        tokio::spawn(async move {
            if let Err(e) = records.increment_view_count(&handle).await {
                tracing::warn!(handle = %handle, error = %e, "failed to increment view count");
            }
        });
    }
}

impl IntoResponse for ServedImage {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from_stream(self.body));
        *response.status_mut() = StatusCode::OK;

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&self.content_type) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL),
        );
        if let Some(expires) = http_date(OffsetDateTime::now_utc() + EXPIRES_AFTER)
            && let Ok(value) = HeaderValue::from_str(&expires)
        {
            headers.insert(header::EXPIRES, value);
        }
        if let Some(len) = self.content_length {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        }
        response
    }
}

/// Format as an IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`).
fn http_date(at: OffsetDateTime) -> Option<String> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    at.to_offset(time::UtcOffset::UTC).format(&format).ok()
}
