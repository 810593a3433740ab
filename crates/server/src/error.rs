//! API error types.
//!
//! Client-facing messages are fixed per variant. Internal detail is logged
//! with the request's trace ID and never returned.

use crate::auth::current_trace_id;
use crate::pipeline::UploadError;
use crate::proxy::ServeError;
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Correlates the response with server logs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("server is busy")]
    ServerBusy,

    #[error("file exceeds {limit_mib} MiB")]
    PayloadTooLarge { limit_mib: u64 },

    #[error("unsupported file type: {detected}")]
    UnsupportedType { detected: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("storage backend unavailable")]
    BackendUnavailable,

    #[error("failed to record upload")]
    PersistenceFailed,

    #[error("upload timed out")]
    UploadTimedOut,

    #[error("not found")]
    NotFound,

    #[error("image is no longer available")]
    Inactive,

    #[error("upstream fetch failed")]
    UpstreamError,

    #[error("unauthorized")]
    Unauthorized,

    #[error("rate limit exceeded, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("internal error")]
    Internal,
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ServerBusy => "server_busy",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::UnsupportedType { .. } => "unsupported_type",
            Self::BadRequest(_) => "bad_request",
            Self::BackendUnavailable => "backend_unavailable",
            Self::PersistenceFailed => "persistence_failed",
            Self::UploadTimedOut => "upload_timed_out",
            Self::NotFound => "not_found",
            Self::Inactive => "inactive",
            Self::UpstreamError => "upstream_error",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited { .. } => "rate_limited",
            Self::Internal => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ServerBusy => StatusCode::SERVICE_UNAVAILABLE,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::BackendUnavailable => StatusCode::BAD_GATEWAY,
            Self::PersistenceFailed => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UploadTimedOut => StatusCode::GATEWAY_TIMEOUT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Inactive => StatusCode::GONE,
            Self::UpstreamError => StatusCode::BAD_GATEWAY,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map an upload failure, logging the internal cause.
    pub fn from_upload(err: UploadError, max_size_bytes: u64) -> Self {
        match err {
            UploadError::PayloadTooLarge { .. } => Self::PayloadTooLarge {
                limit_mib: max_size_bytes / (1024 * 1024),
            },
            UploadError::UnsupportedType { detected } => Self::UnsupportedType { detected },
            UploadError::Empty => Self::BadRequest("empty file".to_string()),
            UploadError::Body(msg) => Self::BadRequest(msg),
            UploadError::Staging(e) => {
                tracing::error!(error = %e, "failed to stage upload");
                Self::Internal
            }
            UploadError::BackendUnavailable(e) => {
                tracing::error!(error = %e, "blob store rejected upload");
                Self::BackendUnavailable
            }
            // Already logged with the orphaned reference.
            UploadError::PersistenceFailed(_) => Self::PersistenceFailed,
        }
    }
}

impl From<ServeError> for ApiError {
    fn from(err: ServeError) -> Self {
        match err {
            ServeError::NotFound => Self::NotFound,
            ServeError::Inactive => Self::Inactive,
            ServeError::Upstream(e) => {
                tracing::warn!(error = %e, "upstream fetch failed");
                Self::UpstreamError
            }
            ServeError::Lookup(e) => {
                tracing::error!(error = %e, "record lookup failed");
                Self::Internal
            }
        }
    }
}

impl From<imagegate_metadata::MetadataError> for ApiError {
    fn from(err: imagegate_metadata::MetadataError) -> Self {
        match err {
            imagegate_metadata::MetadataError::NotFound(_) => Self::NotFound,
            other => {
                tracing::error!(error = %other, "record store error");
                Self::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
            trace_id: current_trace_id(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::ServerBusy.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::Inactive.status_code(), StatusCode::GONE);
        assert_eq!(
            ApiError::UnsupportedType {
                detected: "text/plain".into()
            }
            .status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(ApiError::UploadTimedOut.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_internal_detail_not_exposed() {
        let err = ApiError::from_upload(
            UploadError::Staging(std::io::Error::other("/tmp/secret/path: disk full")),
            10 * 1024 * 1024,
        );
        assert_eq!(err.to_string(), "internal error");
    }

    #[test]
    fn test_payload_limit_reported_in_mib() {
        let err = ApiError::from_upload(UploadError::PayloadTooLarge { limit: 1 }, 10 << 20);
        assert_eq!(err.to_string(), "file exceeds 10 MiB");
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited {
            retry_after_secs: 7,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");
    }
}
