//! Upload endpoint.

use crate::auth::TraceId;
use crate::error::{ApiError, ApiResult};
use crate::metrics::record_upload_rejected;
use crate::pipeline::{BodyError, UploadOutcome, UploadRequest};
use crate::state::AppState;
use axum::Json;
use axum::extract::{ConnectInfo, Extension, Multipart, State};
use axum::http::{HeaderMap, StatusCode, header};
use futures::TryStreamExt;
use imagegate_core::sanitize_user_agent;
use serde::Serialize;
use std::net::SocketAddr;

/// Multipart field carrying the file.
pub const UPLOAD_FIELD: &str = "image";

/// Room for multipart framing on top of the file size cap.
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Successful upload response.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Absolute URL of the proxied file.
    pub url: String,
    /// Path under which the file is served.
    pub path: String,
    pub handle: String,
    pub filename: String,
    pub content_type: String,
}

/// POST /upload
///
/// Admission is decided before the body is read; a full gate answers 503
/// without consuming the upload.
#[tracing::instrument(skip_all)]
pub async fn upload_image(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let result = upload_inner(&state, &trace_id, connect_info, &headers, multipart).await;
    if let Err(e) = &result {
        record_upload_rejected(e.code());
    }
    result
}

async fn upload_inner(
    state: &AppState,
    trace_id: &TraceId,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: &HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let ticket = state.gate.try_admit().map_err(|_| {
        tracing::info!("upload rejected, all slots busy");
        ApiError::ServerBusy
    })?;

    let peer = connect_info.map(|Extension(ConnectInfo(addr))| addr);
    let client_ip = state.proxies.client_ip(headers, peer);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(sanitize_user_agent)
        .unwrap_or_default();

    let max_size_bytes = state.pipeline.max_size_bytes();
    let timeout = state.config.upload.upload_timeout();

    let upload = async move {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, max_size_bytes))? {
            if field.name() != Some(UPLOAD_FIELD) {
                continue;
            }

            let declared_filename = field.file_name().unwrap_or_default().to_string();
            let declared_content_type = field.content_type().map(str::to_string);
            let body = field.map_err(|e| {
                if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    BodyError::TooLarge
                } else {
                    BodyError::Malformed(e.body_text())
                }
            });

            let request = UploadRequest {
                body,
                declared_filename,
                declared_content_type,
                client_ip,
                user_agent,
                trace_id: trace_id.to_string(),
            };

            return state
                .pipeline
                .upload(ticket, request)
                .await
                .map_err(|e| ApiError::from_upload(e, max_size_bytes));
        }

        Err(ApiError::BadRequest(format!(
            "missing multipart field '{UPLOAD_FIELD}'"
        )))
    };

    let outcome = tokio::time::timeout(timeout, upload).await.map_err(|_| {
        tracing::warn!(timeout_secs = timeout.as_secs(), "upload timed out");
        ApiError::UploadTimedOut
    })??;

    Ok(Json(response_for(state, headers, peer, outcome)))
}

fn multipart_error(err: axum::extract::multipart::MultipartError, max_size_bytes: u64) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge {
            limit_mib: max_size_bytes / (1024 * 1024),
        }
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

fn response_for(
    state: &AppState,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    outcome: UploadOutcome,
) -> UploadResponse {
    let base = match &state.config.server.public_base_url {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(&state.config.server.bind);
            format!("{}://{}", state.proxies.scheme(headers, peer), host)
        }
    };

    UploadResponse {
        url: format!("{base}{}", outcome.proxy_path),
        path: outcome.proxy_path,
        handle: outcome.handle.to_string(),
        filename: outcome.filename,
        content_type: outcome.image_type.mime_type().to_string(),
    }
}
