//! Proxied file delivery.

use crate::error::{ApiError, ApiResult};
use crate::proxy::ServedImage;
use crate::state::AppState;
use axum::extract::{Path, State};
use imagegate_core::PublicHandle;

/// GET /file/{handle}
///
/// The handle may carry its image extension (`<uuid>.png`); the suffix is
/// ignored for lookup.
#[tracing::instrument(skip(state))]
pub async fn get_file(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> ApiResult<ServedImage> {
    let handle = PublicHandle::parse(&handle).map_err(|_| ApiError::NotFound)?;
    Ok(state.proxy.serve(&handle).await?)
}
