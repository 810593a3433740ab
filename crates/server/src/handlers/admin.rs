//! Administrative endpoints.

use crate::auth::require_admin;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde::Serialize;

/// Result of flipping an image's active flag.
#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub id: i64,
    pub handle: String,
    pub is_active: bool,
}

/// POST /admin/toggle/{id}
///
/// Flips the active flag and drops any cached resolution so the next request
/// observes the new state.
#[tracing::instrument(skip(state, headers))]
pub async fn toggle_image(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<Json<ToggleResponse>> {
    require_admin(&headers, &state.config.admin)?;

    let row = state.metadata.toggle_active(id).await?;
    match row.handle() {
        Some(handle) => state.cache.invalidate(&handle),
        None => tracing::warn!(id, "record carries an unparseable handle"),
    }

    tracing::info!(id, is_active = row.is_active, "image active flag toggled");

    Ok(Json(ToggleResponse {
        id: row.id,
        handle: row.public_handle,
        is_active: row.is_active,
    }))
}
