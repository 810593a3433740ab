//! Liveness endpoint.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Blob store backend in use.
    pub backend: &'static str,
    /// Upload slots currently free.
    pub uploads_available: usize,
}

/// GET /health
///
/// Checks record store connectivity. Intentionally unauthenticated for load
/// balancer probes; reports nothing sensitive.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backend: state.storage.backend_name(),
        uploads_available: state.gate.available(),
    }))
}
