//! Route configuration.

use crate::auth::trace_id_middleware;
use crate::error::ApiError;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::ratelimit::ip_rate_limit_middleware;
use crate::state::AppState;
use axum::Router;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Response;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use std::any::Any;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.upload.max_size_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(handlers::MULTIPART_OVERHEAD_BYTES);

    let mut router = Router::new()
        .route(
            "/upload",
            post(handlers::upload_image).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/file/{handle}", get(handlers::get_file))
        .route("/admin/toggle/{id}", post(handlers::toggle_image))
        // Unauthenticated for load balancer probes
        .route("/health", get(handlers::health_check));

    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    let rate_limit_state = state.rate_limit.clone();

    // Layers are applied in reverse order (outermost last).
    // Order of execution: TraceLayer -> trace ID -> panic guard -> IP rate limit -> Handler
    router
        .layer(middleware::from_fn_with_state(
            rate_limit_state,
            ip_rate_limit_middleware,
        ))
        // Inside the trace ID scope so the panic body still carries it
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(trace_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    tracing::error!(panic = %detail, "handler panicked");
    ApiError::Internal.into_response()
}
