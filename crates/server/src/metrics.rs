//! Prometheus metrics for the imagegate server.
//!
//! Exposes metrics for upload admission and outcome, resolution cache
//! effectiveness and proxied file delivery.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no handles, filenames or client addresses, only aggregate
//! counts. The endpoint should still be network-restricted to the scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload metrics
pub static UPLOADS_ACCEPTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "imagegate_uploads_accepted_total",
        "Total number of uploads stored and recorded",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_REJECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "imagegate_uploads_rejected_total",
            "Total number of failed uploads by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "imagegate_upload_duration_seconds",
            "Time from admission to committed record",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "imagegate_bytes_uploaded_total",
        "Total bytes handed to the blob store",
    )
    .expect("metric creation failed")
});

pub static ORPHANED_BLOBS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "imagegate_orphaned_blobs_total",
        "Blobs stored without a matching record because the insert failed",
    )
    .expect("metric creation failed")
});

pub static ACTIVE_UPLOADS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "imagegate_active_uploads",
        "Uploads currently holding an admission slot",
    )
    .expect("metric creation failed")
});

// Resolution metrics
pub static CACHE_LOOKUPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "imagegate_resolution_cache_lookups_total",
            "Resolution cache lookups by result (hit, miss)",
        ),
        &["result"],
    )
    .expect("metric creation failed")
});

// Delivery metrics
pub static FILES_SERVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "imagegate_files_served_total",
        "Total number of files streamed to clients",
    )
    .expect("metric creation failed")
});

pub static UPSTREAM_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "imagegate_upstream_errors_total",
            "Blob store failures by backend and operation",
        ),
        &["backend", "operation"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build many routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOADS_ACCEPTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_REJECTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ORPHANED_BLOBS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ACTIVE_UPLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_LOOKUPS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FILES_SERVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPSTREAM_ERRORS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a failed upload under its error code.
pub fn record_upload_rejected(reason: &str) {
    UPLOADS_REJECTED.with_label_values(&[reason]).inc();
}

/// Record a blob store failure.
pub fn record_upstream_error(backend: &str, operation: &str) {
    UPSTREAM_ERRORS
        .with_label_values(&[backend, operation])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_gathered_output_names_metrics() {
        register_metrics();
        record_upload_rejected("unsupported_type");
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&REGISTRY.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("imagegate_uploads_rejected_total{reason=\"unsupported_type\"}"));
    }
}
