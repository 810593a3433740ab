//! Health, metrics, trace ID and rate limiting behaviour.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::fixtures::png_bytes;
use common::{TestServer, body_bytes};
use imagegate_core::PublicHandle;

#[tokio::test]
async fn test_health_reports_ok() {
    let server = TestServer::new().await;

    let (status, json) = server
        .send_json(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["backend"], "memory");
    assert_eq!(json["uploads_available"], 5);
}

#[tokio::test]
async fn test_metrics_endpoint_toggle() {
    imagegate_server::metrics::register_metrics();

    let server = TestServer::with_config(|config| config.server.metrics_enabled = false).await;
    assert_eq!(server.get("/metrics").await.status(), StatusCode::NOT_FOUND);

    let server = TestServer::with_config(|config| config.server.metrics_enabled = true).await;
    let (status, _) = server.upload("a.png", "image/png", &png_bytes(64)).await;
    assert_eq!(status, StatusCode::OK);

    let response = server.get("/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(text.contains("imagegate_uploads_accepted_total"));
    assert!(text.contains("imagegate_bytes_uploaded_total"));
}

#[tokio::test]
async fn test_trace_id_echoed_in_header_and_error_body() {
    let server = TestServer::new().await;

    let request = Request::builder()
        .uri(format!("/file/{}.png", PublicHandle::new()))
        .header("x-trace-id", "trace-abc-123")
        .body(Body::empty())
        .unwrap();
    let response = server.send(request).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-trace-id"], "trace-abc-123");

    let json: serde_json::Value =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["code"], "not_found");
    assert_eq!(json["trace_id"], "trace-abc-123");
}

#[tokio::test]
async fn test_trace_id_generated_when_absent() {
    let server = TestServer::new().await;

    let response = server.get("/health").await;
    let trace_id = response.headers()["x-trace-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(trace_id).is_ok());
}

#[tokio::test]
async fn test_rate_limit_rejects_burst() {
    let server = TestServer::with_config(|config| {
        config.rate_limit.enabled = true;
        config.rate_limit.requests_per_minute = 1;
        config.rate_limit.burst_size = 2;
    })
    .await;

    assert_eq!(server.get("/health").await.status(), StatusCode::OK);
    assert_eq!(server.get("/health").await.status(), StatusCode::OK);

    let response = server.get("/health").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert!(response.headers().contains_key("x-trace-id"));
}
