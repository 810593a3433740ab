//! Server test utilities.

use super::storage::MemoryBlobStore;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use imagegate_core::config::AppConfig;
use imagegate_metadata::{RecordStore, SqliteStore};
use imagegate_server::{AppState, create_router};
use imagegate_storage::BlobStore;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub store: Arc<MemoryBlobStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with an in-memory blob store.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::with_store(MemoryBlobStore::new(), modifier).await
    }

    /// Create a test server around a prepared blob store.
    pub async fn with_store<F>(store: MemoryBlobStore, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let mut config = AppConfig::for_testing();
        config.metadata.path = temp_dir.path().join("images.db");
        config.metadata.min_connections = 1;
        config.upload.temp_dir = Some(temp_dir.path().to_path_buf());
        modifier(&mut config);

        let metadata: Arc<dyn RecordStore> = Arc::new(
            SqliteStore::new(&config.metadata)
                .await
                .expect("Failed to create record store"),
        );

        let store = Arc::new(store);
        let storage: Arc<dyn BlobStore> = store.clone();

        let state = AppState::new(config, storage, metadata);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            store,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the record store.
    pub fn metadata(&self) -> Arc<dyn RecordStore> {
        self.state.metadata.clone()
    }

    /// Send a request with a peer address attached, as the real listener does.
    pub async fn send(&self, mut request: Request<Body>) -> axum::response::Response {
        let peer: SocketAddr = "192.0.2.10:40000".parse().unwrap();
        request
            .extensions_mut()
            .insert(axum::extract::ConnectInfo(peer));
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send a request and decode a JSON body.
    pub async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.send(request).await;
        let status = response.status();
        let body = body_bytes(response).await;
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Upload `data` as the `image` field and decode the response.
    pub async fn upload(&self, filename: &str, content_type: &str, data: &[u8]) -> (StatusCode, Value) {
        self.send_json(super::fixtures::upload_request(filename, content_type, data))
            .await
    }

    /// GET a path.
    pub async fn get(&self, path: &str) -> axum::response::Response {
        self.send(
            Request::builder()
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

/// Collect a response body.
#[allow(dead_code)]
pub async fn body_bytes(response: axum::response::Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}
