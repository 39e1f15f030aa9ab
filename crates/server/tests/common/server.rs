//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use depot_core::config::{AppConfig, MetadataConfig, RelayConfig, ServerConfig};
use depot_metadata::MetadataStore;
use depot_relay::RelayChannel;
use depot_server::{AppState, create_router};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Segment size used by test servers; small enough that multi-segment
/// behavior can be exercised with kilobyte payloads.
pub const TEST_SEGMENT_SIZE: u64 = 1024;

/// Per-object ceiling of the test relay backend.
pub const TEST_OBJECT_CEILING: u64 = 2048;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    relay_dir: PathBuf,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server backed by a directory relay and a
    /// temporary SQLite database.
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let relay_dir = temp_dir.path().join("relay");
        let staging_dir = temp_dir.path().join("staging");
        std::fs::create_dir_all(&staging_dir).expect("Failed to create staging directory");
        let db_path = temp_dir.path().join("metadata.db");

        let config = AppConfig {
            server: ServerConfig {
                segment_size: TEST_SEGMENT_SIZE,
                staging_dir: staging_dir.clone(),
                ..Default::default()
            },
            relay: RelayConfig::Directory {
                path: relay_dir.clone(),
                max_object_size: TEST_OBJECT_CEILING,
            },
            metadata: MetadataConfig::Sqlite {
                path: db_path.clone(),
            },
        };

        let relay: Arc<RelayChannel> = Arc::new(
            depot_relay::from_config(&config.relay).expect("Failed to create relay channel"),
        );

        let metadata: Arc<dyn MetadataStore> = depot_metadata::from_config(&config.metadata)
            .await
            .expect("Failed to create metadata store");

        let state = AppState::new(config, metadata, relay);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            relay_dir,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata store.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Count the objects currently held by the directory relay backend.
    ///
    /// The directory is created lazily on the backend's first operation,
    /// so a missing directory counts as empty.
    pub fn relay_object_count(&self) -> usize {
        match std::fs::read_dir(&self.relay_dir) {
            Ok(entries) => entries.count(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => panic!("Failed to read relay directory: {err}"),
        }
    }

    /// Send a request with a raw byte body and return status plus parsed
    /// JSON (Null when the body is empty or not JSON).
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: impl Into<Vec<u8>>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.into()))
            .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let json = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        (status, json)
    }

    /// Send a request and return status, headers, and the raw body bytes.
    pub async fn request_raw(
        &self,
        method: &str,
        uri: &str,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        (status, headers, body_bytes.to_vec())
    }
}
