//! Server test utilities.

use super::fixtures::{ADMIN_TOKEN, BOUNDARY, public_url};
use super::storage::FlakyStore;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use vitrine_core::config::{AppConfig, MetadataConfig, StorageConfig};
use vitrine_metadata::{
    AuditLogQuery, AuditLogRow, AuditRepo, MetadataStore, NewProject, ProjectRepo, SqliteStore,
};
use vitrine_server::cleanup::CleanupService;
use vitrine_server::{AppState, AuditQueue, create_router};
use vitrine_storage::{FilesystemBackend, ObjectStore};

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub store: Arc<FlakyStore>,
    pub sqlite: Arc<SqliteStore>,
    pub shutdown: CancellationToken,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        let backend = FilesystemBackend::new(&storage_path)
            .await
            .expect("Failed to create storage backend");
        let store = Arc::new(FlakyStore::new(backend));

        let db_path = temp_dir.path().join("metadata.db");
        let sqlite = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem { path: storage_path };
        config.metadata = MetadataConfig::Sqlite { path: db_path };
        modifier(&mut config);

        vitrine_server::metrics::register_metrics();

        let shutdown = CancellationToken::new();
        let metadata: Arc<dyn MetadataStore> = sqlite.clone();
        let (audit, _worker) =
            AuditQueue::spawn(metadata.clone(), config.audit.queue_capacity, shutdown.clone());

        let storage: Arc<dyn ObjectStore> = store.clone();
        let state = AppState::new(config, storage, metadata, audit, shutdown.clone())
            .expect("Failed to create app state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            store,
            sqlite,
            shutdown,
            _temp_dir: temp_dir,
        }
    }

    /// The cleanup service (panics when not initialized).
    pub fn cleanup(&self) -> Arc<CleanupService> {
        self.state
            .cleanup
            .clone()
            .expect("cleanup service should be initialized")
    }

    /// Store a small placeholder object at each key.
    pub async fn seed_objects(&self, keys: &[&str]) {
        for key in keys {
            self.store
                .put(key, Bytes::from_static(b"image-bytes"), Some("image/jpeg"))
                .await
                .expect("Failed to seed object");
        }
    }

    /// Create an active project referencing the given image URLs.
    pub async fn create_project(&self, slug: &str, images: &[String]) -> i64 {
        self.sqlite
            .create_project(&NewProject {
                title: format!("Project {slug}"),
                slug: slug.to_string(),
                images: images.to_vec(),
                is_active: true,
            })
            .await
            .expect("Failed to create project")
            .project_id
    }

    /// Create a project referencing the given keys through the public URL.
    pub async fn create_project_with_keys(&self, slug: &str, keys: &[&str]) -> i64 {
        let urls: Vec<String> = keys.iter().map(|key| public_url(key)).collect();
        self.create_project(slug, &urls).await
    }

    /// Every key under `prefix`, sorted.
    pub async fn stored_keys(&self, prefix: &str) -> Vec<String> {
        let mut keys = self.store.list(prefix).await.expect("Failed to list");
        keys.sort();
        keys
    }

    /// Wait until at least `count` audit rows exist, returning them newest first.
    pub async fn wait_for_audit(&self, count: usize) -> Vec<AuditLogRow> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let rows = self
                .state
                .metadata
                .list_audit_logs(&AuditLogQuery::latest(100))
                .await
                .expect("Failed to list audit logs");
            if rows.len() >= count {
                return rows;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("expected {count} audit rows, found {}", rows.len());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Send a request and decode the JSON response.
#[allow(dead_code)]
pub async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    auth_token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = auth_token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    send(router, builder.body(Body::empty()).unwrap()).await
}

/// Send an authenticated admin request.
#[allow(dead_code)]
pub async fn admin_request(router: &axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    json_request(router, method, uri, Some(ADMIN_TOKEN)).await
}

/// Send an authenticated multipart request.
#[allow(dead_code)]
pub async fn multipart_request(router: &axum::Router, uri: &str, body: Vec<u8>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Authorization", format!("Bearer {ADMIN_TOKEN}"))
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header("User-Agent", "vitrine-tests/1.0")
        .body(Body::from(body))
        .unwrap();
    send(router, request).await
}

async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}
