use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;
use vitrine_storage::error::{StorageError, StorageResult};
use vitrine_storage::traits::{ObjectInfo, ObjectStore};
use vitrine_storage::FilesystemBackend;

/// Wraps a filesystem backend and fails `put` for keys containing a marker.
pub struct FailingPutBackend {
    pub inner: FilesystemBackend,
    pub fail_marker: String,
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStore for FailingPutBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> StorageResult<()> {
        if key.contains(&self.fail_marker) {
            return Err(StorageError::Io(std::io::Error::other("injected put failure")));
        }
        self.inner.put(key, data, content_type).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.deleted.lock().unwrap().push(key.to_string());
        self.inner.delete(key).await
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        self.inner.list_objects(prefix).await
    }

    fn backend_name(&self) -> &'static str {
        "failing-put"
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}
