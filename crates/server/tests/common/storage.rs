//! Failure-injecting object store.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use vitrine_storage::{FilesystemBackend, ObjectInfo, ObjectStore, StorageError, StorageResult};

/// Filesystem-backed store whose failures can be scripted per test.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct FlakyStore {
    inner: FilesystemBackend,
    fail_list: AtomicBool,
    fail_delete: Mutex<HashSet<String>>,
    missing_on_delete: Mutex<HashSet<String>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    delete_gate: Mutex<Option<std::sync::Arc<Semaphore>>>,
    delete_delay: Mutex<Option<Duration>>,
    deletes: AtomicUsize,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new(inner: FilesystemBackend) -> Self {
        Self {
            inner,
            fail_list: AtomicBool::new(false),
            fail_delete: Mutex::new(HashSet::new()),
            missing_on_delete: Mutex::new(HashSet::new()),
            cancel_after: Mutex::new(None),
            delete_gate: Mutex::new(None),
            delete_delay: Mutex::new(None),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Make every listing fail.
    pub fn fail_listing(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }

    /// Make deletes of `key` fail with an I/O error.
    pub fn fail_delete_of(&self, key: &str) {
        self.fail_delete.lock().unwrap().insert(key.to_string());
    }

    /// Report `key` as already gone when it is deleted.
    pub fn vanish_before_delete(&self, key: &str) {
        self.missing_on_delete
            .lock()
            .unwrap()
            .insert(key.to_string());
    }

    /// Cancel `token` once `count` deletes have completed.
    pub fn cancel_after_deletes(&self, count: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((count, token));
    }

    /// Block deletes until permits are added to the returned semaphore.
    pub fn hold_deletes(&self) -> std::sync::Arc<Semaphore> {
        let gate = std::sync::Arc::new(Semaphore::new(0));
        *self.delete_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Make every delete take at least `delay`.
    pub fn slow_deletes(&self, delay: Duration) {
        *self.delete_delay.lock().unwrap() = Some(delay);
    }

    /// Number of delete calls that reached the store.
    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> StorageResult<()> {
        self.inner.put(key, data, content_type).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let gate = self.delete_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        let delay = *self.delete_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let calls = self.deletes.fetch_add(1, Ordering::SeqCst) + 1;
        let result = if self.fail_delete.lock().unwrap().contains(key) {
            Err(StorageError::Io(std::io::Error::other("injected delete failure")))
        } else if self.missing_on_delete.lock().unwrap().contains(key) {
            self.inner.delete(key).await?;
            Err(StorageError::NotFound(key.to_string()))
        } else {
            self.inner.delete(key).await
        };

        if let Some((count, token)) = self.cancel_after.lock().unwrap().as_ref()
            && calls >= *count
        {
            token.cancel();
        }
        result
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other(
                "injected listing failure",
            )));
        }
        self.inner.list_objects(prefix).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}
