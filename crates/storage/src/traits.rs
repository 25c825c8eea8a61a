//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;

/// One entry of a prefix listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key, relative to the backend root/prefix.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<OffsetDateTime>,
}

/// Object storage backend.
///
/// Listings are always complete: backends that paginate must exhaust every
/// page before returning, since callers diff the listing against other
/// sources of truth.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Put an object, replacing any existing object at `key`.
    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> StorageResult<()>;

    /// Delete an object. Returns [`StorageError::NotFound`](crate::StorageError::NotFound)
    /// when nothing exists at `key`.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List every object whose key starts with `prefix`.
    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;

    /// List every key that starts with `prefix`.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .list_objects(prefix)
            .await?
            .into_iter()
            .map(|info| info.key)
            .collect())
    }

    /// Get the backend name for logging/metrics.
    fn backend_name(&self) -> &'static str;

    /// Check that the backend is reachable and writable.
    async fn health_check(&self) -> StorageResult<()>;
}
