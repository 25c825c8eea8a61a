//! Application state shared across handlers.

use crate::audit::AuditQueue;
use crate::cleanup::CleanupService;
use crate::cleanup::scheduler::{CleanupSchedule, SchedulerStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vitrine_core::config::AppConfig;
use vitrine_metadata::MetadataStore;
use vitrine_storage::{ImageStore, ObjectStore, StorageResult};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Upload pipeline over `storage`.
    pub images: ImageStore,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Cleanup service; `None` when no public URL is configured.
    pub cleanup: Option<Arc<CleanupService>>,
    /// Schedule and liveness of the cleanup scheduler.
    pub scheduler: Arc<SchedulerStatus>,
    /// Audit write queue.
    pub audit: AuditQueue,
    /// Fired on server shutdown.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create the application state.
    ///
    /// Without a public URL, image references cannot be mapped back to
    /// storage keys, so the cleanup service is left uninitialized instead of
    /// treating every stored image as an orphan.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        audit: AuditQueue,
        shutdown: CancellationToken,
    ) -> StorageResult<Self> {
        let images = ImageStore::new(storage.clone(), &config.media)?;

        let cleanup = match images.public_base_url() {
            Some(base_url) => Some(Arc::new(CleanupService::new(
                storage.clone(),
                metadata.clone(),
                base_url.clone(),
                &config.cleanup,
            ))),
            None => {
                tracing::warn!("media.public_url is not set, orphaned image cleanup is disabled");
                None
            }
        };

        let scheduler = Arc::new(SchedulerStatus::new(CleanupSchedule::from_config(
            &config.cleanup,
        )));

        Ok(Self {
            config: Arc::new(config),
            storage,
            images,
            metadata,
            cleanup,
            scheduler,
            audit,
            shutdown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitrine_metadata::SqliteStore;
    use vitrine_storage::FilesystemBackend;

    async fn build_state(config: AppConfig) -> (tempfile::TempDir, AppState) {
        let temp = tempfile::tempdir().unwrap();
        let storage: Arc<dyn ObjectStore> =
            Arc::new(FilesystemBackend::new(temp.path().join("storage")).await.unwrap());
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(temp.path().join("metadata.db")).await.unwrap());
        let shutdown = CancellationToken::new();
        let (audit, _worker) = AuditQueue::spawn(metadata.clone(), 8, shutdown.clone());
        let state = AppState::new(config, storage, metadata, audit, shutdown).unwrap();
        (temp, state)
    }

    #[tokio::test]
    async fn cleanup_initialized_with_public_url() {
        let (_temp, state) = build_state(AppConfig::for_testing()).await;
        let cleanup = state.cleanup.expect("cleanup service");
        assert_eq!(cleanup.base_url().as_str(), "https://images.test");
        assert_eq!(cleanup.prefix(), "projects/");
    }

    #[tokio::test]
    async fn cleanup_uninitialized_without_public_url() {
        let mut config = AppConfig::for_testing();
        config.media.public_url = Some(String::new());
        let (_temp, state) = build_state(config).await;
        assert!(state.cleanup.is_none());
        assert_eq!(state.scheduler.schedule().expression(), "0 3 * * *");
    }
}
