//! Object storage abstraction, backends and image upload pipeline for vitrine.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait with complete (pagination-exhausting) listings
//! - Backends: local filesystem and S3-compatible (AWS S3, Cloudflare R2, MinIO)
//! - [`ImageStore`]: resize, thumbnail and store uploads under the shared key layout

pub mod backends;
pub mod error;
pub mod images;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use images::{ImageStore, UploadResult};
pub use traits::{ObjectInfo, ObjectStore};

use std::sync::Arc;
use vitrine_core::config::StorageConfig;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
            ..
        } => {
            let (endpoint, region) = config.resolved_s3_endpoint().unwrap_or_default();
            let backend = S3Backend::new(
                bucket,
                endpoint,
                region,
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
