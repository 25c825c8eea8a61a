//! Metadata store abstraction and implementations for vitrine.
//!
//! This crate owns the relational data the image service depends on:
//! - Projects and the public image URLs they reference
//! - The audit log of uploads, deletions and cleanup runs

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{AuditLogQuery, AuditLogRow, NewAuditLog, NewProject, ProjectRow};
pub use postgres::PostgresStore;
pub use repos::{AuditRepo, ProjectRepo};
pub use store::{MetadataStore, SqliteStore};

use std::sync::Arc;
use vitrine_core::config::MetadataConfig;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Postgres {
            url,
            max_connections,
        } => {
            tracing::info!(max_connections, "Connecting to PostgreSQL");
            let store = PostgresStore::from_url(url, *max_connections).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
