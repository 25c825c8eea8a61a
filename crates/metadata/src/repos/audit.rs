//! Audit log repository.

use crate::error::MetadataResult;
use crate::models::{AuditLogQuery, AuditLogRow, NewAuditLog};
use async_trait::async_trait;

/// Append-only audit trail.
#[async_trait]
pub trait AuditRepo: Send + Sync {
    /// Append an entry and return its ID.
    async fn insert_audit_log(&self, entry: &NewAuditLog) -> MetadataResult<i64>;

    /// Most recent entries first.
    async fn list_audit_logs(&self, query: &AuditLogQuery) -> MetadataResult<Vec<AuditLogRow>>;

    /// Number of entries matching the query's search term. Limit and offset
    /// are ignored.
    async fn count_audit_logs(&self, query: &AuditLogQuery) -> MetadataResult<u64>;
}
