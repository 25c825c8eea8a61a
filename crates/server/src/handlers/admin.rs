//! Health and audit endpoints.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use vitrine_metadata::{AuditLogQuery, AuditLogRow};

/// Default number of audit entries per page.
const DEFAULT_AUDIT_LIMIT: u32 = 50;
/// Upper bound on audit entries per request.
const MAX_AUDIT_LIMIT: u32 = 500;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /v1/health - Health check.
///
/// Intentionally unauthenticated for load balancers and container probes.
/// Returns only non-sensitive information.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListAuditParams {
    /// 1-based page number.
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
}

/// One audit log entry.
#[derive(Debug, Serialize)]
pub struct AuditLogResponse {
    pub audit_log_id: i64,
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_key: Option<String>,
    pub details: serde_json::Value,
    pub user_agent: Option<String>,
    pub created_at: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total_items: u64,
    pub total_pages: u64,
    pub has_previous: bool,
    pub has_next: bool,
}

impl Pagination {
    fn new(page: u32, limit: u32, total_items: u64) -> Self {
        let total_pages = total_items.div_ceil(u64::from(limit));
        Self {
            page,
            limit,
            total_items,
            total_pages,
            has_previous: page > 1,
            has_next: u64::from(page) < total_pages,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditFilters {
    pub search: String,
}

#[derive(Debug, Serialize)]
pub struct ListAuditResponse {
    pub success: bool,
    pub data: Vec<AuditLogResponse>,
    pub pagination: Pagination,
    /// `null` when no filter is applied.
    pub filters: Option<AuditFilters>,
}

fn audit_row_to_response(row: AuditLogRow) -> ApiResult<AuditLogResponse> {
    let created_at = row
        .created_at
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format created_at: {e}")))?;
    // Details are written by this server as JSON; keep anything else verbatim.
    let details = serde_json::from_str(&row.details)
        .unwrap_or_else(|_| serde_json::Value::String(row.details.clone()));

    Ok(AuditLogResponse {
        audit_log_id: row.audit_log_id,
        actor: row.actor,
        action: row.action,
        entity_type: row.entity_type,
        entity_key: row.entity_key,
        details,
        user_agent: row.user_agent,
        created_at,
    })
}

/// GET /v1/admin/audit - Audit entries, newest first.
///
/// `?page=` and `?limit=` select the window, `?search=` filters on action,
/// entity type, entity key and details.
pub async fn list_audit_logs(
    State(state): State<AppState>,
    params: Result<Query<ListAuditParams>, QueryRejection>,
) -> ApiResult<Json<ListAuditResponse>> {
    let Query(params) = params?;
    let page = params.page.unwrap_or(1).max(1);
    let limit = params
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);
    let search = params
        .search
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let query = AuditLogQuery {
        limit,
        offset: u64::from(page - 1) * u64::from(limit),
        search: search.clone(),
    };
    let total = state.metadata.count_audit_logs(&query).await?;
    let rows = state.metadata.list_audit_logs(&query).await?;
    let data = rows
        .into_iter()
        .map(audit_row_to_response)
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Json(ListAuditResponse {
        success: true,
        data,
        pagination: Pagination::new(page, limit, total),
        filters: search.map(|search| AuditFilters { search }),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination() {
        assert_eq!(
            Pagination::new(1, 2, 5),
            Pagination {
                page: 1,
                limit: 2,
                total_items: 5,
                total_pages: 3,
                has_previous: false,
                has_next: true,
            }
        );
        let last = Pagination::new(3, 2, 5);
        assert!(last.has_previous);
        assert!(!last.has_next);

        let empty = Pagination::new(1, 50, 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next);
    }
}
