//! Orphaned image cleanup endpoints.

use crate::audit::AuditEvent;
use crate::auth::AdminIdentity;
use crate::cleanup::{CleanupResult, CleanupService, LastRun};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::Duration;
use vitrine_core::AuditAction;

pub const DRY_RUN_MESSAGE: &str = "Dry run completed - no images were deleted";
pub const CLEANUP_MESSAGE: &str = "Cleanup completed successfully";

#[derive(Debug, Default, Deserialize)]
pub struct CleanupParams {
    #[serde(default, deserialize_with = "query_bool")]
    pub dry_run: bool,
    /// Overrides `cleanup.request_timeout_secs`.
    pub timeout_secs: Option<u64>,
}

/// Parse the boolean spellings accepted in query strings: `1`, `t`, `T`,
/// `TRUE`, `true`, `True` and their false counterparts.
fn parse_query_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn query_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_query_bool(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid boolean value `{raw}`")))
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub message: &'static str,
    pub data: CleanupResult,
}

fn cleanup_service(state: &AppState) -> ApiResult<&Arc<CleanupService>> {
    state
        .cleanup
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("cleanup service is not initialized".to_string()))
}

/// POST /v1/admin/cleanup/images - Run a cleanup now.
///
/// `?dry_run=true` reports orphans without deleting. The run stops issuing
/// deletes once the timeout elapses and returns what it did so far.
pub async fn trigger_cleanup(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    params: Result<Query<CleanupParams>, QueryRejection>,
) -> ApiResult<Json<CleanupResponse>> {
    let Query(params) = params?;
    let service = cleanup_service(&state)?;
    let timeout = match params.timeout_secs {
        Some(0) => return Err(ApiError::BadRequest("timeout_secs must be greater than 0".into())),
        Some(secs) => Duration::from_secs(secs),
        None => state.config.cleanup.request_timeout(),
    };

    tracing::info!(
        dry_run = params.dry_run,
        timeout_secs = timeout.as_secs(),
        "On-demand cleanup requested"
    );
    let result = service
        .reconcile_with_timeout(params.dry_run, timeout, &state.shutdown)
        .await?;

    let action = if params.dry_run {
        AuditAction::ImageCleanupDryRun
    } else {
        AuditAction::ImageCleanup
    };
    state.audit.record(
        AuditEvent::image(identity.actor, action)
            .with_details(serde_json::json!({
                "deleted_images": result.deleted_images,
                "orphaned_images": result.orphaned_images,
                "errors": result.errors.len(),
                "interrupted": result.interrupted,
            }))
            .with_user_agent(identity.user_agent),
    );

    Ok(Json(CleanupResponse {
        success: true,
        message: if params.dry_run {
            DRY_RUN_MESSAGE
        } else {
            CLEANUP_MESSAGE
        },
        data: result,
    }))
}

/// Cleanup service and scheduler status.
#[derive(Debug, Serialize)]
pub struct CleanupStatus {
    pub initialized: bool,
    pub scheduler_running: bool,
    pub schedule: String,
    pub timezone: &'static str,
    pub next_run: Option<DateTime<Utc>>,
    pub running: bool,
    pub last_run: Option<LastRun>,
}

#[derive(Debug, Serialize)]
pub struct CleanupStatusResponse {
    pub success: bool,
    pub data: CleanupStatus,
}

/// GET /v1/admin/cleanup/status - Cleanup service and scheduler status.
pub async fn cleanup_status(State(state): State<AppState>) -> Json<CleanupStatusResponse> {
    let schedule = state.scheduler.schedule();
    let cleanup = state.cleanup.as_deref();

    Json(CleanupStatusResponse {
        success: true,
        data: CleanupStatus {
            initialized: cleanup.is_some(),
            scheduler_running: state.scheduler.is_running(),
            schedule: schedule.expression().to_string(),
            timezone: schedule.timezone().name(),
            next_run: state.scheduler.next_run(),
            running: cleanup.is_some_and(CleanupService::is_running),
            last_run: cleanup.and_then(CleanupService::last_run),
        },
    })
}
