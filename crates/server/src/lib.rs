//! HTTP server for the vitrine image service.
//!
//! This crate provides:
//! - Image upload and deletion endpoints
//! - Orphaned image cleanup, on demand and on a cron schedule
//! - A bounded audit queue and an admin audit log endpoint
//! - Prometheus metrics

pub mod audit;
pub mod auth;
pub mod cleanup;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use audit::{AuditEvent, AuditQueue};
pub use auth::TraceId;
pub use cleanup::{CleanupError, CleanupResult, CleanupService};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
