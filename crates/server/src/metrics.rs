//! Prometheus metrics for the vitrine server.
//!
//! Exposes counters for cleanup runs, deletions, uploads and the audit queue.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no keys or URLs, only aggregate counts. The endpoint should
//! still be network-restricted to the scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Cleanup metrics
pub static CLEANUP_RUNS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vitrine_cleanup_runs_total",
            "Total orphaned-image cleanup runs by mode and outcome",
        ),
        &["mode", "outcome"],
    )
    .expect("metric creation failed")
});

pub static CLEANUP_OBJECTS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vitrine_cleanup_objects_deleted_total",
        "Total orphaned objects deleted by cleanup runs",
    )
    .expect("metric creation failed")
});

pub static CLEANUP_DELETE_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vitrine_cleanup_delete_errors_total",
        "Total per-object delete failures during cleanup runs",
    )
    .expect("metric creation failed")
});

pub static CLEANUP_ORPHANS_FOUND: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vitrine_cleanup_orphans_found_total",
        "Total orphaned objects found (dry and real runs)",
    )
    .expect("metric creation failed")
});

pub static CLEANUP_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "vitrine_cleanup_duration_seconds",
            "Wall-clock duration of cleanup runs",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
    )
    .expect("metric creation failed")
});

// Upload metrics
pub static IMAGES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vitrine_images_uploaded_total",
        "Total images uploaded (main variant plus thumbnail)",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vitrine_upload_errors_total",
            "Total upload errors by error type",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

// Audit metrics
pub static AUDIT_EVENTS_DROPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vitrine_audit_events_dropped_total",
        "Total audit events dropped because the queue was full or closed",
    )
    .expect("metric creation failed")
});

pub static AUDIT_WRITE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vitrine_audit_write_failures_total",
        "Total audit events that could not be written to the metadata store",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build many routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(CLEANUP_RUNS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CLEANUP_OBJECTS_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CLEANUP_DELETE_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CLEANUP_ORPHANS_FOUND.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CLEANUP_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(IMAGES_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(AUDIT_EVENTS_DROPPED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(AUDIT_WRITE_FAILURES.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record the outcome of one cleanup run.
pub fn record_cleanup_run(dry_run: bool, outcome: &str) {
    let mode = if dry_run { "dry_run" } else { "delete" };
    CLEANUP_RUNS.with_label_values(&[mode, outcome]).inc();
}

/// Helper to record upload errors by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}
