//! Orphaned image cleanup.
//!
//! A run reconciles two sources of truth: the keys stored under the managed
//! prefix and the image URLs referenced by projects. Every stored key that no
//! project references (directly or as the thumbnail of a referenced image) is
//! an orphan. Orphans are reported, and unless the run is a dry run, deleted
//! one by one.
//!
//! Listing and reference loading are all-or-nothing: if either fails the run
//! aborts before deleting anything, because a partial view of either side
//! would make in-use images look orphaned. Individual delete failures are
//! collected and the run carries on.

pub mod scheduler;

use crate::metrics::{
    self, CLEANUP_DELETE_ERRORS, CLEANUP_DURATION, CLEANUP_OBJECTS_DELETED, CLEANUP_ORPHANS_FOUND,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use vitrine_core::config::CleanupConfig;
use vitrine_core::{PublicBaseUrl, collect_in_use_keys};
use vitrine_metadata::{MetadataError, MetadataStore};
use vitrine_storage::{ObjectStore, StorageError};

/// Errors that abort a cleanup run.
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("a cleanup run is already in progress")]
    AlreadyRunning,

    #[error("failed to list stored images: {0}")]
    Listing(#[source] StorageError),

    #[error("failed to load image references: {0}")]
    References(#[source] MetadataError),
}

/// Report of one cleanup run.
///
/// `total_r2_images == used_images_in_store + orphaned_images + skipped_recent`
/// holds for every completed run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupResult {
    /// Keys found under the managed prefix.
    pub total_r2_images: usize,
    /// Keys referenced by projects, thumbnails included.
    pub used_images: usize,
    /// Referenced keys that are actually stored.
    pub used_images_in_store: usize,
    pub orphaned_images: usize,
    /// Always 0 for a dry run.
    pub deleted_images: usize,
    /// Deleted keys, or the keys a dry run would delete.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted_keys: Vec<String>,
    /// `"<key>: <error>"` for every failed delete.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Orphans left alone because they are younger than the grace period.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub skipped_recent: usize,
    /// The run was cancelled before every orphan was processed.
    #[serde(default, skip_serializing_if = "is_false")]
    pub interrupted: bool,
    pub dry_run: bool,
    pub duration_seconds: f64,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl CleanupResult {
    fn outcome(&self) -> &'static str {
        if self.interrupted {
            "interrupted"
        } else if !self.errors.is_empty() {
            "partial"
        } else {
            "completed"
        }
    }
}

/// Summary of the most recent finished run, successful or not.
#[derive(Clone, Debug, Serialize)]
pub struct LastRun {
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    /// `completed`, `partial`, `interrupted` or `failed`.
    pub outcome: &'static str,
    pub total_r2_images: usize,
    pub orphaned_images: usize,
    pub deleted_images: usize,
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_seconds: f64,
}

/// Which unreferenced objects are old enough to delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AgeCutoff {
    /// No grace period.
    Disabled,
    /// Objects modified at or before this instant.
    At(OffsetDateTime),
    /// The grace period reaches back past the earliest representable
    /// date, so every object is recent.
    Unreachable,
}

impl AgeCutoff {
    fn new(min_age: Duration, now: OffsetDateTime) -> Self {
        if min_age.is_zero() {
            return Self::Disabled;
        }
        time::Duration::try_from(min_age)
            .ok()
            .and_then(|age| now.checked_sub(age))
            .map_or(Self::Unreachable, Self::At)
    }

    /// Unknown modification times count as recent.
    fn is_recent(self, last_modified: Option<OffsetDateTime>) -> bool {
        match self {
            Self::Disabled => false,
            Self::At(cutoff) => !last_modified.is_some_and(|modified| modified <= cutoff),
            Self::Unreachable => true,
        }
    }
}

/// Clears the running flag when a non-dry run ends.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Reconciles stored images against project references.
pub struct CleanupService {
    store: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    base_url: PublicBaseUrl,
    prefix: String,
    min_orphan_age: Duration,
    /// Held for the whole of a non-dry run.
    run_lock: tokio::sync::Mutex<()>,
    running: AtomicBool,
    last_run: Mutex<Option<LastRun>>,
}

impl std::fmt::Debug for CleanupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupService")
            .field("backend", &self.store.backend_name())
            .field("base_url", &self.base_url)
            .field("prefix", &self.prefix)
            .field("min_orphan_age", &self.min_orphan_age)
            .finish_non_exhaustive()
    }
}

impl CleanupService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        base_url: PublicBaseUrl,
        config: &CleanupConfig,
    ) -> Self {
        Self {
            store,
            metadata,
            base_url,
            prefix: config.prefix.clone(),
            min_orphan_age: Duration::from_secs(config.min_orphan_age_secs),
            run_lock: tokio::sync::Mutex::new(()),
            running: AtomicBool::new(false),
            last_run: Mutex::new(None),
        }
    }

    /// Key prefix this service reconciles.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn base_url(&self) -> &PublicBaseUrl {
        &self.base_url
    }

    /// Whether a non-dry run is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Summary of the most recent finished run.
    pub fn last_run(&self) -> Option<LastRun> {
        self.last_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one reconciliation.
    ///
    /// `cancel` is checked before every delete. Once it fires, no further
    /// deletes are issued and the partial result comes back with
    /// `interrupted` set. Non-dry runs are single-flight: a second one fails
    /// with [`CleanupError::AlreadyRunning`] instead of waiting.
    #[instrument(skip(self, cancel), fields(prefix = %self.prefix))]
    pub async fn reconcile(
        &self,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<CleanupResult, CleanupError> {
        let started = Instant::now();
        let _guard = if dry_run {
            None
        } else {
            let Ok(guard) = self.run_lock.try_lock() else {
                metrics::record_cleanup_run(dry_run, "rejected");
                return Err(CleanupError::AlreadyRunning);
            };
            self.running.store(true, Ordering::SeqCst);
            Some((guard, RunningFlag(&self.running)))
        };

        let outcome = self.run(dry_run, cancel, started).await;
        self.finish(dry_run, &outcome, started);
        outcome
    }

    /// Run one reconciliation that stops deleting after `timeout`.
    ///
    /// Cancelling `parent` (server shutdown) stops it early as well.
    pub async fn reconcile_with_timeout(
        &self,
        dry_run: bool,
        timeout: Duration,
        parent: &CancellationToken,
    ) -> Result<CleanupResult, CleanupError> {
        let cancel = parent.child_token();
        let timer = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            })
        };
        let result = self.reconcile(dry_run, &cancel).await;
        timer.abort();
        result
    }

    async fn run(
        &self,
        dry_run: bool,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<CleanupResult, CleanupError> {
        let listing = self
            .store
            .list_objects(&self.prefix)
            .await
            .map_err(CleanupError::Listing)?;

        // References are read after the listing: an image uploaded in between
        // is not in the listing, so it cannot be deleted by this run.
        let projects = self
            .metadata
            .list_project_images()
            .await
            .map_err(CleanupError::References)?;
        let in_use = collect_in_use_keys(&self.base_url, projects.iter().flatten());

        let cutoff = AgeCutoff::new(self.min_orphan_age, OffsetDateTime::now_utc());

        let mut result = CleanupResult {
            total_r2_images: listing.len(),
            used_images: in_use.len(),
            dry_run,
            ..Default::default()
        };

        let mut orphans = Vec::new();
        for object in listing {
            if in_use.contains(&object.key) {
                result.used_images_in_store += 1;
                continue;
            }
            if cutoff.is_recent(object.last_modified) {
                result.skipped_recent += 1;
                continue;
            }
            orphans.push(object.key);
        }
        result.orphaned_images = orphans.len();
        CLEANUP_ORPHANS_FOUND.inc_by(orphans.len() as u64);

        if dry_run {
            result.deleted_keys = orphans;
        } else {
            let total = orphans.len();
            for (index, key) in orphans.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    tracing::warn!(
                        remaining = total - index,
                        "Cleanup cancelled, stopping before remaining deletes"
                    );
                    result.interrupted = true;
                    break;
                }
                match self.store.delete(&key).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        tracing::debug!(key = %key, "Orphan already gone");
                    }
                    Err(e) => {
                        CLEANUP_DELETE_ERRORS.inc();
                        tracing::warn!(key = %key, error = %e, "Failed to delete orphaned image");
                        result.errors.push(format!("{key}: {e}"));
                        continue;
                    }
                }
                result.deleted_images += 1;
                result.deleted_keys.push(key);
            }
            CLEANUP_OBJECTS_DELETED.inc_by(result.deleted_images as u64);
        }

        result.duration_seconds = started.elapsed().as_secs_f64();
        Ok(result)
    }

    fn finish(
        &self,
        dry_run: bool,
        outcome: &Result<CleanupResult, CleanupError>,
        started: Instant,
    ) {
        let duration = started.elapsed().as_secs_f64();
        CLEANUP_DURATION.observe(duration);

        let summary = match outcome {
            Ok(result) => {
                tracing::info!(
                    dry_run,
                    total = result.total_r2_images,
                    used = result.used_images_in_store,
                    orphaned = result.orphaned_images,
                    deleted = result.deleted_images,
                    skipped_recent = result.skipped_recent,
                    errors = result.errors.len(),
                    interrupted = result.interrupted,
                    duration_secs = result.duration_seconds,
                    "Cleanup run finished"
                );
                LastRun {
                    finished_at: Utc::now(),
                    dry_run,
                    outcome: result.outcome(),
                    total_r2_images: result.total_r2_images,
                    orphaned_images: result.orphaned_images,
                    deleted_images: result.deleted_images,
                    errors: result.errors.len(),
                    error: None,
                    duration_seconds: result.duration_seconds,
                }
            }
            Err(e) => {
                tracing::error!(dry_run, error = %e, "Cleanup run failed");
                LastRun {
                    finished_at: Utc::now(),
                    dry_run,
                    outcome: "failed",
                    total_r2_images: 0,
                    orphaned_images: 0,
                    deleted_images: 0,
                    errors: 0,
                    error: Some(e.to_string()),
                    duration_seconds: duration,
                }
            }
        };

        metrics::record_cleanup_run(dry_run, summary.outcome);
        *self.last_run.lock().unwrap_or_else(PoisonError::into_inner) = Some(summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_omits_empty_optional_fields() {
        let result = CleanupResult {
            total_r2_images: 2,
            used_images: 2,
            used_images_in_store: 2,
            dry_run: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        let obj = json.as_object().unwrap();
        for absent in ["deleted_keys", "errors", "skipped_recent", "interrupted"] {
            assert!(!obj.contains_key(absent), "{absent} should be omitted");
        }
        assert_eq!(json["dry_run"], true);
        assert_eq!(json["deleted_images"], 0);
    }

    #[test]
    fn test_result_includes_populated_fields() {
        let result = CleanupResult {
            deleted_keys: vec!["projects/a.jpg".into()],
            errors: vec!["projects/b.jpg: boom".into()],
            skipped_recent: 1,
            interrupted: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["deleted_keys"][0], "projects/a.jpg");
        assert_eq!(json["errors"][0], "projects/b.jpg: boom");
        assert_eq!(json["skipped_recent"], 1);
        assert_eq!(json["interrupted"], true);
        assert_eq!(result.outcome(), "interrupted");
    }

    #[test]
    fn test_age_cutoff() {
        let now = time::macros::datetime!(2025-06-01 12:00 UTC);
        let hour_ago = now - time::Duration::HOUR;

        let disabled = AgeCutoff::new(Duration::ZERO, now);
        assert_eq!(disabled, AgeCutoff::Disabled);
        assert!(!disabled.is_recent(None));
        assert!(!disabled.is_recent(Some(now)));

        let cutoff = AgeCutoff::new(Duration::from_secs(1800), now);
        assert!(!cutoff.is_recent(Some(hour_ago)));
        assert!(cutoff.is_recent(Some(now)));
        assert!(cutoff.is_recent(None));
    }

    #[test]
    fn test_age_cutoff_past_representable_range() {
        let now = time::macros::datetime!(2025-06-01 12:00 UTC);

        for secs in [1_000_000_000_000, i64::MAX as u64, u64::MAX] {
            let cutoff = AgeCutoff::new(Duration::from_secs(secs), now);
            assert_eq!(cutoff, AgeCutoff::Unreachable, "{secs}");
            assert!(cutoff.is_recent(Some(OffsetDateTime::UNIX_EPOCH)));
            assert!(cutoff.is_recent(None));
        }
    }
}
