//! Cron-driven cleanup scheduler.
//!
//! The scheduler sleeps until the next cron occurrence, runs a non-dry
//! cleanup and logs the outcome. Failures never escape the loop: the server
//! keeps serving whatever happens to a scheduled run.

use super::{CleanupError, CleanupService};
use crate::audit::{AuditEvent, AuditQueue};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vitrine_core::AuditAction;
use vitrine_core::config::{CleanupConfig, DEFAULT_CLEANUP_SCHEDULE};

/// Audit actor for scheduled runs.
pub const SCHEDULER_ACTOR: &str = "scheduler";

/// Day names indexed by Unix day-of-week number; 0 and 7 are both Sunday.
const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Parse a cron expression.
///
/// Five-field Unix expressions get a leading seconds field of `0` and their
/// day-of-week numbers rewritten as names, since `cron` counts days from
/// 1 = Sunday. Six and seven field expressions are passed through unchanged.
pub fn parse_cron(expression: &str) -> Result<Schedule, cron::error::Error> {
    let trimmed = expression.trim();
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if let &[minute, hour, day, month, weekday] = fields.as_slice() {
        let weekday = unix_day_of_week(weekday);
        Schedule::from_str(&format!("0 {minute} {hour} {day} {month} {weekday}"))
    } else {
        Schedule::from_str(trimmed)
    }
}

fn day_number(token: &str) -> Option<usize> {
    token.parse().ok().filter(|n| *n < WEEKDAYS.len())
}

/// Rewrite a Unix day-of-week field with day names, keeping lists, ranges
/// and steps. Anything that is not a day number is left for `cron` to judge.
fn unix_day_of_week(field: &str) -> String {
    field.split(',').map(unix_day_item).collect::<Vec<_>>().join(",")
}

fn unix_day_item(item: &str) -> String {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };
    let bounds = match range.split_once('-') {
        Some(bounds) => bounds,
        // `n/step` runs from n to Saturday.
        None if step.is_some() => (range, "6"),
        None => {
            return day_number(range)
                .map_or_else(|| range.to_string(), |n| WEEKDAYS[n].to_string());
        }
    };
    let (Some(from), Some(to)) = (day_number(bounds.0), day_number(bounds.1)) else {
        return item.to_string();
    };
    if from == 7 {
        return "SUN".to_string();
    }
    if from > to {
        return item.to_string();
    }

    let suffix = step.map(|step| format!("/{step}")).unwrap_or_default();
    if to == 7 && from > 0 {
        // Ranges cannot wrap, so Sunday-as-7 becomes its own item.
        let lands_on_sunday = match step {
            None => true,
            Some(step) => step
                .parse::<usize>()
                .is_ok_and(|step| step > 0 && (7 - from) % step == 0),
        };
        let until_saturday = format!("{}-SAT{suffix}", WEEKDAYS[from]);
        if lands_on_sunday {
            format!("{until_saturday},SUN")
        } else {
            until_saturday
        }
    } else {
        format!("{}-{}{suffix}", WEEKDAYS[from], WEEKDAYS[to.min(6)])
    }
}

/// The active schedule and the timezone it is evaluated in.
#[derive(Clone, Debug)]
pub struct CleanupSchedule {
    expression: String,
    schedule: Schedule,
    timezone: Tz,
}

impl CleanupSchedule {
    /// Build the schedule from configuration.
    ///
    /// An invalid expression or timezone is logged and replaced by the
    /// default (`0 3 * * *` in UTC) rather than refusing to start.
    pub fn from_config(config: &CleanupConfig) -> Self {
        let (expression, schedule) = match parse_cron(&config.schedule) {
            Ok(schedule) => (config.schedule.trim().to_string(), schedule),
            Err(e) => {
                tracing::warn!(
                    schedule = %config.schedule,
                    error = %e,
                    default = DEFAULT_CLEANUP_SCHEDULE,
                    "Invalid cleanup schedule, using default"
                );
                (DEFAULT_CLEANUP_SCHEDULE.to_string(), default_schedule())
            }
        };

        let timezone = match config.timezone.as_deref().map(str::trim) {
            None | Some("") => chrono_tz::UTC,
            Some(name) => name.parse::<Tz>().unwrap_or_else(|e| {
                tracing::warn!(timezone = %name, error = %e, "Invalid cleanup timezone, using UTC");
                chrono_tz::UTC
            }),
        };

        Self {
            expression,
            schedule,
            timezone,
        }
    }

    /// The expression actually in effect.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Next occurrence strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&now.with_timezone(&self.timezone))
            .next()
            .map(|next| next.with_timezone(&Utc))
    }
}

fn default_schedule() -> Schedule {
    parse_cron(DEFAULT_CLEANUP_SCHEDULE).expect("default cleanup schedule is valid")
}

/// Scheduler state shown by the status endpoint.
#[derive(Debug)]
pub struct SchedulerStatus {
    schedule: CleanupSchedule,
    running: AtomicBool,
    next_run: Mutex<Option<DateTime<Utc>>>,
}

impl SchedulerStatus {
    pub fn new(schedule: CleanupSchedule) -> Self {
        Self {
            schedule,
            running: AtomicBool::new(false),
            next_run: Mutex::new(None),
        }
    }

    pub fn schedule(&self) -> &CleanupSchedule {
        &self.schedule
    }

    /// Whether the scheduler task is alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        *self.next_run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_next_run(&self, next: Option<DateTime<Utc>>) {
        *self.next_run.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

/// Spawn the scheduler loop.
///
/// The task exits when `shutdown` fires. A run in progress at that moment
/// observes the same token and stops issuing deletes.
pub fn spawn_scheduler(
    service: Arc<CleanupService>,
    status: Arc<SchedulerStatus>,
    audit: AuditQueue,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    status.running.store(true, Ordering::SeqCst);
    tokio::spawn(async move {
        tracing::info!(
            schedule = %status.schedule.expression(),
            timezone = %status.schedule.timezone().name(),
            "Cleanup scheduler started"
        );

        loop {
            let now = Utc::now();
            let Some(next) = status.schedule.next_after(now) else {
                tracing::warn!("Cleanup schedule has no upcoming occurrence, stopping scheduler");
                break;
            };
            status.set_next_run(Some(next));
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!(next_run = %next, "Next scheduled cleanup");

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            run_scheduled(&service, &audit, &shutdown).await;
            if shutdown.is_cancelled() {
                break;
            }
        }

        status.set_next_run(None);
        status.running.store(false, Ordering::SeqCst);
        tracing::info!("Cleanup scheduler stopped");
    })
}

/// Run one scheduled cleanup and log its summary.
pub async fn run_scheduled(
    service: &CleanupService,
    audit: &AuditQueue,
    shutdown: &CancellationToken,
) {
    tracing::info!("Starting scheduled orphaned image cleanup");
    match service.reconcile(false, shutdown).await {
        Ok(result) => {
            tracing::info!(
                deleted = result.deleted_images,
                total = result.total_r2_images,
                orphaned = result.orphaned_images,
                errors = result.errors.len(),
                duration_secs = result.duration_seconds,
                "Scheduled cleanup completed"
            );
            audit.record(
                AuditEvent::image(SCHEDULER_ACTOR, AuditAction::ImageCleanup).with_details(
                    serde_json::json!({
                        "deleted_images": result.deleted_images,
                        "orphaned_images": result.orphaned_images,
                        "errors": result.errors.len(),
                        "interrupted": result.interrupted,
                    }),
                ),
            );
        }
        Err(CleanupError::AlreadyRunning) => {
            tracing::info!("Cleanup already in progress, skipping scheduled run");
        }
        Err(e) => {
            tracing::error!(error = %e, "Scheduled cleanup failed");
        }
    }
}
