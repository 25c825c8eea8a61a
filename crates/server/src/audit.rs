//! Bounded audit write queue.
//!
//! Handlers and the scheduler submit [`AuditEvent`]s without waiting on the
//! database. A single worker task drains the queue into the metadata store.
//! When the queue is full the event is dropped: audit writes must never
//! block or fail the request that produced them.

use crate::metrics::{AUDIT_EVENTS_DROPPED, AUDIT_WRITE_FAILURES};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vitrine_core::AuditAction;
use vitrine_metadata::{MetadataStore, NewAuditLog};

/// Entity type recorded for image events.
pub const IMAGE_ENTITY: &str = "image";

/// One audit event waiting to be written.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub actor: String,
    pub action: AuditAction,
    pub entity_key: Option<String>,
    pub details: serde_json::Value,
    pub user_agent: Option<String>,
}

impl AuditEvent {
    /// Create an image event with empty details.
    pub fn image(actor: impl Into<String>, action: AuditAction) -> Self {
        Self {
            actor: actor.into(),
            action,
            entity_key: None,
            details: serde_json::Value::Object(Default::default()),
            user_agent: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.entity_key = Some(key.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    fn into_row(self) -> NewAuditLog {
        NewAuditLog {
            actor: self.actor,
            action: self.action,
            entity_type: IMAGE_ENTITY.to_string(),
            entity_key: self.entity_key,
            details: self.details,
            user_agent: self.user_agent,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Sending half of the audit queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct AuditQueue {
    tx: mpsc::Sender<NewAuditLog>,
}

impl AuditQueue {
    /// Create the queue and spawn its worker.
    ///
    /// The worker exits when `shutdown` fires, after writing whatever is
    /// already queued, or when every sender has been dropped.
    pub fn spawn(
        metadata: Arc<dyn MetadataStore>,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(metadata, rx, shutdown));
        (Self { tx }, handle)
    }

    /// Submit an event without waiting. Returns false if it was dropped.
    pub fn record(&self, event: AuditEvent) -> bool {
        let action = event.action;
        match self.tx.try_send(event.into_row()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                AUDIT_EVENTS_DROPPED.inc();
                tracing::warn!(action = %action, "Audit queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                AUDIT_EVENTS_DROPPED.inc();
                tracing::warn!(action = %action, "Audit queue closed, dropping event");
                false
            }
        }
    }
}

async fn run_worker(
    metadata: Arc<dyn MetadataStore>,
    mut rx: mpsc::Receiver<NewAuditLog>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            maybe_entry = rx.recv() => match maybe_entry {
                Some(entry) => write_entry(metadata.as_ref(), &entry).await,
                None => break,
            },
            _ = shutdown.cancelled() => {
                rx.close();
                while let Some(entry) = rx.recv().await {
                    write_entry(metadata.as_ref(), &entry).await;
                }
                break;
            }
        }
    }
    tracing::debug!("Audit worker stopped");
}

async fn write_entry(metadata: &dyn MetadataStore, entry: &NewAuditLog) {
    if let Err(e) = metadata.insert_audit_log(entry).await {
        AUDIT_WRITE_FAILURES.inc();
        tracing::error!(
            action = %entry.action,
            entity_key = ?entry.entity_key,
            error = %e,
            "Failed to write audit log"
        );
    }
}
