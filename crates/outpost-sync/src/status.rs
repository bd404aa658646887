//! # Status Publisher
//!
//! Keeps the observable queue summary current and forwards changes to the
//! host application.
//!
//! ```text
//! ┌────────────────┐  counts after every  ┌──────────────────┐  watch  ┌──────┐
//! │ SyncProcessor  │ ───────────────────► │ StatusPublisher  │ ──────► │  UI  │
//! │ SyncHandle     │  batch / enqueue     │ SyncQueueStatus  │ ──────► │ host │
//! └────────────────┘                      └──────────────────┘ emitter └──────┘
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::error::SyncResult;
use outpost_core::{ConnectivityState, SyncQueueStatus};
use outpost_db::OperationLogRepository;

// =============================================================================
// Event Emitter
// =============================================================================

/// Pushes sync events to the host application (a desktop shell, a CLI).
pub trait SyncEventEmitter: Send + Sync {
    /// The status value changed.
    fn emit_status(&self, status: &SyncQueueStatus);

    /// A batch finished with `succeeded` operations confirmed.
    fn emit_progress(&self, succeeded: usize, remaining: i64);

    /// An operation failed.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// Emitter for hosts that only read the watch channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncQueueStatus) {}
    fn emit_progress(&self, _succeeded: usize, _remaining: i64) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Publisher
// =============================================================================

pub struct StatusPublisher {
    tx: watch::Sender<SyncQueueStatus>,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl StatusPublisher {
    pub fn new(emitter: Arc<dyn SyncEventEmitter>) -> Self {
        let (tx, _) = watch::channel(SyncQueueStatus::default());
        StatusPublisher { tx, emitter }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncQueueStatus> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> SyncQueueStatus {
        self.tx.borrow().clone()
    }

    fn update(&self, change: impl FnOnce(&mut SyncQueueStatus) -> bool) {
        if self.tx.send_if_modified(change) {
            let status = self.current();
            self.emitter.emit_status(&status);
        }
    }

    pub fn set_syncing(&self, syncing: bool) {
        self.update(|status| {
            let changed = status.is_syncing != syncing;
            status.is_syncing = syncing;
            changed
        });
    }

    pub fn set_connectivity(&self, state: ConnectivityState) {
        self.update(|status| {
            let changed = status.connectivity != state;
            status.connectivity = state;
            changed
        });
    }

    pub fn set_auth_required(&self, required: bool) {
        self.update(|status| {
            let changed = status.auth_required != required;
            status.auth_required = required;
            changed
        });
    }

    pub fn auth_required(&self) -> bool {
        self.tx.borrow().auth_required
    }

    pub fn record_attempt(&self, at: DateTime<Utc>) {
        self.update(|status| {
            status.last_sync_attempt = Some(at);
            true
        });
    }

    pub fn record_success(&self, at: DateTime<Utc>) {
        self.update(|status| {
            status.last_successful_sync = Some(at);
            true
        });
    }

    /// Reports a batch result to the host.
    pub fn progress(&self, succeeded: usize) {
        let remaining = self.tx.borrow().total_count;
        self.emitter.emit_progress(succeeded, remaining);
    }

    /// Reports a failed operation to the host.
    pub fn error(&self, message: &str, retryable: bool) {
        self.emitter.emit_error(message, retryable);
    }

    /// Recomputes queue counts from the operation log.
    pub async fn refresh_counts(
        &self,
        operations: &OperationLogRepository,
        max_attempts: i64,
    ) -> SyncResult<()> {
        let counts = operations.counts(max_attempts).await?;
        debug!(
            pending = counts.pending,
            retrying = counts.retryable_failed,
            failed = counts.permanently_failed,
            "Queue counts refreshed"
        );

        self.update(|status| {
            let before = (
                status.pending_count,
                status.retryable_failed_count,
                status.permanently_failed_count,
            );
            status.apply_counts(counts);
            before != (counts.pending, counts.retryable_failed, counts.permanently_failed)
        });
        Ok(())
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new(Arc::new(NoOpEmitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::{entity, NewOperation, OperationKind, MAX_ATTEMPTS};
    use outpost_db::{Database, DbConfig};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEmitter {
        statuses: Mutex<Vec<SyncQueueStatus>>,
        errors: Mutex<Vec<(String, bool)>>,
    }

    impl SyncEventEmitter for RecordingEmitter {
        fn emit_status(&self, status: &SyncQueueStatus) {
            self.statuses.lock().unwrap().push(status.clone());
        }

        fn emit_progress(&self, _succeeded: usize, _remaining: i64) {}

        fn emit_error(&self, message: &str, retryable: bool) {
            self.errors.lock().unwrap().push((message.to_string(), retryable));
        }
    }

    #[tokio::test]
    async fn test_refresh_counts_publishes() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let operations = db.operations();
        operations
            .enqueue(&NewOperation::new(
                entity::CLIENTS,
                OperationKind::Create,
                json!({}),
                "1020",
            ))
            .await
            .unwrap();

        let emitter = Arc::new(RecordingEmitter::default());
        let publisher = StatusPublisher::new(emitter.clone());
        let mut rx = publisher.subscribe();

        publisher.refresh_counts(&operations, MAX_ATTEMPTS).await.unwrap();

        assert!(rx.has_changed().unwrap());
        let status = rx.borrow_and_update().clone();
        assert_eq!(status.pending_count, 1);
        assert_eq!(status.total_count, 1);
        assert_eq!(emitter.statuses.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unchanged_values_are_not_republished() {
        let emitter = Arc::new(RecordingEmitter::default());
        let publisher = StatusPublisher::new(emitter.clone());

        publisher.set_syncing(true);
        publisher.set_syncing(true);
        publisher.set_auth_required(false);

        assert_eq!(emitter.statuses.lock().unwrap().len(), 1);
        assert!(publisher.current().is_syncing);
    }

    #[test]
    fn test_error_forwarded_to_emitter() {
        let emitter = Arc::new(RecordingEmitter::default());
        let publisher = StatusPublisher::new(emitter.clone());

        publisher.error("HTTP 400", false);

        assert_eq!(
            emitter.errors.lock().unwrap().as_slice(),
            &[("HTTP 400".to_string(), false)]
        );
    }
}
