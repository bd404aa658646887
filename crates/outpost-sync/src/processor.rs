//! # Sync Processor
//!
//! Drains the operation log against the remote API, one cycle at a time.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          run_cycle(ignore_backoff)                      │
//! │                                                                         │
//! │  in-flight guard taken? ──yes──► AlreadyRunning                        │
//! │  not Online?            ──yes──► Offline                               │
//! │  no credential?         ──yes──► AuthRequired (nothing touched)        │
//! │  paused for auth?       ──yes──► refresh once, or AuthRequired         │
//! │                                                                         │
//! │  for op in active operations (created_at, id):                         │
//! │    ├─ key blocked by an earlier op this cycle ──► skip                 │
//! │    ├─ not eligible (backoff)                  ──► skip, block key      │
//! │    ├─ went offline                            ──► stop (Interrupted)   │
//! │    ├─ adapter.prepare → Deferred              ──► skip, block key      │
//! │    ├─ mark_processing (attempts + 1)                                   │
//! │    ├─ adapter.execute                                                   │
//! │    │    Ok        ──► BEGIN apply + delete op COMMIT                    │
//! │    │    AuthExpired ─► refresh once, resend; else release + pause      │
//! │    │    Err(class) ──► RetryScheduler: retry at t, or permanent        │
//! │    └─ NetworkUnavailable ──► ask the monitor to re-probe               │
//! │                                                                         │
//! │  refresh status counts, plan the follow-up cycle                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operations sharing an `(entity_type, entity_key)` never overtake each
//! other: once one is skipped or fails, later ones for the same key wait
//! for the next cycle.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::adapter::{AdapterContext, AdapterRegistry, EntityAdapter, ExecutionFailure, Readiness, ServerState};
use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncResult;
use crate::scheduler::RetryScheduler;
use crate::status::StatusPublisher;
use outpost_core::{ErrorClass, OperationStatus, PendingOperation};
use outpost_db::{Database, OperationFailure, OperationLogRepository};

// =============================================================================
// Cycle Report
// =============================================================================

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleOutcome {
    /// Every active operation was looked at.
    #[default]
    Completed,
    /// Another cycle holds the in-flight guard.
    AlreadyRunning,
    /// Connectivity was not `Online` when the cycle started.
    Offline,
    /// Connectivity was lost mid-batch; the rest of the batch was left alone.
    Interrupted,
    /// No usable credential; the queue is paused until one is available.
    AuthRequired,
}

/// Counters for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub succeeded: usize,
    /// Failed, retry scheduled.
    pub retrying: usize,
    /// Failed permanently.
    pub failed: usize,
    /// Skipped: waiting on backoff, another operation, or a parent.
    pub skipped: usize,
    /// When the next cycle should run, if at all.
    pub follow_up: Option<Duration>,
}

impl CycleReport {
    fn ended(outcome: CycleOutcome) -> Self {
        CycleReport {
            outcome,
            ..Default::default()
        }
    }
}

enum Dispatch {
    Succeeded,
    Failed { permanent: bool },
    AuthPaused,
}

/// Resets the in-flight flag when the cycle ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// Processor
// =============================================================================

pub struct SyncProcessor {
    db: Database,
    ctx: AdapterContext,
    registry: AdapterRegistry,
    scheduler: RetryScheduler,
    monitor: Arc<ConnectivityMonitor>,
    status: Arc<StatusPublisher>,
    in_flight: AtomicBool,
    follow_up_delay: Duration,
}

impl SyncProcessor {
    pub fn new(
        ctx: AdapterContext,
        registry: AdapterRegistry,
        scheduler: RetryScheduler,
        monitor: Arc<ConnectivityMonitor>,
        status: Arc<StatusPublisher>,
        follow_up_delay: Duration,
    ) -> Self {
        SyncProcessor {
            db: ctx.db.clone(),
            ctx,
            registry,
            scheduler,
            monitor,
            status,
            in_flight: AtomicBool::new(false),
            follow_up_delay,
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn max_attempts(&self) -> i64 {
        self.scheduler.max_attempts()
    }

    fn is_due(&self, op: &PendingOperation, now: DateTime<Utc>, ignore_backoff: bool) -> bool {
        if ignore_backoff {
            op.status != OperationStatus::Processing
                && !op.permanent
                && op.attempts < self.max_attempts()
        } else {
            op.is_eligible(now, self.max_attempts())
        }
    }

    /// Runs one drain of the operation log.
    ///
    /// `ignore_backoff` dispatches operations whose retry time has not come
    /// yet (manual "sync now"); the attempt budget still applies.
    pub async fn run_cycle(&self, ignore_backoff: bool) -> SyncResult<CycleReport> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!("Sync cycle already running");
            return Ok(CycleReport::ended(CycleOutcome::AlreadyRunning));
        };

        if !self.monitor.is_online() {
            debug!(state = %self.monitor.state(), "Skipping sync cycle while not online");
            return Ok(CycleReport::ended(CycleOutcome::Offline));
        }

        if self.ctx.auth.current_credential().await.is_none() {
            warn!("No credential available, sync paused");
            self.status.set_auth_required(true);
            return Ok(CycleReport::ended(CycleOutcome::AuthRequired));
        }

        if self.status.auth_required() && !self.resume_after_auth().await {
            return Ok(CycleReport::ended(CycleOutcome::AuthRequired));
        }

        self.status.record_attempt(Utc::now());
        self.status.set_syncing(true);
        let mut report = CycleReport::default();
        let drained = self.drain(ignore_backoff, &mut report).await;
        self.status.set_syncing(false);

        let operations = self.db.operations();
        self.status
            .refresh_counts(&operations, self.max_attempts())
            .await?;

        if report.succeeded > 0 {
            self.status.record_success(Utc::now());
            self.status.progress(report.succeeded);
        }

        drained?;

        report.follow_up = self.plan_follow_up(&report).await?;

        info!(
            outcome = ?report.outcome,
            succeeded = report.succeeded,
            retrying = report.retrying,
            failed = report.failed,
            skipped = report.skipped,
            follow_up_ms = report.follow_up.map(|d| d.as_millis() as u64),
            "Sync cycle finished"
        );
        Ok(report)
    }

    async fn drain(&self, ignore_backoff: bool, report: &mut CycleReport) -> SyncResult<()> {
        let operations = self.db.operations();
        let queue = operations.list_active(self.max_attempts()).await?;
        if queue.is_empty() {
            return Ok(());
        }

        debug!(queued = queue.len(), "Draining operation log");
        let mut blocked: HashSet<(String, String)> = HashSet::new();

        for queued in queue {
            // Earlier operations in this cycle may have rewritten or removed it
            let Some(op) = operations.get(queued.id).await? else {
                continue;
            };
            let key = (op.entity_type.clone(), op.entity_key.clone());

            if blocked.contains(&key) {
                report.skipped += 1;
                continue;
            }

            let now = Utc::now();
            if !self.is_due(&op, now, ignore_backoff) {
                report.skipped += 1;
                blocked.insert(key);
                continue;
            }

            if !self.monitor.is_online() {
                info!(op_id = op.id, "Connectivity lost, stopping batch");
                report.outcome = CycleOutcome::Interrupted;
                break;
            }

            let Some(adapter) = self.registry.get(&op.entity_type) else {
                let op = operations.mark_processing(op.id, now).await?;
                self.fail(
                    &op,
                    ExecutionFailure::validation(format!(
                        "no adapter registered for entity type {}",
                        op.entity_type
                    )),
                )
                .await?;
                report.failed += 1;
                blocked.insert(key);
                continue;
            };

            match adapter.prepare(&op, &self.ctx).await {
                Ok(Readiness::Ready) => {}
                Ok(Readiness::Deferred(reason)) => {
                    debug!(op_id = op.id, entity_key = %op.entity_key, %reason, "Operation deferred");
                    report.skipped += 1;
                    blocked.insert(key);
                    continue;
                }
                Err(e) => {
                    let op = operations.mark_processing(op.id, now).await?;
                    let permanent = self.fail(&op, ExecutionFailure::from(e)).await?;
                    if permanent {
                        report.failed += 1;
                    } else {
                        report.retrying += 1;
                    }
                    blocked.insert(key);
                    continue;
                }
            }

            let op = match operations.mark_processing(op.id, now).await {
                Ok(op) => op,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };

            debug!(
                op_id = op.id,
                entity_type = %op.entity_type,
                kind = %op.kind,
                attempt = op.attempts,
                "Dispatching operation"
            );

            match self.dispatch(adapter.as_ref(), &op).await? {
                Dispatch::Succeeded => report.succeeded += 1,
                Dispatch::Failed { permanent } => {
                    if permanent {
                        report.failed += 1;
                    } else {
                        report.retrying += 1;
                    }
                    blocked.insert(key);
                }
                Dispatch::AuthPaused => {
                    report.outcome = CycleOutcome::AuthRequired;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Executes one operation, refreshing the credential at most once.
    async fn dispatch(&self, adapter: &dyn EntityAdapter, op: &PendingOperation) -> SyncResult<Dispatch> {
        let mut refreshed = false;

        loop {
            match adapter.execute(op, &self.ctx).await {
                Ok(state) => return self.complete(adapter, op, state).await,
                Err(failure) if failure.class == ErrorClass::AuthExpired => {
                    if !refreshed && self.ctx.auth.refresh().await.is_ok() {
                        debug!(op_id = op.id, "Credential refreshed, resending");
                        refreshed = true;
                        continue;
                    }
                    return self.pause_for_auth(op, failure).await;
                }
                Err(failure) => {
                    let permanent = self.fail(op, failure).await?;
                    return Ok(Dispatch::Failed { permanent });
                }
            }
        }
    }

    /// Folds a success into local records and removes the operation, atomically.
    async fn complete(
        &self,
        adapter: &dyn EntityAdapter,
        op: &PendingOperation,
        state: ServerState,
    ) -> SyncResult<Dispatch> {
        let mut tx = self.db.begin().await?;

        let folded = match adapter.apply(op, &state, &mut *tx).await {
            Ok(()) => OperationLogRepository::mark_succeeded_with(&mut *tx, op.id)
                .await
                .map_err(Into::into),
            Err(e) => Err(e),
        };

        let committed = match folded {
            Ok(()) => tx.commit().await.map_err(Into::into),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        };

        match committed {
            Ok(()) => {
                self.status.set_auth_required(false);
                info!(
                    op_id = op.id,
                    entity_type = %op.entity_type,
                    kind = %op.kind,
                    server_id = ?state.server_id,
                    "Operation synced"
                );
                Ok(Dispatch::Succeeded)
            }
            Err(e) => {
                error!(op_id = op.id, error = %e, "Remote call succeeded but local update failed");
                self.fail(op, ExecutionFailure::new(ErrorClass::LocalStoreError, e.to_string()))
                    .await?;
                Ok(Dispatch::Failed { permanent: true })
            }
        }
    }

    /// Records a failed attempt. Returns true if the failure is permanent.
    async fn fail(&self, op: &PendingOperation, failure: ExecutionFailure) -> SyncResult<bool> {
        let decision: OperationFailure =
            self.scheduler
                .on_failure(op, failure.class, failure.message.clone(), Utc::now());

        self.db.operations().mark_failed(op.id, &decision).await?;
        self.status.error(&failure.message, !decision.permanent);

        if decision.permanent {
            warn!(
                op_id = op.id,
                class = %failure.class,
                attempts = op.attempts,
                error = %failure.message,
                "Operation failed permanently"
            );
        } else {
            warn!(
                op_id = op.id,
                class = %failure.class,
                attempts = op.attempts,
                next_eligible_at = ?decision.next_eligible_at,
                error = %failure.message,
                "Operation failed, retry scheduled"
            );
        }

        if failure.class == ErrorClass::NetworkUnavailable {
            self.monitor.suspect().await;
        }

        Ok(decision.permanent)
    }

    /// Puts the operation back and pauses the queue until a credential works.
    ///
    /// The rejected attempt is given back; no backoff is scheduled.
    async fn pause_for_auth(
        &self,
        op: &PendingOperation,
        failure: ExecutionFailure,
    ) -> SyncResult<Dispatch> {
        self.db.operations().release(op.id).await?;

        warn!(op_id = op.id, error = %failure.message, "Credential rejected, sync paused");
        self.status.set_auth_required(true);
        self.status.error(&failure.message, true);
        Ok(Dispatch::AuthPaused)
    }

    /// While paused for auth, tries one refresh before sending anything.
    async fn resume_after_auth(&self) -> bool {
        match self.ctx.auth.refresh().await {
            Ok(()) => {
                info!("Credential refreshed, resuming sync");
                self.status.set_auth_required(false);
                true
            }
            Err(e) => {
                debug!(error = %e, "Sync still paused for credentials");
                false
            }
        }
    }

    /// Decides when the next cycle should run.
    ///
    /// - work became ready during this cycle → short follow-up
    /// - only future retries remain → after the base delay
    /// - otherwise → none
    async fn plan_follow_up(&self, report: &CycleReport) -> SyncResult<Option<Duration>> {
        if report.outcome != CycleOutcome::Completed {
            return Ok(None);
        }

        let now = Utc::now();
        let active = self.db.operations().list_active(self.max_attempts()).await?;

        let ready_now = active.iter().any(|op| op.is_eligible(now, self.max_attempts()));
        let scheduled = active
            .iter()
            .any(|op| op.next_eligible_at.map_or(false, |at| at > now));

        if ready_now && report.succeeded > 0 {
            Ok(Some(self.follow_up_delay))
        } else if scheduled {
            Ok(Some(self.scheduler.base_delay()))
        } else {
            Ok(None)
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ClientAdapter, PriceListAdapter, PriceListItemAdapter};
    use crate::config::{RetrySettings, SyncConfig};
    use crate::testing::{test_context, MockAuth, MockProbe, MockTransport};
    use crate::transport::{Method, IDEMPOTENCY_HEADER};
    use outpost_core::{new_correlation_key, NewLocalRecord, NewOperation, OperationKind};
    use outpost_db::{LocalMutation, RecordRepository, RecordTable};
    use serde_json::{json, Value};

    struct Harness {
        processor: SyncProcessor,
        db: Database,
        transport: Arc<MockTransport>,
        auth: Arc<MockAuth>,
        probe: Arc<MockProbe>,
        monitor: Arc<ConnectivityMonitor>,
        status: Arc<StatusPublisher>,
    }

    async fn harness() -> Harness {
        let (ctx, transport, auth) = test_context().await;
        let config = SyncConfig {
            retry: RetrySettings {
                jitter_factor: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };

        let probe = Arc::new(MockProbe::new(true));
        let monitor = Arc::new(ConnectivityMonitor::new(probe.clone(), &config));
        monitor.network_available().await;
        let status = Arc::new(StatusPublisher::default());

        let processor = SyncProcessor::new(
            ctx.clone(),
            AdapterRegistry::with_defaults(),
            RetryScheduler::new(&config.retry),
            monitor.clone(),
            status.clone(),
            config.sync.follow_up_delay(),
        );

        Harness {
            processor,
            db: ctx.db,
            transport,
            auth,
            probe,
            monitor,
            status,
        }
    }

    fn client(number: &str) -> Value {
        json!({
            "documentNumber": number,
            "documentType": "CC",
            "clientType": "person",
            "name": format!("Client {}", number)
        })
    }

    async fn create_client(db: &Database, number: &str) -> PendingOperation {
        let data = client(number);
        db.apply_mutation(
            RecordTable::Clients,
            LocalMutation::Insert(NewLocalRecord::new(Some(number.into()), data.clone())),
            ClientAdapter::create_operation(data).unwrap(),
        )
        .await
        .unwrap()
        .operation
    }

    async fn get(db: &Database, id: i64) -> PendingOperation {
        db.operations().get(id).await.unwrap().unwrap()
    }

    const CLIENTS: &str = "/api/clients";

    #[tokio::test]
    async fn test_scenario_a_create_confirms_record() {
        let h = harness().await;
        let op = create_client(&h.db, "U1").await;
        h.transport.reply(
            Method::Post,
            CLIENTS,
            201,
            json!({ "id": 101, "updatedAt": "2024-05-01T10:00:00Z" }),
        );

        let report = h.processor.run_cycle(false).await.unwrap();

        assert_eq!(report.outcome, CycleOutcome::Completed);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.follow_up, None);

        let record = h
            .db
            .records(RecordTable::Clients)
            .resolve("U1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.server_id, Some(101));
        assert!(record.synced);
        assert!(h.db.operations().get(op.id).await.unwrap().is_none());

        let status = h.status.current();
        assert_eq!(status.total_count, 0);
        assert!(status.last_successful_sync.is_some());
        assert!(!status.is_syncing);
    }

    #[tokio::test]
    async fn test_scenario_b_server_errors_exhaust_attempts() {
        let h = harness().await;
        let clients = h.db.records(RecordTable::Clients);
        let record = clients
            .insert(&NewLocalRecord::new(Some("U1".into()), client("U1")))
            .await
            .unwrap();
        let mut conn = h.db.pool().acquire().await.unwrap();
        RecordRepository::confirm_with(&mut conn, RecordTable::Clients, record.local_id, Some(55), None, Utc::now())
            .await
            .unwrap();
        drop(conn);

        let op = h
            .db
            .operations()
            .enqueue(&ClientAdapter::update_operation(client("U1")).unwrap())
            .await
            .unwrap();
        h.transport.reply(Method::Put, "/api/clients/55", 503, Value::Null);

        // First failure: retry in 3s
        let report = h.processor.run_cycle(false).await.unwrap();
        assert_eq!(report.retrying, 1);
        assert_eq!(report.follow_up, Some(Duration::from_secs(3)));
        let first = get(&h.db, op.id).await;
        assert_eq!(first.status, OperationStatus::Failed);
        assert_eq!(first.attempts, 1);
        let gap = first.next_eligible_at.unwrap() - first.last_attempt_at.unwrap();
        assert_eq!(gap.num_seconds(), 3);

        // Backoff holds the operation back
        let report = h.processor.run_cycle(false).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(h.transport.requests().len(), 1);

        // Second failure: the gap grows
        h.processor.run_cycle(true).await.unwrap();
        let second = get(&h.db, op.id).await;
        assert_eq!(second.attempts, 2);
        let gap = second.next_eligible_at.unwrap() - second.last_attempt_at.unwrap();
        assert_eq!(gap.num_seconds(), 6);

        // Third failure exhausts the budget
        let report = h.processor.run_cycle(true).await.unwrap();
        assert_eq!(report.failed, 1);
        let third = get(&h.db, op.id).await;
        assert_eq!(third.status, OperationStatus::Failed);
        assert_eq!(third.attempts, 3);
        assert!(third.permanent);
        assert!(h
            .db
            .operations()
            .list_eligible(Utc::now(), 3)
            .await
            .unwrap()
            .is_empty());

        // Never dispatched again
        h.processor.run_cycle(true).await.unwrap();
        assert_eq!(h.transport.requests().len(), 3);
        assert_eq!(h.status.current().permanently_failed_count, 1);
    }

    #[tokio::test]
    async fn test_scenario_c_child_waits_for_parent() {
        let h = harness().await;
        let key = new_correlation_key();
        let receipt = h
            .db
            .insert_aggregate(
                RecordTable::PriceLists,
                NewLocalRecord::new(None, json!({ "name": "Retail" })).with_correlation_key(&key),
                RecordTable::PriceListItems,
                vec![NewLocalRecord::new(Some("7".into()), json!({ "productId": 7, "price": 10.0 }))],
                PriceListAdapter::create_operation(
                    &key,
                    json!({ "name": "Retail", "lines": [{ "productId": 7, "price": 10.0 }] }),
                ),
            )
            .await
            .unwrap();
        let line = h
            .db
            .apply_mutation(
                RecordTable::PriceListItems,
                LocalMutation::Insert(
                    NewLocalRecord::new(Some("9".into()), json!({ "productId": 9, "price": 15.0 }))
                        .with_parent(Some(receipt.parent.local_id), None),
                ),
                PriceListItemAdapter::line_operation(&receipt.parent, OperationKind::AddLine, 9, Some(15.0)),
            )
            .await
            .unwrap()
            .operation;

        h.transport.reply(Method::Post, "/api/price-lists", 503, Value::Null);
        h.transport.reply(Method::Post, "/api/price-lists", 201, json!({ "id": 812 }));
        h.transport.reply(Method::Post, "/api/price-lists/lines/add", 503, Value::Null);

        // Parent fails, child is deferred without spending an attempt
        let report = h.processor.run_cycle(false).await.unwrap();
        assert_eq!(report.retrying, 1);
        assert_eq!(report.skipped, 1);
        assert!(h.transport.requests_to(Method::Post, "/api/price-lists/lines/add").is_empty());
        assert_eq!(get(&h.db, line.id).await.attempts, 0);

        // Parent succeeds; the child is rewritten and dispatched after it
        let report = h.processor.run_cycle(true).await.unwrap();
        assert_eq!(report.succeeded, 1);

        let line = get(&h.db, line.id).await;
        assert_eq!(line.entity_key, "812:9");
        assert_eq!(line.payload_json().unwrap()["priceListId"], json!(812));
        assert_eq!(line.attempts, 1);

        let sent = h.transport.requests_to(Method::Post, "/api/price-lists/lines/add");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body.as_ref().unwrap()["priceListId"], json!(812));
        assert_eq!(sent[0].header(IDEMPOTENCY_HEADER), Some("812:9"));

        let children = h
            .db
            .records(RecordTable::PriceListItems)
            .list_children(receipt.parent.local_id)
            .await
            .unwrap();
        assert!(children.iter().all(|c| c.parent_server_id == Some(812)));
    }

    #[tokio::test]
    async fn test_scenario_d_network_loss_mid_batch() {
        let h = harness().await;
        let mut ops = Vec::new();
        for n in 1..=5 {
            ops.push(create_client(&h.db, &format!("U{}", n)).await);
            h.transport.reply(Method::Post, CLIENTS, 201, json!({ "id": n }));
        }

        let monitor = h.monitor.clone();
        h.transport.on_send(move |sent| {
            if sent == 2 {
                monitor.network_unavailable();
            }
        });

        let report = h.processor.run_cycle(false).await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::Interrupted);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.follow_up, None);

        for op in &ops[2..] {
            let op = get(&h.db, op.id).await;
            assert_eq!(op.status, OperationStatus::Pending);
            assert_eq!(op.attempts, 0);
            assert!(op.last_attempt_at.is_none());
        }

        // No cycle runs while offline
        let report = h.processor.run_cycle(true).await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::Offline);
        assert_eq!(h.transport.requests().len(), 2);

        h.monitor.network_available().await;
        let report = h.processor.run_cycle(false).await.unwrap();
        assert_eq!(report.succeeded, 3);
        assert_eq!(h.transport.requests().len(), 5);
    }

    #[tokio::test]
    async fn test_scenario_e_validation_error_is_permanent() {
        let h = harness().await;
        let op = create_client(&h.db, "U1").await;
        h.transport.reply(
            Method::Post,
            CLIENTS,
            400,
            json!({ "message": "documentNumber already registered" }),
        );

        let report = h.processor.run_cycle(false).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.follow_up, None);
        let op = get(&h.db, op.id).await;
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.attempts, 1);
        assert!(op.permanent);
        assert!(op.next_eligible_at.is_none());
        assert_eq!(op.error_class, Some(ErrorClass::ValidationError));
        assert!(op.last_error.unwrap().contains("already registered"));

        // The local record stays, unsynced, for the user to correct
        let record = h.db.records(RecordTable::Clients).resolve("U1").await.unwrap().unwrap();
        assert!(!record.synced);
    }

    #[tokio::test]
    async fn test_retries_send_same_idempotency_key() {
        let h = harness().await;
        create_client(&h.db, "U1").await;
        h.transport.reply(Method::Post, CLIENTS, 503, Value::Null);
        h.transport.reply(Method::Post, CLIENTS, 201, json!({ "id": 7 }));

        h.processor.run_cycle(false).await.unwrap();
        let report = h.processor.run_cycle(true).await.unwrap();

        assert_eq!(report.succeeded, 1);
        let sent = h.transport.requests_to(Method::Post, CLIENTS);
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|r| r.header(IDEMPOTENCY_HEADER) == Some("U1")));
    }

    #[tokio::test]
    async fn test_auth_expiry_refreshes_and_resends() {
        let h = harness().await;
        let op = create_client(&h.db, "U1").await;
        h.transport.reply(Method::Post, CLIENTS, 401, Value::Null);
        h.transport.reply(Method::Post, CLIENTS, 201, json!({ "id": 7 }));

        let report = h.processor.run_cycle(false).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(h.auth.refreshes(), 1);
        let sent = h.transport.requests();
        assert_eq!(sent[1].header("Authorization"), Some("Bearer refreshed-1"));
        assert!(h.db.operations().get(op.id).await.unwrap().is_none());
        assert!(!h.status.current().auth_required);
    }

    #[tokio::test]
    async fn test_failed_refresh_pauses_queue() {
        let h = harness().await;
        h.auth.set_refresh_ok(false);
        let first = create_client(&h.db, "U1").await;
        let second = create_client(&h.db, "U2").await;
        h.transport.reply(Method::Post, CLIENTS, 401, Value::Null);

        let report = h.processor.run_cycle(false).await.unwrap();

        assert_eq!(report.outcome, CycleOutcome::AuthRequired);
        assert_eq!(report.follow_up, None);
        assert_eq!(h.transport.requests().len(), 1);

        let first = get(&h.db, first.id).await;
        assert_eq!(first.status, OperationStatus::Pending);
        assert_eq!(first.attempts, 0);
        assert!(first.next_eligible_at.is_none());
        assert_eq!(get(&h.db, second.id).await.attempts, 0);
        assert!(h.status.current().auth_required);
    }

    #[tokio::test]
    async fn test_paused_queue_sends_nothing_until_refresh_works() {
        let h = harness().await;
        h.auth.set_refresh_ok(false);
        let op = create_client(&h.db, "U1").await;
        h.transport.reply(Method::Post, CLIENTS, 401, Value::Null);
        h.transport.reply(Method::Post, CLIENTS, 201, json!({ "id": 7 }));

        for _ in 0..4 {
            let report = h.processor.run_cycle(false).await.unwrap();
            assert_eq!(report.outcome, CycleOutcome::AuthRequired);
        }

        assert_eq!(h.transport.requests().len(), 1);
        let paused = get(&h.db, op.id).await;
        assert_eq!(paused.status, OperationStatus::Pending);
        assert_eq!(paused.attempts, 0);
        assert!(!paused.permanent);

        h.auth.set_refresh_ok(true);
        let report = h.processor.run_cycle(false).await.unwrap();

        assert_eq!(report.outcome, CycleOutcome::Completed);
        assert_eq!(report.succeeded, 1);
        assert!(!h.status.current().auth_required);
        assert!(h.db.operations().get(op.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_keeps_server_canonical_fields() {
        let h = harness().await;
        let clients = h.db.records(RecordTable::Clients);
        let record = clients
            .insert(&NewLocalRecord::new(Some("U1".into()), client("U1")))
            .await
            .unwrap();
        let mut conn = h.db.pool().acquire().await.unwrap();
        RecordRepository::confirm_with(&mut conn, RecordTable::Clients, record.local_id, Some(55), None, Utc::now())
            .await
            .unwrap();
        drop(conn);
        h.db
            .operations()
            .enqueue(&ClientAdapter::update_operation(client("U1")).unwrap())
            .await
            .unwrap();
        h.transport.reply(
            Method::Put,
            "/api/clients/55",
            200,
            json!({
                "id": 55,
                "documentNumber": "U1",
                "name": "Canonical Name",
                "updatedAt": "2024-05-02T08:00:00Z"
            }),
        );

        let report = h.processor.run_cycle(false).await.unwrap();

        assert_eq!(report.succeeded, 1);
        let stored = clients.resolve("U1").await.unwrap().unwrap();
        let data = stored.data_json().unwrap();
        assert_eq!(data["name"], json!("Canonical Name"));
        assert_eq!(data["documentType"], json!("CC"));
        assert!(stored.synced);
    }

    #[tokio::test]
    async fn test_edit_then_delete_drains_cleanly() {
        let h = harness().await;
        let clients = h.db.records(RecordTable::Clients);
        let record = clients
            .insert(&NewLocalRecord::new(Some("U1".into()), client("U1")))
            .await
            .unwrap();
        let mut conn = h.db.pool().acquire().await.unwrap();
        let record = RecordRepository::confirm_with(&mut conn, RecordTable::Clients, record.local_id, Some(55), None, Utc::now())
            .await
            .unwrap();
        drop(conn);

        let mut edited = client("U1");
        edited["name"] = json!("Edited");
        h.db.apply_mutation(
            RecordTable::Clients,
            LocalMutation::Update {
                local_id: record.local_id,
                data: edited.clone(),
            },
            ClientAdapter::update_operation(edited).unwrap(),
        )
        .await
        .unwrap();
        h.db.apply_mutation(
            RecordTable::Clients,
            LocalMutation::Delete {
                local_id: record.local_id,
            },
            ClientAdapter::delete_operation(&record).unwrap(),
        )
        .await
        .unwrap();
        h.transport.reply(Method::Delete, "/api/clients/55", 204, Value::Null);

        let report = h.processor.run_cycle(false).await.unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);
        assert!(h.transport.requests_to(Method::Put, "/api/clients/55").is_empty());
        assert_eq!(h.transport.requests_to(Method::Delete, "/api/clients/55").len(), 1);
        assert_eq!(h.status.current().total_count, 0);
    }

    #[tokio::test]
    async fn test_offline_cycle_leaves_last_attempt_unset() {
        let h = harness().await;
        create_client(&h.db, "U1").await;
        h.monitor.network_unavailable();

        h.processor.run_cycle(false).await.unwrap();

        assert!(h.status.current().last_sync_attempt.is_none());
    }

    #[tokio::test]
    async fn test_missing_credential_touches_nothing() {
        let h = harness().await;
        h.auth.set_token(None);
        let op = create_client(&h.db, "U1").await;

        let report = h.processor.run_cycle(false).await.unwrap();

        assert_eq!(report.outcome, CycleOutcome::AuthRequired);
        assert!(h.transport.requests().is_empty());
        assert_eq!(get(&h.db, op.id).await.attempts, 0);
        assert!(h.status.current().auth_required);
    }

    #[tokio::test]
    async fn test_offline_cycle_returns_immediately() {
        let h = harness().await;
        create_client(&h.db, "U1").await;
        h.monitor.network_unavailable();

        let report = h.processor.run_cycle(false).await.unwrap();

        assert_eq!(report.outcome, CycleOutcome::Offline);
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_rejected() {
        let h = harness().await;
        create_client(&h.db, "U1").await;

        let guard = InFlightGuard::acquire(&h.processor.in_flight).unwrap();
        let report = h.processor.run_cycle(false).await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::AlreadyRunning);
        assert!(h.transport.requests().is_empty());

        drop(guard);
        let report = h.processor.run_cycle(false).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(!h.processor.is_running());
    }

    #[tokio::test]
    async fn test_unknown_entity_type_fails_permanently() {
        let h = harness().await;
        let op = h
            .db
            .operations()
            .enqueue(&NewOperation::new("invoices", OperationKind::Create, json!({}), "F-1"))
            .await
            .unwrap();

        let report = h.processor.run_cycle(false).await.unwrap();

        assert_eq!(report.failed, 1);
        let op = get(&h.db, op.id).await;
        assert!(op.permanent);
        assert_eq!(op.error_class, Some(ErrorClass::ValidationError));
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failed_operation_blocks_later_ones_for_same_key() {
        let h = harness().await;
        create_client(&h.db, "U1").await;
        let update = h
            .db
            .operations()
            .enqueue(&ClientAdapter::update_operation(client("U1")).unwrap())
            .await
            .unwrap();
        h.transport.reply(Method::Post, CLIENTS, 503, Value::Null);

        let report = h.processor.run_cycle(false).await.unwrap();

        assert_eq!(report.retrying, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(get(&h.db, update.id).await.attempts, 0);
    }

    #[tokio::test]
    async fn test_network_failure_triggers_reprobe() {
        let h = harness().await;
        let first = create_client(&h.db, "U1").await;
        let second = create_client(&h.db, "U2").await;
        h.transport.fail(Method::Post, CLIENTS);
        h.probe.set_healthy(false);

        let report = h.processor.run_cycle(false).await.unwrap();

        assert_eq!(report.outcome, CycleOutcome::Interrupted);
        assert_eq!(report.retrying, 1);
        assert_eq!(h.monitor.state(), outpost_core::ConnectivityState::Offline);

        let first = get(&h.db, first.id).await;
        assert_eq!(first.error_class, Some(ErrorClass::NetworkUnavailable));
        assert!(!first.permanent);
        assert_eq!(get(&h.db, second.id).await.attempts, 0);
    }

    #[tokio::test]
    async fn test_delete_for_never_synced_client_drains_locally() {
        let h = harness().await;
        let record = h
            .db
            .records(RecordTable::Clients)
            .insert(&NewLocalRecord::new(Some("U1".into()), client("U1")))
            .await
            .unwrap();
        h.db.apply_mutation(
            RecordTable::Clients,
            LocalMutation::Delete {
                local_id: record.local_id,
            },
            ClientAdapter::delete_operation(&record).unwrap(),
        )
        .await
        .unwrap();

        let report = h.processor.run_cycle(false).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert!(h.transport.requests().is_empty());
        assert_eq!(h.status.current().total_count, 0);
    }
}
