//! # Sync Engine
//!
//! Wires the processor, connectivity monitor, pull service and status
//! publisher together and drives them from one background loop.
//!
//! ## Task Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            SyncEngine::start                            │
//! │                                                                         │
//! │  1. Processing → Pending for operations a crash left in flight         │
//! │  2. Publish initial queue counts                                       │
//! │  3. Spawn:                                                              │
//! │                                                                         │
//! │   ┌────────────────────┐        ┌─────────────────────────────────┐    │
//! │   │ ConnectivityMonitor│ watch  │          Engine loop            │    │
//! │   │ periodic probe     │───────►│  select! {                      │    │
//! │   └────────────────────┘        │    command (submit wake,        │    │
//! │                                 │             sync_now, pull)     │    │
//! │   ┌────────────────────┐ mpsc   │    connectivity → Online:       │    │
//! │   │ SyncHandle (Clone) │───────►│        cycle, then pull         │    │
//! │   └────────────────────┘        │    follow-up timer → cycle      │    │
//! │                                 │    shutdown                     │    │
//! │                                 │  }                              │    │
//! │                                 └─────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All cycles run on the engine loop, one at a time.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::adapter::{AdapterContext, AdapterRegistry};
use crate::auth::{AuthProvider, SharedRefresh};
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, HealthProbe, HttpHealthProbe};
use crate::error::{SyncError, SyncResult};
use crate::processor::{CycleReport, SyncProcessor};
use crate::pull::{PullReport, PullService};
use crate::scheduler::RetryScheduler;
use crate::status::{NoOpEmitter, StatusPublisher, SyncEventEmitter};
use crate::transport::{HttpTransport, Transport};
use outpost_core::{ConnectivityState, NewLocalRecord, NewOperation, PendingOperation, SyncQueueStatus};
use outpost_db::{AggregateReceipt, Database, LocalMutation, MutationReceipt, RecordTable};

const COMMAND_BUFFER: usize = 64;

enum Command {
    /// Run a cycle that respects backoff.
    Wake,
    /// Run a cycle that ignores backoff and report it.
    SyncNow(oneshot::Sender<SyncResult<CycleReport>>),
    Pull(oneshot::Sender<SyncResult<Vec<PullReport>>>),
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SyncEngine`]. A database and an auth provider are required;
/// everything else defaults to the HTTP implementations and the built-in
/// adapters.
pub struct SyncEngineBuilder {
    config: SyncConfig,
    db: Option<Database>,
    transport: Option<Arc<dyn Transport>>,
    auth: Option<Arc<dyn AuthProvider>>,
    probe: Option<Arc<dyn HealthProbe>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
    registry: Option<AdapterRegistry>,
}

impl SyncEngineBuilder {
    pub fn new(config: SyncConfig) -> Self {
        SyncEngineBuilder {
            config,
            db: None,
            transport: None,
            auth: None,
            probe: None,
            emitter: None,
            registry: None,
        }
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Sets the host callback for status, progress and error events.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Replaces the built-in adapters.
    pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> SyncResult<SyncEngine> {
        self.config.validate()?;

        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;
        let auth = self
            .auth
            .ok_or_else(|| SyncError::InvalidConfig("Auth provider required".into()))?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config.api)?),
        };
        let probe: Arc<dyn HealthProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(HttpHealthProbe::new(&self.config)?),
        };
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));
        let registry = self.registry.unwrap_or_else(AdapterRegistry::with_defaults);

        let auth: Arc<dyn AuthProvider> = Arc::new(SharedRefresh::new(auth));
        let ctx = AdapterContext::new(db.clone(), transport, auth);

        let monitor = Arc::new(ConnectivityMonitor::new(probe, &self.config));
        let status = Arc::new(StatusPublisher::new(emitter));

        let processor = SyncProcessor::new(
            ctx.clone(),
            registry.clone(),
            RetryScheduler::new(&self.config.retry),
            monitor.clone(),
            status.clone(),
            self.config.sync.follow_up_delay(),
        );
        let pull = PullService::new(
            ctx,
            registry.clone(),
            self.config.sync.page_size,
            self.config.sync.retention_days,
        );

        Ok(SyncEngine {
            config: self.config,
            db,
            registry,
            processor: Arc::new(processor),
            pull: Arc::new(pull),
            monitor,
            status,
        })
    }
}

// =============================================================================
// Engine
// =============================================================================

/// A configured engine, ready to start.
pub struct SyncEngine {
    config: SyncConfig,
    db: Database,
    registry: AdapterRegistry,
    processor: Arc<SyncProcessor>,
    pull: Arc<PullService>,
    monitor: Arc<ConnectivityMonitor>,
    status: Arc<StatusPublisher>,
}

impl SyncEngine {
    pub fn builder(config: SyncConfig) -> SyncEngineBuilder {
        SyncEngineBuilder::new(config)
    }

    /// Recovers interrupted work and spawns the background tasks.
    pub async fn start(self) -> SyncResult<SyncHandle> {
        let max_attempts = self.config.max_attempts();

        let recovered = self.db.operations().recover_interrupted(max_attempts).await?;
        if recovered > 0 {
            info!(recovered, "Recovered operations interrupted by a previous run");
        }
        self.status
            .refresh_counts(&self.db.operations(), max_attempts)
            .await?;
        self.status.set_connectivity(self.monitor.state());

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let monitor_task = tokio::spawn(self.monitor.clone().run(shutdown_rx.clone()));

        let engine_loop = EngineLoop {
            processor: self.processor.clone(),
            pull: self.pull.clone(),
            monitor: self.monitor.clone(),
            status: self.status.clone(),
            pull_on_reconnect: self.config.sync.pull_on_reconnect,
            commands: command_rx,
            shutdown: shutdown_rx,
        };
        let loop_task = tokio::spawn(engine_loop.run());

        info!(
            api = %self.config.api.base_url,
            adapters = ?self.registry.entity_types(),
            "Sync engine started"
        );

        Ok(SyncHandle {
            db: self.db,
            registry: self.registry,
            pull: self.pull,
            monitor: self.monitor,
            status: self.status,
            max_attempts,
            commands: command_tx,
            shutdown: Arc::new(shutdown_tx),
            tasks: Arc::new(Mutex::new(vec![monitor_task, loop_task])),
        })
    }
}

// =============================================================================
// Engine Loop
// =============================================================================

struct EngineLoop {
    processor: Arc<SyncProcessor>,
    pull: Arc<PullService>,
    monitor: Arc<ConnectivityMonitor>,
    status: Arc<StatusPublisher>,
    pull_on_reconnect: bool,
    commands: mpsc::Receiver<Command>,
    shutdown: watch::Receiver<bool>,
}

impl EngineLoop {
    async fn run(mut self) {
        let mut connectivity = self.monitor.subscribe();
        let mut follow_up: Option<Instant> = None;

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    match command {
                        Command::Wake => {
                            follow_up = self.cycle(false).await.or(follow_up);
                        }
                        Command::SyncNow(reply) => {
                            let result = self.processor.run_cycle(true).await;
                            if let Ok(report) = &result {
                                follow_up = report.follow_up.map(|delay| Instant::now() + delay);
                            }
                            let _ = reply.send(result);
                        }
                        Command::Pull(reply) => {
                            let _ = reply.send(self.pull.pull_all().await);
                        }
                    }
                }

                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *connectivity.borrow_and_update();
                    self.status.set_connectivity(state);

                    if state == ConnectivityState::Online {
                        follow_up = self.cycle(false).await;
                        if self.pull_on_reconnect {
                            if let Err(e) = self.pull.pull_all().await {
                                warn!(error = %e, "Pull after reconnect failed");
                            }
                        }
                    }
                }

                _ = sleep_until(follow_up.unwrap_or_else(Instant::now)), if follow_up.is_some() => {
                    follow_up = self.cycle(false).await;
                }

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Sync engine loop stopped");
    }

    /// Runs a cycle and returns when the next one is due, if ever.
    async fn cycle(&self, ignore_backoff: bool) -> Option<Instant> {
        match self.processor.run_cycle(ignore_backoff).await {
            Ok(report) => report.follow_up.map(|delay| {
                debug!(delay_ms = delay.as_millis() as u64, "Follow-up cycle scheduled");
                Instant::now() + delay
            }),
            Err(e) => {
                warn!(error = %e, "Sync cycle failed");
                self.status.error(&e.to_string(), e.is_retryable());
                None
            }
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable control surface for a running engine.
#[derive(Clone)]
pub struct SyncHandle {
    db: Database,
    registry: AdapterRegistry,
    pull: Arc<PullService>,
    monitor: Arc<ConnectivityMonitor>,
    status: Arc<StatusPublisher>,
    max_attempts: i64,
    commands: mpsc::Sender<Command>,
    shutdown: Arc<watch::Sender<bool>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SyncHandle {
    // =========================================================================
    // Local Mutations
    // =========================================================================

    /// Applies a local change and queues its operation in one transaction,
    /// then wakes the engine.
    ///
    /// ## Errors
    /// Rejects operations no adapter accepts before anything is written.
    pub async fn submit(
        &self,
        table: RecordTable,
        mutation: LocalMutation,
        operation: NewOperation,
    ) -> SyncResult<MutationReceipt> {
        self.registry.validate(&operation)?;
        let receipt = self.db.apply_mutation(table, mutation, operation).await?;
        self.queued().await?;
        Ok(receipt)
    }

    /// Inserts a parent with its children under one operation.
    pub async fn submit_aggregate(
        &self,
        parent_table: RecordTable,
        parent: NewLocalRecord,
        child_table: RecordTable,
        children: Vec<NewLocalRecord>,
        operation: NewOperation,
    ) -> SyncResult<AggregateReceipt> {
        self.registry.validate(&operation)?;
        let receipt = self
            .db
            .insert_aggregate(parent_table, parent, child_table, children, operation)
            .await?;
        self.queued().await?;
        Ok(receipt)
    }

    async fn queued(&self) -> SyncResult<()> {
        self.status
            .refresh_counts(&self.db.operations(), self.max_attempts)
            .await?;
        self.wake().await
    }

    async fn wake(&self) -> SyncResult<()> {
        self.commands
            .send(Command::Wake)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    // =========================================================================
    // Triggers
    // =========================================================================

    /// Runs a cycle now, ignoring backoff. Attempt budgets still apply.
    pub async fn sync_now(&self) -> SyncResult<CycleReport> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::SyncNow(tx))
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        rx.await
            .map_err(|e| SyncError::ChannelError(e.to_string()))?
    }

    /// Pulls remote changes for every pulling entity type.
    pub async fn pull(&self) -> SyncResult<Vec<PullReport>> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Pull(tx))
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        rx.await
            .map_err(|e| SyncError::ChannelError(e.to_string()))?
    }

    /// Evicts synced records not read within the retention window.
    pub async fn evict(&self) -> SyncResult<u64> {
        self.pull.evict(Utc::now()).await
    }

    // =========================================================================
    // Signals
    // =========================================================================

    pub async fn network_available(&self) {
        self.monitor.network_available().await;
    }

    pub fn network_unavailable(&self) {
        self.monitor.network_unavailable();
    }

    /// Asks for an immediate health probe.
    pub async fn suspect_connectivity(&self) {
        self.monitor.suspect().await;
    }

    /// The host has a new credential; resume a paused queue.
    pub async fn credentials_updated(&self) -> SyncResult<()> {
        self.status.set_auth_required(false);
        self.wake().await
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub fn status(&self) -> SyncQueueStatus {
        self.status.current()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncQueueStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.monitor.subscribe()
    }

    // =========================================================================
    // Failed Operations
    // =========================================================================

    pub async fn failed_operations(&self) -> SyncResult<Vec<PendingOperation>> {
        Ok(self.db.operations().list_failed(self.max_attempts).await?)
    }

    /// Gives a permanently failed operation a fresh attempt budget.
    pub async fn retry_failed(&self, id: i64) -> SyncResult<()> {
        self.db.operations().retry_failed(id).await?;
        info!(op_id = id, "Failed operation requeued");
        self.queued().await
    }

    pub async fn discard(&self, id: i64) -> SyncResult<()> {
        self.db.operations().discard(id).await?;
        info!(op_id = id, "Failed operation discarded");
        self.status
            .refresh_counts(&self.db.operations(), self.max_attempts)
            .await
    }

    pub async fn clear_failed(&self) -> SyncResult<u64> {
        let cleared = self.db.operations().clear_failed(self.max_attempts).await?;
        self.status
            .refresh_counts(&self.db.operations(), self.max_attempts)
            .await?;
        Ok(cleared)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stops the background tasks and waits for them to finish.
    pub async fn shutdown(&self) {
        info!("Shutting down sync engine");
        let _ = self.shutdown.send(true);

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Sync task ended abnormally");
            }
        }

        info!("Sync engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ClientAdapter;
    use crate::config::RetrySettings;
    use crate::processor::CycleOutcome;
    use crate::testing::{test_db, MockAuth, MockProbe, MockTransport};
    use crate::transport::Method;
    use outpost_core::{entity, OperationKind, OperationStatus};
    use serde_json::{json, Value};
    use std::time::Duration;

    struct Fixture {
        handle: SyncHandle,
        db: Database,
        transport: Arc<MockTransport>,
        auth: Arc<MockAuth>,
    }

    fn config() -> SyncConfig {
        SyncConfig {
            retry: RetrySettings {
                base_delay_ms: 50,
                jitter_factor: 0.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn start_with(db: Database, token: Option<&str>) -> Fixture {
        let transport = MockTransport::new();
        let auth = MockAuth::new(token);
        let handle = SyncEngine::builder(config())
            .with_database(db.clone())
            .with_transport(transport.clone())
            .with_auth(auth.clone())
            .with_probe(Arc::new(MockProbe::new(true)))
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        Fixture {
            handle,
            db,
            transport,
            auth,
        }
    }

    async fn start() -> Fixture {
        start_with(test_db().await, Some("token-1")).await
    }

    fn client(number: &str) -> Value {
        json!({
            "documentNumber": number,
            "documentType": "CC",
            "clientType": "person",
            "name": format!("Client {}", number)
        })
    }

    async fn submit_client(handle: &SyncHandle, number: &str) -> MutationReceipt {
        let data = client(number);
        handle
            .submit(
                RecordTable::Clients,
                LocalMutation::Insert(NewLocalRecord::new(Some(number.into()), data.clone())),
                ClientAdapter::create_operation(data).unwrap(),
            )
            .await
            .unwrap()
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_start_recovers_interrupted_operations() {
        let db = test_db().await;
        let op = db
            .operations()
            .enqueue(&ClientAdapter::create_operation(client("U1")).unwrap())
            .await
            .unwrap();
        db.operations().mark_processing(op.id, Utc::now()).await.unwrap();

        let f = start_with(db, Some("token-1")).await;

        let op = f.db.operations().get(op.id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.attempts, 1);
        assert_eq!(f.handle.status().pending_count, 1);
        assert_eq!(f.handle.status().connectivity, ConnectivityState::Offline);

        f.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_while_online_syncs() {
        let f = start().await;
        f.transport
            .reply(Method::Post, "/api/clients", 201, json!({ "id": 101 }));
        f.handle.network_available().await;

        let receipt = submit_client(&f.handle, "U1").await;
        f.handle.sync_now().await.unwrap();

        assert!(f.db.operations().get(receipt.operation.id).await.unwrap().is_none());
        let record = f
            .db
            .records(RecordTable::Clients)
            .resolve("U1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.server_id, Some(101));
        assert_eq!(f.handle.status().total_count, 0);

        f.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_payload() {
        let f = start().await;

        let op = NewOperation::new(
            entity::CLIENTS,
            OperationKind::Create,
            json!({ "documentNumber": "U1", "documentType": "CC", "clientType": "person" }),
            "U1",
        );
        let result = f
            .handle
            .submit(RecordTable::Clients, LocalMutation::None, op)
            .await;
        assert!(result.is_err());

        let unknown = NewOperation::new("invoices", OperationKind::Create, json!({}), "F-1");
        assert!(matches!(
            f.handle.submit(RecordTable::Clients, LocalMutation::None, unknown).await,
            Err(SyncError::UnknownEntityType(_))
        ));

        assert_eq!(f.db.operations().counts(3).await.unwrap().total(), 0);
        f.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_sync_now_while_offline() {
        let f = start().await;
        submit_client(&f.handle, "U1").await;

        let report = f.handle.sync_now().await.unwrap();

        assert_eq!(report.outcome, CycleOutcome::Offline);
        assert!(f.transport.requests().is_empty());
        assert_eq!(f.handle.status().pending_count, 1);

        f.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnect_drains_queue_then_pulls() {
        let f = start().await;
        let receipt = submit_client(&f.handle, "U1").await;
        f.transport
            .reply(Method::Post, "/api/clients", 201, json!({ "id": 101 }));

        f.handle.network_available().await;

        let transport = f.transport.clone();
        eventually(|| transport.requests_to(Method::Get, "/api/clients").len() == 1).await;

        let sent = f.transport.requests();
        assert_eq!(sent[0].method, Method::Post);
        assert!(f.db.operations().get(receipt.operation.id).await.unwrap().is_none());

        let handle = f.handle.clone();
        eventually(|| handle.status().connectivity == ConnectivityState::Online).await;

        f.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_retryable_failure_schedules_follow_up_cycle() {
        let f = start().await;
        f.transport.reply(Method::Post, "/api/clients", 503, Value::Null);
        f.transport
            .reply(Method::Post, "/api/clients", 201, json!({ "id": 101 }));
        f.handle.network_available().await;

        submit_client(&f.handle, "U1").await;

        let transport = f.transport.clone();
        eventually(|| transport.requests_to(Method::Post, "/api/clients").len() == 2).await;
        let handle = f.handle.clone();
        eventually(|| handle.status().total_count == 0).await;

        f.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_credentials_updated_resumes_queue() {
        let f = start_with(test_db().await, None).await;
        f.transport
            .reply(Method::Post, "/api/clients", 201, json!({ "id": 101 }));
        f.handle.network_available().await;
        submit_client(&f.handle, "U1").await;

        let report = f.handle.sync_now().await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::AuthRequired);
        assert!(f.handle.status().auth_required);

        f.auth.set_token(Some("token-2"));
        f.handle.credentials_updated().await.unwrap();
        f.handle.sync_now().await.unwrap();

        assert_eq!(f.handle.status().total_count, 0);
        assert!(!f.handle.status().auth_required);
        let sent = f.transport.requests_to(Method::Post, "/api/clients");
        assert_eq!(sent[0].header("Authorization"), Some("Bearer token-2"));

        f.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_failed_operation() {
        let f = start().await;
        f.transport.reply(
            Method::Post,
            "/api/clients",
            400,
            json!({ "message": "bad document type" }),
        );
        f.transport
            .reply(Method::Post, "/api/clients", 201, json!({ "id": 101 }));
        f.handle.network_available().await;

        submit_client(&f.handle, "U1").await;
        f.handle.sync_now().await.unwrap();

        let failed = f.handle.failed_operations().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(f.handle.status().permanently_failed_count, 1);

        f.handle.retry_failed(failed[0].id).await.unwrap();
        f.handle.sync_now().await.unwrap();

        assert!(f.handle.failed_operations().await.unwrap().is_empty());
        assert_eq!(f.handle.status().total_count, 0);

        f.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_discard_failed_operation() {
        let f = start().await;
        f.transport.reply(Method::Post, "/api/clients", 400, Value::Null);
        f.handle.network_available().await;

        submit_client(&f.handle, "U1").await;
        f.handle.sync_now().await.unwrap();
        let failed = f.handle.failed_operations().await.unwrap();

        f.handle.discard(failed[0].id).await.unwrap();

        assert_eq!(f.handle.status().total_count, 0);
        f.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_engine() {
        let f = start().await;
        f.handle.shutdown().await;

        assert!(matches!(
            f.handle.sync_now().await,
            Err(SyncError::ShuttingDown)
        ));
    }

    #[test]
    fn test_build_requires_database_and_auth() {
        let result = SyncEngine::builder(SyncConfig::default())
            .with_auth(MockAuth::new(None))
            .build();
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }
}
