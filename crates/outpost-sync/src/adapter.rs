//! # Entity Adapters
//!
//! Per-entity knowledge of how a queued operation becomes a remote call, and
//! how the remote answer folds back into local records.
//!
//! ## Adapter Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        One Operation, One Adapter                       │
//! │                                                                         │
//! │  prepare(op)  ── Deferred ──► skipped this cycle, attempt not counted  │
//! │      │                        (e.g. parent not created remotely yet)   │
//! │      ▼ Ready                                                            │
//! │  execute(op)  ── Err(ExecutionFailure{class}) ──► processor decides    │
//! │      │                                            retry vs permanent   │
//! │      ▼ Ok(ServerState)                                                  │
//! │  apply(op, state, tx) ──► server id / synced flag / queued children    │
//! │                           rewritten, in the same transaction that      │
//! │                           deletes the operation                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::adapters::{ClientAdapter, PriceListAdapter, PriceListItemAdapter};
use crate::auth::AuthProvider;
use crate::error::{SyncError, SyncResult};
use crate::transport::{classify_status, ApiRequest, ApiResponse, Transport};
use outpost_core::validation::validate_entity_key;
use outpost_core::{
    ErrorClass, LocalRecord, NewOperation, OperationKind, PendingOperation, ServerRecord,
};
use outpost_db::{Database, OperationLogRepository, RecordRepository, RecordTable};

// =============================================================================
// Results
// =============================================================================

/// Whether an operation can be sent this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Waiting on another operation. The reason is logged.
    Deferred(String),
}

/// What the server answered for a successful call.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerState {
    /// Server-assigned id, when the answer carries one.
    pub server_id: Option<i64>,
    pub body: Value,
    pub last_modified: DateTime<Utc>,
}

impl ServerState {
    /// Reads `id` and `updatedAt` from a response body.
    pub fn from_response(response: &ApiResponse) -> Self {
        ServerState {
            server_id: response.body.get("id").and_then(Value::as_i64),
            last_modified: updated_at(&response.body).unwrap_or_else(Utc::now),
            body: response.body.clone(),
        }
    }

    /// A success that never reached the server.
    pub fn local_only() -> Self {
        ServerState {
            server_id: None,
            body: Value::Null,
            last_modified: Utc::now(),
        }
    }
}

/// A classified failure from an adapter. Adapters never decide retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionFailure {
    pub class: ErrorClass,
    pub message: String,
}

impl ExecutionFailure {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        ExecutionFailure {
            class,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::ValidationError, message)
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.class)
    }
}

impl From<SyncError> for ExecutionFailure {
    fn from(err: SyncError) -> Self {
        ExecutionFailure::new(err.class(), err.to_string())
    }
}

impl From<ExecutionFailure> for SyncError {
    fn from(failure: ExecutionFailure) -> Self {
        SyncError::Remote {
            class: failure.class,
            message: failure.message,
        }
    }
}

pub type ExecutionResult = Result<ServerState, ExecutionFailure>;

// =============================================================================
// Adapter Context
// =============================================================================

/// Collaborators every adapter may use.
#[derive(Clone)]
pub struct AdapterContext {
    pub db: Database,
    pub transport: Arc<dyn Transport>,
    pub auth: Arc<dyn AuthProvider>,
}

impl AdapterContext {
    pub fn new(db: Database, transport: Arc<dyn Transport>, auth: Arc<dyn AuthProvider>) -> Self {
        AdapterContext {
            db,
            transport,
            auth,
        }
    }

    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ExecutionFailure> {
        let token = self
            .auth
            .current_credential()
            .await
            .ok_or_else(|| ExecutionFailure::from(SyncError::CredentialUnavailable))?;

        Ok(self.transport.send(request.bearer(&token)).await?)
    }

    /// Sends an authenticated request and classifies the answer.
    pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse, ExecutionFailure> {
        let response = self.send(request).await?;

        match classify_status(response.status) {
            None => Ok(response),
            Some(class) => Err(ExecutionFailure::new(class, response.summary())),
        }
    }

    /// Like [`AdapterContext::call`], but a 404 counts as success: a replayed
    /// delete finds the entity already gone.
    pub async fn call_delete(&self, request: ApiRequest) -> Result<ApiResponse, ExecutionFailure> {
        let response = self.send(request).await?;

        match classify_status(response.status) {
            None => Ok(response),
            Some(_) if response.status == 404 => {
                debug!(status = response.status, "Delete target already gone");
                Ok(response)
            }
            Some(class) => Err(ExecutionFailure::new(class, response.summary())),
        }
    }
}

// =============================================================================
// Adapter Trait
// =============================================================================

/// Maps operations of one entity type onto the remote API.
#[async_trait]
pub trait EntityAdapter: Send + Sync {
    /// Entity type name this adapter serves.
    fn entity_type(&self) -> &'static str;

    fn supports(&self, kind: OperationKind) -> bool;

    /// Rejects payloads that can never succeed, before they are enqueued.
    fn validate(&self, _kind: OperationKind, _payload: &Value) -> SyncResult<()> {
        Ok(())
    }

    /// Checks dependencies on other queued work.
    async fn prepare(&self, _op: &PendingOperation, _ctx: &AdapterContext) -> SyncResult<Readiness> {
        Ok(Readiness::Ready)
    }

    /// Performs the remote call. The same `entity_key` must be sent on every
    /// attempt so the server can recognise a replay.
    async fn execute(&self, op: &PendingOperation, ctx: &AdapterContext) -> ExecutionResult;

    /// Folds a successful result into local records.
    async fn apply(
        &self,
        op: &PendingOperation,
        state: &ServerState,
        conn: &mut SqliteConnection,
    ) -> SyncResult<()>;

    /// Endpoint listing remote changes, for entity types that pull.
    fn pull_path(&self) -> Option<&'static str> {
        None
    }

    /// Converts one pulled item into a record.
    fn parse_server_record(&self, _item: &Value) -> SyncResult<ServerRecord> {
        Err(SyncError::UnsupportedOperation {
            entity_type: self.entity_type().to_string(),
            kind: "pull".to_string(),
        })
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Adapters by entity type.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn EntityAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the client and price list adapters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ClientAdapter));
        registry.register(Arc::new(PriceListAdapter));
        registry.register(Arc::new(PriceListItemAdapter));
        registry
    }

    /// Adds an adapter, replacing any previous one for the same type.
    pub fn register(&mut self, adapter: Arc<dyn EntityAdapter>) {
        self.adapters.insert(adapter.entity_type(), adapter);
    }

    pub fn get(&self, entity_type: &str) -> Option<Arc<dyn EntityAdapter>> {
        self.adapters.get(entity_type).cloned()
    }

    /// Registered entity types, sorted.
    pub fn entity_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.adapters.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Checks an operation before it is enqueued.
    ///
    /// ## Errors
    /// - `UnknownEntityType` when no adapter is registered
    /// - `UnsupportedOperation` when the adapter does not handle the kind
    /// - `InvalidPayload` when the key or payload is malformed
    pub fn validate(&self, op: &NewOperation) -> SyncResult<()> {
        let adapter = self
            .get(&op.entity_type)
            .ok_or_else(|| SyncError::UnknownEntityType(op.entity_type.clone()))?;

        if !adapter.supports(op.kind) {
            return Err(SyncError::UnsupportedOperation {
                entity_type: op.entity_type.clone(),
                kind: op.kind.to_string(),
            });
        }

        validate_entity_key(&op.entity_key)?;
        adapter.validate(op.kind, &op.payload)
    }
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Parses an `updatedAt` field.
pub(crate) fn updated_at(body: &Value) -> Option<DateTime<Utc>> {
    body.get("updatedAt")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc))
}

/// Reads a required integer field from a payload.
pub(crate) fn require_i64(payload: &Value, field: &str) -> SyncResult<i64> {
    payload
        .get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| SyncError::InvalidPayload(format!("{} is required", field)))
}

/// Parses an operation payload.
pub(crate) fn payload(op: &PendingOperation) -> SyncResult<Value> {
    Ok(op.payload_json()?)
}

/// Returns true if another live operation targets the same entity.
pub(crate) async fn has_other_queued(
    conn: &mut SqliteConnection,
    op: &PendingOperation,
) -> SyncResult<bool> {
    let queued = OperationLogRepository::list_by_entity_type_with(conn, &op.entity_type).await?;
    Ok(queued
        .iter()
        .any(|other| other.id != op.id && other.entity_key == op.entity_key))
}

/// Overlays the fields of a server answer on the local data.
///
/// Array fields are skipped: child collections live in their own table.
/// Returns `None` when the answer carries no fields to keep.
pub(crate) fn canonical_data(record: &LocalRecord, body: &Value) -> SyncResult<Option<Value>> {
    let Some(fields) = body.as_object().filter(|fields| !fields.is_empty()) else {
        return Ok(None);
    };

    let mut data = record.data_json()?;
    let Some(target) = data.as_object_mut() else {
        return Ok(Some(body.clone()));
    };
    for (name, value) in fields {
        if !value.is_array() {
            target.insert(name.clone(), value.clone());
        }
    }
    Ok(Some(data))
}

/// Marks a record confirmed by the server.
///
/// Fields returned by the server overwrite the local ones. Leaves the record
/// flagged unsynced when later edits to the same entity are still queued, so
/// a pull cannot overwrite them.
pub(crate) async fn confirm_record(
    conn: &mut SqliteConnection,
    table: RecordTable,
    op: &PendingOperation,
    record: &LocalRecord,
    state: &ServerState,
) -> SyncResult<LocalRecord> {
    let data = canonical_data(record, &state.body)?;
    let confirmed = RecordRepository::confirm_with(
        conn,
        table,
        record.local_id,
        state.server_id,
        data.as_ref(),
        state.last_modified,
    )
    .await?;

    if has_other_queued(conn, op).await? {
        RecordRepository::mark_unsynced_with(conn, table, record.local_id).await?;
    }

    Ok(confirmed)
}
