//! # Domain Types
//!
//! Types shared by the local store and the sync engine.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌─────────────────┐   ┌─────────────────┐      │
//! │  │ PendingOperation │   │   LocalRecord   │   │   SyncCursor    │      │
//! │  │  ──────────────  │   │  ─────────────  │   │  ─────────────  │      │
//! │  │  id (i64, auto)  │   │  local_id       │   │  entity_type    │      │
//! │  │  entity_type     │   │  server_id?     │   │  last_synced_at │      │
//! │  │  kind            │   │  business_key?  │   └─────────────────┘      │
//! │  │  payload (JSON)  │   │  correlation?   │                            │
//! │  │  entity_key      │   │  synced         │   ┌─────────────────┐      │
//! │  │  status/attempts │   │  last_modified  │   │ SyncQueueStatus │      │
//! │  │  next_eligible?  │   │  last_accessed  │   │  counts + times │      │
//! │  └──────────────────┘   └─────────────────┘   └─────────────────┘      │
//! │                                                                         │
//! │  OperationStatus:  Pending ──► Processing ──► (deleted | Failed)       │
//! │                       ▲             │                                   │
//! │                       └─────────────┘  release (auth pause, crash)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every local record has:
//! - `local_id`: assigned on first local write, never reused
//! - `server_id`: assigned by the remote API once the create is confirmed
//!
//! Until the server id is known, records are matched by their business key
//! or by an offline correlation key generated on the device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::CoreResult;

// =============================================================================
// Entity Types
// =============================================================================

/// Entity type names used in the operation log and adapter registry.
pub mod entity {
    /// Customers, keyed by document number.
    pub const CLIENTS: &str = "clients";
    /// Price list headers.
    pub const PRICE_LISTS: &str = "price_lists";
    /// Price list lines, keyed by `(parent server id, product id)`.
    pub const PRICE_LIST_ITEMS: &str = "price_list_items";
}

/// Generates a new offline correlation key.
pub fn new_correlation_key() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Operation Kind
// =============================================================================

/// What a queued operation asks the remote side to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    /// Parent and its child lines in a single remote call.
    CreateWithChildren,
    /// Header fields of a parent aggregate.
    UpdateHeader,
    AddLine,
    UpdateLine,
    RemoveLine,
}

impl OperationKind {
    /// Returns the stored name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::CreateWithChildren => "create_with_children",
            OperationKind::UpdateHeader => "update_header",
            OperationKind::AddLine => "add_line",
            OperationKind::UpdateLine => "update_line",
            OperationKind::RemoveLine => "remove_line",
        }
    }

    /// True for kinds that act on a child line of a parent aggregate.
    pub fn is_line(&self) -> bool {
        matches!(
            self,
            OperationKind::AddLine | OperationKind::UpdateLine | OperationKind::RemoveLine
        )
    }

    /// True for kinds that create a new remote entity.
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            OperationKind::Create | OperationKind::CreateWithChildren
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Operation Status
// =============================================================================

/// Lifecycle state of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting for its first attempt, or released back to the queue.
    Pending,
    /// An attempt is in flight.
    Processing,
    /// The last attempt failed. See [`PendingOperation::permanent`].
    Failed,
}

impl Default for OperationStatus {
    fn default() -> Self {
        OperationStatus::Pending
    }
}

// =============================================================================
// Error Class
// =============================================================================

/// Classification of a failed attempt.
///
/// Adapters report one of these instead of raw errors; the processor alone
/// decides what each class means for the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The transport could not reach the server, or timed out.
    NetworkUnavailable,
    /// The server answered with a 5xx status.
    ServerError,
    /// The server rejected the payload (4xx other than auth expiry).
    ValidationError,
    /// The credential is no longer accepted.
    AuthExpired,
    /// Reading or writing the local store failed.
    LocalStoreError,
}

impl ErrorClass {
    /// Returns true if an operation failing with this class may be retried
    /// after a backoff delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::NetworkUnavailable | ErrorClass::ServerError)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::NetworkUnavailable => "network_unavailable",
            ErrorClass::ServerError => "server_error",
            ErrorClass::ValidationError => "validation_error",
            ErrorClass::AuthExpired => "auth_expired",
            ErrorClass::LocalStoreError => "local_store_error",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Pending Operation
// =============================================================================

/// A unit of work awaiting remote execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PendingOperation {
    /// Monotonically assigned local id.
    pub id: i64,
    /// Entity type name, see [`entity`].
    pub entity_type: String,
    pub kind: OperationKind,
    /// JSON command body.
    pub payload: String,
    /// Business key, offline correlation key, or composite child key.
    pub entity_key: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub status: OperationStatus,
    /// Attempts made so far. Only ever increases during automatic processing.
    pub attempts: i64,
    /// Set when the failure can never succeed by retrying.
    pub permanent: bool,
    #[ts(as = "Option<String>")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Earliest time of the next attempt. `None` means now.
    #[ts(as = "Option<String>")]
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_class: Option<ErrorClass>,
}

impl PendingOperation {
    /// Returns true if the operation may be dispatched at `now`.
    ///
    /// ## Rules
    /// - status is `Pending` or `Failed` (never `Processing`)
    /// - not permanently failed
    /// - fewer than `max_attempts` attempts so far
    /// - `next_eligible_at` is absent or not after `now`
    pub fn is_eligible(&self, now: DateTime<Utc>, max_attempts: i64) -> bool {
        self.status != OperationStatus::Processing
            && !self.permanent
            && self.attempts < max_attempts
            && self.next_eligible_at.map_or(true, |at| at <= now)
    }

    /// Returns true if the operation is out of automatic retries.
    pub fn is_permanently_failed(&self, max_attempts: i64) -> bool {
        self.status == OperationStatus::Failed && (self.permanent || self.attempts >= max_attempts)
    }

    /// Parses the payload as JSON.
    pub fn payload_json(&self) -> CoreResult<serde_json::Value> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// An operation to append to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub entity_type: String,
    pub kind: OperationKind,
    pub payload: serde_json::Value,
    pub entity_key: String,
}

impl NewOperation {
    pub fn new(
        entity_type: impl Into<String>,
        kind: OperationKind,
        payload: serde_json::Value,
        entity_key: impl Into<String>,
    ) -> Self {
        NewOperation {
            entity_type: entity_type.into(),
            kind,
            payload,
            entity_key: entity_key.into(),
        }
    }
}

// =============================================================================
// Local Record
// =============================================================================

/// Locally cached state of one entity.
///
/// One table per entity type, all sharing this shape. Entity fields live in
/// `data` as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct LocalRecord {
    pub local_id: i64,
    pub server_id: Option<i64>,
    pub business_key: Option<String>,
    /// Offline correlation key. Cleared once the server id is known.
    pub correlation_key: Option<String>,
    /// Parent record by local id (child tables only).
    pub parent_local_id: Option<i64>,
    /// Parent record by server id, once the parent is confirmed.
    pub parent_server_id: Option<i64>,
    pub data: String,
    /// True iff the local state matches the last confirmed remote state.
    pub synced: bool,
    #[ts(as = "String")]
    pub last_modified: DateTime<Utc>,
    #[ts(as = "String")]
    pub last_accessed: DateTime<Utc>,
}

impl LocalRecord {
    /// Parses the entity fields as JSON.
    pub fn data_json(&self) -> CoreResult<serde_json::Value> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

/// A record about to be written locally for the first time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLocalRecord {
    pub business_key: Option<String>,
    pub correlation_key: Option<String>,
    pub parent_local_id: Option<i64>,
    pub parent_server_id: Option<i64>,
    pub data: serde_json::Value,
}

impl NewLocalRecord {
    /// A top-level record with the given business key and data.
    pub fn new(business_key: Option<String>, data: serde_json::Value) -> Self {
        NewLocalRecord {
            business_key,
            correlation_key: None,
            parent_local_id: None,
            parent_server_id: None,
            data,
        }
    }

    /// Sets the offline correlation key.
    pub fn with_correlation_key(mut self, key: impl Into<String>) -> Self {
        self.correlation_key = Some(key.into());
        self
    }

    /// Links the record to its parent.
    pub fn with_parent(mut self, local_id: Option<i64>, server_id: Option<i64>) -> Self {
        self.parent_local_id = local_id;
        self.parent_server_id = server_id;
        self
    }
}

/// A record as returned by an incremental pull.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRecord {
    pub server_id: i64,
    pub business_key: Option<String>,
    pub parent_server_id: Option<i64>,
    pub data: serde_json::Value,
    pub last_modified: DateTime<Utc>,
}

// =============================================================================
// Sync Cursor
// =============================================================================

/// Incremental pull position for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SyncCursor {
    pub entity_type: String,
    #[ts(as = "String")]
    pub last_synced_at: DateTime<Utc>,
}

// =============================================================================
// Connectivity
// =============================================================================

/// Reachability of the remote API as seen by the connectivity monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Online,
    Offline,
    /// A health probe is deciding between the other two.
    Checking,
}

impl Default for ConnectivityState {
    fn default() -> Self {
        ConnectivityState::Offline
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityState::Online => write!(f, "online"),
            ConnectivityState::Offline => write!(f, "offline"),
            ConnectivityState::Checking => write!(f, "checking"),
        }
    }
}

// =============================================================================
// Queue Status
// =============================================================================

/// Operation counts grouped the way the status value reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// `Pending` or `Processing`.
    pub pending: i64,
    /// `Failed` but still eligible for automatic retry.
    pub retryable_failed: i64,
    /// `Failed` with no automatic retries left.
    pub permanently_failed: i64,
}

impl QueueCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.retryable_failed + self.permanently_failed
    }
}

/// Observable summary of the sync queue for UI consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueStatus {
    pub pending_count: i64,
    pub retryable_failed_count: i64,
    pub permanently_failed_count: i64,
    pub total_count: i64,
    #[ts(as = "Option<String>")]
    pub last_sync_attempt: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub is_syncing: bool,
    /// Set when a credential refresh failed and the queue is paused.
    pub auth_required: bool,
    pub connectivity: ConnectivityState,
}

impl SyncQueueStatus {
    /// Replaces the counts with a fresh snapshot.
    pub fn apply_counts(&mut self, counts: QueueCounts) {
        self.pending_count = counts.pending;
        self.retryable_failed_count = counts.retryable_failed;
        self.permanently_failed_count = counts.permanently_failed;
        self.total_count = counts.total();
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
