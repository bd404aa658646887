//! # outpost-sync: Sync Engine for Outpost
//!
//! Lets the application write locally at any time and pushes those writes to
//! the remote API once the network allows, with retries, dependency ordering
//! and server-id reconciliation.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │   host app ── SyncHandle::submit ──► outpost-db (record + op, 1 tx)    │
//! │                      │                                                  │
//! │                      ▼ wake                                             │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncEngine loop (engine.rs)                      │  │
//! │  └───────┬───────────────────────┬───────────────────────┬──────────┘  │
//! │          ▼                       ▼                       ▼             │
//! │  ┌────────────────┐  ┌──────────────────────┐  ┌───────────────────┐   │
//! │  │ SyncProcessor  │  │ ConnectivityMonitor  │  │ PullService       │   │
//! │  │                │  │                      │  │                   │   │
//! │  │ op log → the   │  │ Online / Checking /  │  │ updatedSince      │   │
//! │  │ entity adapter │  │ Offline, health      │  │ pages, cursors,   │   │
//! │  │ RetryScheduler │  │ probes               │  │ eviction          │   │
//! │  └───────┬────────┘  └──────────────────────┘  └───────────────────┘   │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  ┌────────────────────────────────────────────────────────────────┐    │
//! │  │ AdapterRegistry: clients, price_lists, price_list_items        │    │
//! │  │   prepare / execute (Transport + AuthProvider) / apply         │    │
//! │  └────────────────────────────────────────────────────────────────┘    │
//! │                                                                         │
//! │  StatusPublisher: watch<SyncQueueStatus> + SyncEventEmitter callbacks  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`engine`] - `SyncEngine` builder, background loop and `SyncHandle`
//! - [`processor`] - One drain of the operation log
//! - [`scheduler`] - Retry delays and retry-vs-permanent decisions
//! - [`connectivity`] - Connectivity state machine and health probes
//! - [`adapter`] - Entity adapter contract and registry
//! - [`adapters`] - Client and price list adapters
//! - [`pull`] - Incremental pull and cache eviction
//! - [`status`] - Queue status publishing
//! - [`transport`] - HTTP transport and status classification
//! - [`auth`] - Credential provider and refresh single-flight
//! - [`config`] - TOML configuration
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use outpost_sync::{ClientAdapter, StaticTokenAuth, SyncConfig, SyncEngine};
//! use outpost_db::{Database, DbConfig, LocalMutation, RecordTable};
//!
//! let config = SyncConfig::load_or_default(None);
//! let db = Database::new(DbConfig::new(config.database_path())).await?;
//!
//! let handle = SyncEngine::builder(config)
//!     .with_database(db)
//!     .with_auth(Arc::new(StaticTokenAuth::new(Some(token))))
//!     .build()?
//!     .start()
//!     .await?;
//!
//! handle.network_available().await;
//! handle
//!     .submit(
//!         RecordTable::Clients,
//!         LocalMutation::Insert(record),
//!         ClientAdapter::create_operation(data)?,
//!     )
//!     .await?;
//!
//! let status = handle.status();
//! println!("Pending: {}", status.pending_count);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod adapter;
pub mod adapters;
pub mod auth;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod processor;
pub mod pull;
pub mod scheduler;
pub mod status;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use adapter::{
    AdapterContext, AdapterRegistry, EntityAdapter, ExecutionFailure, ExecutionResult, Readiness,
    ServerState,
};
pub use adapters::{ClientAdapter, PriceListAdapter, PriceListItemAdapter};
pub use auth::{AuthProvider, SharedRefresh, StaticTokenAuth};
pub use config::SyncConfig;
pub use connectivity::{ConnectivityMonitor, HealthProbe, HttpHealthProbe};
pub use engine::{SyncEngine, SyncEngineBuilder, SyncHandle};
pub use error::{SyncError, SyncResult};
pub use processor::{CycleOutcome, CycleReport, SyncProcessor};
pub use pull::{PullReport, PullService};
pub use scheduler::RetryScheduler;
pub use status::{NoOpEmitter, StatusPublisher, SyncEventEmitter};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};
