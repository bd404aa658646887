//! # outpost-db: Local Store for Outpost
//!
//! SQLite storage for the sync engine: the durable operation log, cached
//! entity records and incremental pull cursors.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Outpost Data Flow                                │
//! │                                                                         │
//! │  Entity store (create client)        Sync processor                    │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   outpost-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ OperationLog   │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ Records        │    │ 001_sync_    │  │   │
//! │  │   │ Transactions  │    │ Cursors        │    │  engine.sql  │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`mutation`] - Local write + enqueue in one transaction
//! - [`error`] - Database error types
//! - [`repository`] - Operation log, record and cursor repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use outpost_db::{Database, DbConfig, LocalMutation, RecordTable};
//!
//! let db = Database::new(DbConfig::new("outpost.db")).await?;
//! db.apply_mutation(RecordTable::Clients, LocalMutation::Insert(record), operation).await?;
//! let ready = db.operations().list_eligible(Utc::now(), MAX_ATTEMPTS).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod mutation;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use mutation::{AggregateReceipt, LocalMutation, MutationReceipt};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::cursors::CursorRepository;
pub use repository::operations::{OperationFailure, OperationLogRepository};
pub use repository::records::{RecordRepository, RecordTable, UpsertOutcome};
