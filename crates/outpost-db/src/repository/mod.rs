//! # Repository Module
//!
//! Repository implementations for the local store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Sync engine                                                           │
//! │       │                                                                 │
//! │       │  db.operations().list_eligible(now, 3)                         │
//! │       ▼                                                                 │
//! │  OperationLogRepository / RecordRepository / CursorRepository          │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Each repository has pool-backed methods for single statements and    │
//! │  `*_with(&mut SqliteConnection, ..)` functions for writes that must    │
//! │  share a transaction.                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`OperationLogRepository`](operations::OperationLogRepository) - Durable operation log
//! - [`RecordRepository`](records::RecordRepository) - Cached entity records
//! - [`CursorRepository`](cursors::CursorRepository) - Incremental pull cursors

pub mod cursors;
pub mod operations;
pub mod records;
