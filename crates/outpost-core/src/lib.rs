//! # outpost-core: Pure Sync Types for Outpost
//!
//! Domain types shared by the local store and the sync engine. Nothing in
//! this crate performs I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Outpost Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │             Entity stores (clients, price lists, ...)           │   │
//! │  │        write locally + enqueue a PendingOperation              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ outpost-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐     │   │
//! │  │   │    types     │  │  validation  │  │      error       │     │   │
//! │  │   │ PendingOp    │  │ payload      │  │  CoreError       │     │   │
//! │  │   │ LocalRecord  │  │ rules        │  │  Validation      │     │   │
//! │  │   │ ErrorClass   │  │              │  │                  │     │   │
//! │  │   └──────────────┘  └──────────────┘  └──────────────────┘     │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │           outpost-db (SQLite)   ◄──   outpost-sync (engine)     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Operation log, record, cursor and status types
//! - [`error`] - Domain error types
//! - [`validation`] - Payload validation before enqueue

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum automatic execution attempts per operation.
///
/// An operation whose attempt count reaches this value is permanently failed
/// and only an operator can put it back into the queue.
pub const MAX_ATTEMPTS: i64 = 3;

/// Days a synced record may go unread before it becomes eligible for eviction.
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// Page size requested on incremental pulls.
pub const DEFAULT_PAGE_SIZE: u32 = 50;
