//! # Error Types
//!
//! Domain-specific error types for outpost-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  outpost-core errors (this file)                                       │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Payload validation failures                    │
//! │                                                                         │
//! │  outpost-db errors                                                     │
//! │  └── DbError          - Local store failures                           │
//! │                                                                         │
//! │  outpost-sync errors                                                   │
//! │  └── SyncError        - Engine, transport and adapter failures         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → ErrorClass            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The entity type has no registered handling.
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// The operation kind is not valid for the entity type.
    ///
    /// ## When This Occurs
    /// - Enqueuing `AddLine` for a flat entity such as a client
    /// - Enqueuing `CreateWithChildren` for an entity without children
    #[error("Operation {kind} is not supported for {entity_type}")]
    UnsupportedOperation { entity_type: String, kind: String },

    /// A payload could not be read as the expected JSON shape.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::MalformedPayload(err.to_string())
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before a mutation is written locally, so a payload the server
/// would reject never enters the operation log.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID, invalid date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value inside one payload.
    #[error("{field} '{value}' appears more than once")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
