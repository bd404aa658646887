//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Auth                │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  CredentialUnavailable  │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  RefreshFailed          │ │
//! │  │  ConfigLoad/Save│  │  Remote         │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Adapter      │  │  Local Store    │  │      Lifecycle          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  UnknownEntity  │  │  DatabaseError  │  │  ChannelError           │ │
//! │  │  Unsupported    │  │  Serialization  │  │  ShuttingDown           │ │
//! │  │  InvalidPayload │  │                 │  │  Internal               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Every variant maps onto an ErrorClass, which is what the operation    │
//! │  log records and what the retry scheduler decides on.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use outpost_core::{CoreError, ErrorClass, ValidationError};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid API URL.
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The remote API could not be reached.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The request did not complete in time.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The remote API answered with an error status, or an unreadable body.
    #[error("Remote call failed ({class}): {message}")]
    Remote { class: ErrorClass, message: String },

    // =========================================================================
    // Auth Errors
    // =========================================================================
    /// No credential is available for the remote API.
    #[error("No credential available")]
    CredentialUnavailable,

    /// Refreshing the credential failed.
    #[error("Credential refresh failed: {0}")]
    RefreshFailed(String),

    // =========================================================================
    // Adapter Errors
    // =========================================================================
    /// No adapter is registered for the entity type.
    #[error("No adapter registered for entity type: {0}")]
    UnknownEntityType(String),

    /// The adapter does not handle this operation kind.
    #[error("Operation {kind} is not supported for {entity_type}")]
    UnsupportedOperation { entity_type: String, kind: String },

    /// A payload was rejected before it reached the remote API.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    // =========================================================================
    // Local Store Errors
    // =========================================================================
    /// Local database query failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Failed to encode or decode JSON.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Internal sync engine error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Engine is shutting down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<outpost_db::DbError> for SyncError {
    fn from(err: outpost_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownEntityType(entity_type) => SyncError::UnknownEntityType(entity_type),
            CoreError::UnsupportedOperation { entity_type, kind } => {
                SyncError::UnsupportedOperation { entity_type, kind }
            }
            other => SyncError::InvalidPayload(other.to_string()),
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::InvalidPayload(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else if err.is_builder() {
            SyncError::InvalidConfig(err.to_string())
        } else if err.is_decode() {
            SyncError::Remote {
                class: ErrorClass::ServerError,
                message: err.to_string(),
            }
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Classifies the error the way the operation log records it.
    ///
    /// ## Mapping
    /// ```text
    /// ConnectionFailed, Timeout          → NetworkUnavailable
    /// Remote { class }                   → class
    /// CredentialUnavailable, Refresh*    → AuthExpired
    /// UnknownEntity, Unsupported, Invalid→ ValidationError
    /// everything else                    → LocalStoreError
    /// ```
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::ConnectionFailed(_) | SyncError::Timeout(_) => {
                ErrorClass::NetworkUnavailable
            }
            SyncError::Remote { class, .. } => *class,
            SyncError::CredentialUnavailable | SyncError::RefreshFailed(_) => {
                ErrorClass::AuthExpired
            }
            SyncError::UnknownEntityType(_)
            | SyncError::UnsupportedOperation { .. }
            | SyncError::InvalidPayload(_) => ErrorClass::ValidationError,
            _ => ErrorClass::LocalStoreError,
        }
    }

    /// Returns true if the failed operation may be retried after a delay.
    ///
    /// ## Retryable Errors
    /// - Network failures and timeouts
    /// - 5xx answers from the remote API
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
