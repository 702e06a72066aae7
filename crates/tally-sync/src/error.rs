//! # Sync Error Types
//!
//! Error types for engine operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Queue       │  │     Storage             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  NotFound       │  │  Storage                │ │
//! │  │  ConfigLoad     │  │  InvalidState   │  │  (open only: saves are  │ │
//! │  │  ConfigSave     │  │  Validation     │  │   logged, not raised)   │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Drain        │  │   Lifecycle     │                              │
//! │  │                 │  │                 │                              │
//! │  │  NoApplier      │  │  AlreadyRunning │                              │
//! │  │                 │  │  ShuttingDown   │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Connectivity failures never appear here: the monitor turns them into
//! state transitions. Remote-apply failures never appear here either: they
//! become FAILED/CONFLICT items and are counted in the drain report.

use thiserror::Error;

use tally_core::{CoreError, TransactionStatus, ValidationError};

/// Result type alias for engine operations.
///
/// The drain report is `tally_core::SyncResult`; this alias carries errors.
pub type EngineResult<T> = Result<T, SyncError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Queue Errors
    // =========================================================================
    /// No queued transaction with this id.
    #[error("Transaction {id} is not in the queue")]
    NotFound { id: String },

    /// The item is in the wrong state for the requested manual action.
    #[error("Transaction {id} is {status}, cannot {action}")]
    InvalidState {
        id: String,
        status: TransactionStatus,
        action: &'static str,
    },

    /// Input rejected (record number prefix and the like).
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Opening the durable store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    // =========================================================================
    // Drain / Lifecycle Errors
    // =========================================================================
    /// `drain()` called on an agent built without a remote applier.
    #[error("No remote applier configured; use drain_with()")]
    NoApplier,

    /// `start()` called twice.
    #[error("Sync agent is already running")]
    AlreadyRunning,

    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<tally_db::DbError> for SyncError {
    fn from(err: tally_db::DbError) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidTransition { id, from, to } => SyncError::InvalidState {
                id,
                status: from,
                action: match to {
                    TransactionStatus::Pending => "retry",
                    TransactionStatus::Syncing => "sync",
                    TransactionStatus::Synced => "complete",
                    TransactionStatus::Failed => "fail",
                    TransactionStatus::Conflict => "escalate",
                },
            },
            CoreError::Validation(v) => SyncError::Validation(v),
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
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Storage(_) | SyncError::ShuttingDown)
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
                | SyncError::NoApplier
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert!(SyncError::Storage("disk full".into()).is_retryable());
        assert!(!SyncError::NotFound { id: "x".into() }.is_retryable());

        assert!(SyncError::InvalidConfig("poll interval".into()).is_config_error());
        assert!(SyncError::NoApplier.is_config_error());
        assert!(!SyncError::AlreadyRunning.is_config_error());
    }

    #[test]
    fn test_invalid_transition_maps_to_state_error() {
        let err: SyncError = CoreError::InvalidTransition {
            id: "abc".into(),
            from: TransactionStatus::Syncing,
            to: TransactionStatus::Pending,
        }
        .into();

        assert!(matches!(
            err,
            SyncError::InvalidState {
                status: TransactionStatus::Syncing,
                action: "retry",
                ..
            }
        ));
        assert_eq!(err.to_string(), "Transaction abc is syncing, cannot retry");
    }
}
