//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  ├── CoreError        - Illegal queue state transitions                │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tally-db errors (separate crate)                                      │
//! │  └── DbError          - Snapshot read/write failures                   │
//! │                                                                         │
//! │  tally-sync errors (separate crate)                                    │
//! │  └── SyncError        - Config, queue lookups, monitor lifecycle       │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → caller                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::TransactionStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core data model errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A queued transaction was asked to move along an edge the state
    /// machine does not have.
    ///
    /// ## When This Occurs
    /// - Retrying an item that is still PENDING
    /// - Resolving an item that is not in CONFLICT
    /// - Completing an item that was never marked SYNCING
    #[error("Transaction {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field length is outside the allowed range.
    #[error("{field} must be between {min} and {max} characters")]
    LengthOutOfRange { field: String, min: usize, max: usize },

    /// Invalid format (e.g., lowercase prefix, malformed record number).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_error_message() {
        let err = CoreError::InvalidTransition {
            id: "abc".to_string(),
            from: TransactionStatus::Pending,
            to: TransactionStatus::Synced,
        };
        assert_eq!(
            err.to_string(),
            "Transaction abc cannot move from pending to synced"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let err: CoreError = ValidationError::Required {
            field: "prefix".to_string(),
        }
        .into();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(err.to_string(), "Validation error: prefix is required");
    }
}
