//! Ticketing error types
//!
//! One taxonomy is exposed to driving collaborators (HTTP handlers, the CLI):
//! [`TicketError`]. Persistence failures are carried through unchanged inside
//! [`TicketError::Store`]; sensor-feed failures never reach this type because
//! reconciliation absorbs them.

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Result type alias for ticketing operations
pub type TicketResult<T> = Result<T, TicketError>;

/// Errors returned by the lifecycle, mark tracker, reconciliation and ingestion paths
#[derive(Error, Debug)]
pub enum TicketError {
    /// Referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// Malformed or missing input data
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Operation attempted before its required data exists
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// State-machine precondition violated (wrong phase, terminal state, lost race)
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Caller is not allowed to perform the operation
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// Persistence failure, propagated as-is
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl TicketError {
    /// Create a not found error
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Stable machine-readable code, reported in the CLI's error output
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Conflict { .. } => "CONFLICT",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::Store(_) => "STORE_FAILURE",
        }
    }

    /// Whether this is a state-machine conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let id = Uuid::nil();
        assert_eq!(TicketError::not_found("ticket", id).code(), "NOT_FOUND");
        assert_eq!(TicketError::conflict("x").code(), "CONFLICT");
        assert_eq!(TicketError::invalid_state("x").code(), "INVALID_STATE");
        assert_eq!(
            TicketError::Store(StoreError::LockPoisoned).code(),
            "STORE_FAILURE"
        );
    }

    #[test]
    fn test_error_display() {
        let err = TicketError::not_found("assignment", Uuid::nil());
        assert_eq!(
            err.to_string(),
            "assignment not found: 00000000-0000-0000-0000-000000000000"
        );
        assert!(TicketError::conflict("trip already closed").is_conflict());
        assert!(!TicketError::invalid_input("bad").is_conflict());
    }
}
