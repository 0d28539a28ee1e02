//! Error types for the federation state store.
//!
//! Two layers: [`BackendError`] is what procedures and the connection
//! manager produce, [`StoreError`] is the domain taxonomy callers see.
//! The store facade translates one into the other.

use semver::Version;
use thiserror::Error;

use crate::types::{SubClusterId, SubClusterState};

/// Result type alias for store facade operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the federation state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed input, rejected before any backend access.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// An add contended with a different existing owner (strict mode only).
    #[error("{key} is already homed in {existing}, refusing to assign {requested}")]
    OwnerConflict {
        key: String,
        existing: SubClusterId,
        requested: SubClusterId,
    },

    /// Re-registration with changed info under the `reject` policy.
    #[error("sub-cluster {0} is already registered with different info")]
    RegistrationConflict(SubClusterId),

    #[error("sub-cluster {id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        id: SubClusterId,
        from: SubClusterState,
        to: SubClusterState,
    },

    /// Transient backend unavailability. Safe to retry.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend does not implement the operation.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        operation: &'static str,
        backend: &'static str,
    },

    #[error("incompatible schema version: stored {stored}, expected {expected}")]
    IncompatibleVersion { stored: Version, expected: Version },

    /// Non-transient backend failure (corruption, encoding, constraint).
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether repeating the call could produce a different outcome.
    ///
    /// Only connection-class failures qualify; semantic outcomes are
    /// deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }

    /// Whether this error reports a missing backend capability rather
    /// than a failure.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, StoreError::Unsupported { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Errors produced by backend procedures and the connection manager.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend could not be reached or the connection dropped.
    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// The connection manager has been closed.
    #[error("connection manager is closed")]
    Closed,

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("procedure not implemented: {0}")]
    Unsupported(&'static str),

    #[error("incompatible schema version: stored {stored}, expected {expected}")]
    IncompatibleVersion { stored: Version, expected: Version },
}

impl BackendError {
    /// Connectivity failures that the connection manager may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Disconnected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_errors_are_retryable() {
        assert!(StoreError::Connection("refused".into()).is_retryable());
        assert!(!StoreError::Validation("bad".into()).is_retryable());
        assert!(
            !StoreError::NotFound {
                kind: "application home",
                key: "app_1".into()
            }
            .is_retryable()
        );
        assert!(
            !StoreError::Unsupported {
                operation: "add_reservation_home",
                backend: "redb"
            }
            .is_retryable()
        );
    }

    #[test]
    fn unsupported_is_distinguishable() {
        let err = StoreError::Unsupported {
            operation: "add_reservation_home",
            backend: "redb",
        };
        assert!(err.is_unsupported());
        assert_eq!(
            err.to_string(),
            "add_reservation_home is not supported by the redb backend"
        );
    }

    #[test]
    fn only_disconnects_are_transient() {
        assert!(BackendError::Disconnected("io".into()).is_transient());
        assert!(!BackendError::Timeout("slow".into()).is_transient());
        assert!(!BackendError::Storage("corrupt".into()).is_transient());
    }
}
