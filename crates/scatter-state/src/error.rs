//! Error types for the collaborator boundary.

use thiserror::Error;

/// Result type alias for topology, rule and sink operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors reported by the topology provider, rule provider or operator sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("invalid state: {0}")]
    Invalid(String),
}
