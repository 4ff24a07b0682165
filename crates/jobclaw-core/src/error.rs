//! Error types for JobClaw.

use thiserror::Error;

/// Main error type for all JobClaw operations.
#[derive(Debug, Error)]
pub enum JobClawError {
    /// Malformed job spec, approval decision or trigger input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The request contradicts stored state (e.g. re-deciding an approval).
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobClawError {
    /// Shorthand for a validation error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Errors raised at the store boundary.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backend unreachable, busy or timed out. Triggers fallback mode.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Backend answered but the operation failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// Stored data could not be decoded.
    #[error("corrupt entry at '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    /// Whether this error should flip the process into in-memory fallback.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Convenience result type for library operations.
pub type Result<T> = std::result::Result<T, JobClawError>;

/// Result type of raw store primitives.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
