//! Error taxonomy for bulk writes.

use thiserror::Error;

/// Result type used across the bulk write pipeline.
pub type BulkResult<T> = Result<T, BulkError>;

/// Pipeline-level error.
///
/// Each variant corresponds to one failure class with its own propagation rule:
///
/// - `Validation`: bad caller input, surfaced synchronously, never retried.
/// - `Structural`: the store/schema cannot support the request; aborts the chunk.
/// - `PartialFailure`: records rejected by the store. Only ever handed to error
///   callbacks; per-record failures are reported through `ExecutionResult`.
/// - `Scheduling`: a retry could not be persisted or registered.
/// - `Deserialization`: a persisted retry payload could not be rehydrated.
/// - `Store`: the retry job table failed outside of scheduling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BulkError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("structural error: {0}")]
    Structural(String),

    #[error("{failed} record(s) rejected by the store: {message}")]
    PartialFailure { failed: usize, message: String },

    #[error("scheduling failed: {0}")]
    Scheduling(String),

    #[error("deserialization failed: {0}")]
    Deserialization(String),

    #[error("job store error: {0}")]
    Store(String),
}

impl BulkError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(msg.into())
    }

    pub fn partial_failure(failed: usize, message: impl Into<String>) -> Self {
        Self::PartialFailure {
            failed,
            message: message.into(),
        }
    }

    pub fn scheduling(msg: impl Into<String>) -> Self {
        Self::Scheduling(msg.into())
    }

    pub fn deserialization(msg: impl Into<String>) -> Self {
        Self::Deserialization(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Caller input errors are never worth retrying.
    pub fn is_validation(&self) -> bool {
        matches!(self, BulkError::Validation(_))
    }
}
