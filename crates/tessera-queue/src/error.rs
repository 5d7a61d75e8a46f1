//! Error types for queue operations.
//!
//! Item failures are not errors at this level: they are captured into the
//! job's result. What surfaces here are unknown ids, worker supervision
//! problems, and storage failures.

use std::time::Duration;

use tessera_core::CoreError;

/// Result type alias using `QueueError`.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors returned by queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Invalid caller input.
    #[error("validation failed: {message}")]
    Validation {
        /// What was rejected.
        message: String,
    },

    /// Unknown job or dead-letter id.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity looked up.
        entity: &'static str,
        /// Identifier that was not found.
        id: String,
    },

    /// Workers did not stop within the shutdown timeout.
    #[error("worker shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Configured timeout.
        timeout: Duration,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Worker index.
        worker_id: usize,
        /// Panic description.
        error: String,
    },

    /// Snapshot persistence failed.
    #[error(transparent)]
    Storage(#[from] CoreError),
}

impl QueueError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Creates a not-found error.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    /// Storage failures are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_retryable())
    }

    /// Errors caused by the caller's request.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::NotFound { .. })
    }
}
