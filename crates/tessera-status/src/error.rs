//! Error types for status list operations.

use tessera_core::{CoreError, ListId};

/// Result type alias using `StatusListError`.
pub type Result<T> = std::result::Result<T, StatusListError>;

/// Errors raised by status list operations.
#[derive(Debug, thiserror::Error)]
pub enum StatusListError {
    /// List has no free index left. Callers provision a new list id.
    #[error("status list '{list_id}' is full (capacity {capacity})")]
    Capacity {
        /// Exhausted list.
        list_id: ListId,
        /// Fixed capacity of that list.
        capacity: usize,
    },

    /// Unknown list id.
    #[error("status list '{list_id}' not found")]
    NotFound {
        /// Requested list.
        list_id: ListId,
    },

    /// Invalid caller input.
    #[error("validation failed: {message}")]
    Validation {
        /// What was rejected.
        message: String,
    },

    /// Published bitstring could not be decoded.
    #[error("invalid bitstring: {reason}")]
    InvalidBitstring {
        /// Decoder failure.
        reason: String,
    },

    /// Snapshot persistence failed.
    #[error(transparent)]
    Storage(#[from] CoreError),
}

impl StatusListError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Only storage failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_retryable())
    }

    /// Errors the caller must fix before trying again.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Capacity { .. }
                | Self::NotFound { .. }
                | Self::Validation { .. }
                | Self::InvalidBitstring { .. }
        )
    }
}
