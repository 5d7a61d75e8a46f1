//! Error types for snapshot persistence and shared infrastructure.
//!
//! Storage failures are the engine's transient infrastructure errors: callers
//! surface them unchanged and the in-memory state is left untouched.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the shared infrastructure layer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Durable store read or write failed.
    #[error("storage error: {message}")]
    Storage {
        /// Underlying failure description.
        message: String,
    },

    /// Snapshot could not be encoded or decoded.
    #[error("snapshot serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// Requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Creates a storage error from a message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Storage failures are transient; everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("snapshot row not found".to_string()),
            other => Self::Storage { message: other.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_retryable() {
        assert!(CoreError::storage("connection reset").is_retryable());
        assert!(!CoreError::NotFound("batch".into()).is_retryable());
        assert!(!CoreError::InvalidInput("empty".into()).is_retryable());
    }

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let err = CoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn error_message_formatting() {
        assert_eq!(CoreError::storage("disk full").to_string(), "storage error: disk full");
    }
}
