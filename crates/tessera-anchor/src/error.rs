//! Error types for batch anchoring.
//!
//! Relayer failures never appear here: they are captured into the batch's
//! `failed` state and its dead-letter entry. What callers see are input
//! problems, lifecycle violations, and storage failures.

use tessera_core::{BatchId, CoreError, CredentialId};
use tessera_merkle::MerkleError;

use crate::batch::BatchStatus;

/// Result type alias using `AnchorError`.
pub type Result<T> = std::result::Result<T, AnchorError>;

/// Errors returned by anchoring operations.
#[derive(Debug, thiserror::Error)]
pub enum AnchorError {
    /// Malformed or inconsistent input.
    #[error("validation failed: {message}")]
    Validation {
        /// What was rejected.
        message: String,
    },

    /// Credential already anchored under a different root, or a root that
    /// another batch already owns for different credentials.
    #[error("credential {credential_id} already bound to batch {batch_id}")]
    Conflict {
        /// Credential that would have moved.
        credential_id: CredentialId,
        /// Batch that currently owns it.
        batch_id: BatchId,
    },

    /// Unknown batch or credential.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity looked up.
        entity: &'static str,
        /// Identifier that was not found.
        id: String,
    },

    /// Operation not allowed from the batch's current state.
    #[error("batch {batch_id} cannot {operation} from status {status}")]
    InvalidTransition {
        /// Batch concerned.
        batch_id: BatchId,
        /// Attempted operation.
        operation: &'static str,
        /// Status at the time of the attempt.
        status: BatchStatus,
    },

    /// Background task did not stop within the shutdown timeout.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Configured timeout.
        timeout: std::time::Duration,
    },

    /// Hash input could not be parsed.
    #[error(transparent)]
    Merkle(#[from] MerkleError),

    /// Snapshot persistence failed.
    #[error(transparent)]
    Storage(#[from] CoreError),
}

impl AnchorError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Creates a not-found error for a batch.
    pub fn batch_not_found(batch_id: BatchId) -> Self {
        Self::NotFound { entity: "batch", id: batch_id.to_string() }
    }

    /// Creates a not-found error for a credential.
    pub fn credential_not_found(credential_id: &CredentialId) -> Self {
        Self::NotFound { entity: "credential", id: credential_id.to_string() }
    }

    /// Storage failures are transient; the rest are deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_retryable())
    }

    /// Errors caused by the caller's input or request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::Conflict { .. }
                | Self::NotFound { .. }
                | Self::InvalidTransition { .. }
                | Self::Merkle(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(AnchorError::validation("empty").is_client_error());
        assert!(AnchorError::Storage(CoreError::storage("down")).is_retryable());
        assert!(!AnchorError::Storage(CoreError::storage("down")).is_client_error());
        assert!(!AnchorError::batch_not_found(BatchId::new()).is_retryable());
    }

    #[test]
    fn conflict_message_names_existing_batch() {
        let batch_id = BatchId::new();
        let err = AnchorError::Conflict { credential_id: CredentialId::from("cred-7"), batch_id };

        assert_eq!(err.to_string(), format!("credential cred-7 already bound to batch {batch_id}"));
    }
}
