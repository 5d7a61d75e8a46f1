//! Error types for hash parsing and proof verification.

/// Result type alias using `MerkleError`.
pub type Result<T> = std::result::Result<T, MerkleError>;

/// Errors raised while handling Merkle hashes and proofs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    /// Input is not a usable hex digest.
    #[error("invalid hash '{input}': {reason}")]
    InvalidHash {
        /// Offending input as supplied.
        input: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Proof requested for a leaf that does not exist.
    #[error("leaf index {index} out of range for tree with {leaf_count} leaves")]
    LeafIndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of leaves in the tree.
        leaf_count: usize,
    },

    /// Proof does not reconstruct the expected root.
    #[error("proof verification failed: expected root {expected}, computed {computed}")]
    ProofVerificationFailed {
        /// Root the proof was checked against.
        expected: String,
        /// Root the proof actually produces.
        computed: String,
    },
}

impl MerkleError {
    /// Creates an invalid-hash error.
    pub fn invalid_hash(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidHash { input: input.into(), reason: reason.into() }
    }

    /// All Merkle errors stem from caller input and are never retried.
    pub fn is_client_error(&self) -> bool {
        true
    }
}
