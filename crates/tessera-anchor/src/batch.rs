//! Batch records, dead letters, and persisted anchoring state.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_core::{BatchId, CredentialId};
use tessera_merkle::{MerkleHash, MerkleProof};

/// Lifecycle state of a batch.
///
/// Batches move forward `Queued → Submitted → Confirmed`, or sideways into
/// `Failed`, which only an explicit replay leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Created, not yet accepted by the relayer.
    Queued,
    /// Relayer accepted the root; awaiting finality.
    Submitted,
    /// Anchoring is final.
    Confirmed,
    /// Last relayer call failed; parked for replay.
    Failed,
}

impl BatchStatus {
    /// States from which a real relayer call is made.
    pub fn is_submittable(self) -> bool {
        matches!(self, Self::Queued | Self::Failed)
    }

    /// Lowercase name used in logs and persisted history.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transition in a batch's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHistoryEntry {
    /// Status entered.
    pub status: BatchStatus,
    /// When the transition happened.
    pub at: DateTime<Utc>,
    /// Attempt count at the time.
    pub attempt: u32,
    /// Ledger transaction, when known.
    pub tx_hash: Option<String>,
    /// Failure reason or other context.
    pub note: Option<String>,
}

/// A set of credential hashes anchored under one Merkle root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleBatch {
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Credentials in leaf order.
    pub credential_ids: Vec<CredentialId>,
    /// Normalized leaf hashes, parallel to `credential_ids`.
    pub leaf_hashes: Vec<MerkleHash>,
    /// Root over `leaf_hashes`.
    pub merkle_root: MerkleHash,
    /// Inclusion proof per credential.
    pub proofs: BTreeMap<CredentialId, MerkleProof>,
    /// Current lifecycle state.
    pub status: BatchStatus,
    /// Ledger transaction hash once submitted.
    pub tx_hash: Option<String>,
    /// Relayer calls made so far.
    pub attempt_count: u32,
    /// Time of the most recent relayer call.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Most recent relayer failure.
    pub last_error: Option<String>,
    /// When the relayer accepted the root.
    pub submitted_at: Option<DateTime<Utc>>,
    /// Earliest time the submission counts as final.
    pub confirm_after: Option<DateTime<Utc>>,
    /// When the batch was confirmed.
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Transition audit trail, oldest first.
    pub history: Vec<BatchHistoryEntry>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl MerkleBatch {
    /// Moves the batch to `status` and appends a history entry.
    pub(crate) fn transition(
        &mut self,
        status: BatchStatus,
        at: DateTime<Utc>,
        note: Option<String>,
    ) {
        self.status = status;
        self.updated_at = at;
        self.history.push(BatchHistoryEntry {
            status,
            at,
            attempt: self.attempt_count,
            tx_hash: self.tx_hash.clone(),
            note,
        });
    }
}

/// Dead-letter record for a batch whose relayer call failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorDeadLetter {
    /// Failed batch.
    pub batch_id: BatchId,
    /// Relayer failure description.
    pub reason: String,
    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
    /// Attempts made so far.
    pub attempts: u32,
    /// Transaction hash from an earlier successful submission, if any.
    pub tx_hash: Option<String>,
    /// Earliest suggested replay time.
    pub next_retry_at: DateTime<Utc>,
    /// Backoff delay in whole seconds, never zero.
    pub retry_after_seconds: u64,
}

/// Membership proof handed to external verifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialProof {
    /// Batch containing the credential.
    pub batch_id: BatchId,
    /// Anchored root.
    pub merkle_root: MerkleHash,
    /// Positional inclusion proof.
    pub proof: MerkleProof,
}

impl CredentialProof {
    /// Whether the proof reconstructs the anchored root.
    pub fn verify(&self) -> bool {
        self.proof.verify(&self.merkle_root)
    }
}

/// Everything the manager persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct AnchorState {
    pub(crate) batches: BTreeMap<BatchId, MerkleBatch>,
    /// Root hex to batch; enforces one batch per distinct leaf list.
    pub(crate) root_index: BTreeMap<String, BatchId>,
    /// Credential to owning batch.
    pub(crate) credential_index: BTreeMap<CredentialId, BatchId>,
    pub(crate) dead_letters: BTreeMap<BatchId, AnchorDeadLetter>,
}
