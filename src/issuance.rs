//! Credential issuance workflow.
//!
//! Issuing a credential hashes its id together with its canonical body,
//! reserves a revocation status slot, and anchors the hash through a Merkle
//! batch. The pipeline is
//! idempotent per credential: re-issuing the same body returns the existing
//! slot and batch without another relayer call.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessera_anchor::{AnchorBatchManager, AnchorError, BatchStatus, MerkleBatch};
use tessera_core::{BatchId, CredentialId, ListId};
use tessera_merkle::MerkleHash;
use tessera_queue::{ItemError, ItemProcessor};
use tessera_status::{RevocationStatusList, StatusEntry, StatusListError};
use tracing::{info, warn};

/// Errors from the issuance workflow.
#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    /// Request was malformed.
    #[error("invalid issuance request: {message}")]
    Validation {
        /// What was wrong.
        message: String,
    },

    /// Credential body could not be serialized.
    #[error("credential body could not be canonicalized: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anchoring rejected the credential.
    #[error(transparent)]
    Anchor(#[from] AnchorError),

    /// Status list rejected the credential.
    #[error(transparent)]
    Status(#[from] StatusListError),
}

impl IssuanceError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Anchor(e) => e.is_retryable(),
            Self::Status(e) => e.is_retryable(),
            Self::Validation { .. } | Self::Serialization(_) => false,
        }
    }

    /// Whether the caller sent a request that can never succeed.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Anchor(e) => e.is_client_error(),
            Self::Status(e) => e.is_client_error(),
            Self::Validation { .. } | Self::Serialization(_) => true,
        }
    }
}

/// Result type for issuance operations.
pub type Result<T> = std::result::Result<T, IssuanceError>;

/// One credential to issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuanceRequest {
    /// Identifier minted by the issuer.
    pub credential_id: CredentialId,
    /// Status list to place the credential in; the default list when absent.
    #[serde(default)]
    pub list_id: Option<ListId>,
    /// Credential document.
    pub body: serde_json::Value,
}

impl IssuanceRequest {
    /// Request for the default status list.
    pub fn new(credential_id: impl Into<CredentialId>, body: serde_json::Value) -> Self {
        Self { credential_id: credential_id.into(), list_id: None, body }
    }

    /// Places the credential in `list_id`.
    pub fn with_list(mut self, list_id: impl Into<ListId>) -> Self {
        self.list_id = Some(list_id.into());
        self
    }
}

/// Outcome of issuing one credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuanceReceipt {
    /// Issued credential.
    pub credential_id: CredentialId,
    /// Hex leaf hash binding the credential id to its canonical body.
    pub content_hash: String,
    /// Revocation status slot.
    pub status: StatusEntry,
    /// Batch anchoring the credential.
    pub batch_id: BatchId,
    /// Root covering the credential.
    pub merkle_root: String,
    /// Batch state after the submission attempt.
    pub batch_status: BatchStatus,
    /// Ledger transaction, once submitted.
    pub tx_hash: Option<String>,
}

impl IssuanceReceipt {
    fn new(content_hash: String, status: StatusEntry, batch: &MerkleBatch) -> Self {
        Self {
            credential_id: status.credential_id.clone(),
            content_hash,
            status,
            batch_id: batch.batch_id,
            merkle_root: batch.merkle_root.to_hex(),
            batch_status: batch.status,
            tx_hash: batch.tx_hash.clone(),
        }
    }
}

/// Canonical leaf preimage.
#[derive(Serialize)]
struct LeafContent<'a> {
    credential_id: &'a CredentialId,
    body: &'a serde_json::Value,
}

/// SHA-256 of the credential id and the credential's canonical JSON.
///
/// Object keys serialize in sorted order, so documents that differ only in
/// key order hash identically. The id is part of the preimage, so two
/// credentials with the same body never share a leaf or a root.
///
/// # Errors
///
/// Returns error if the value cannot be serialized.
pub fn content_hash(credential_id: &CredentialId, body: &serde_json::Value) -> Result<MerkleHash> {
    let canonical = serde_json::to_vec(&LeafContent { credential_id, body })?;
    Ok(MerkleHash::content_hash(&canonical))
}

/// Registers and anchors credentials.
#[derive(Debug, Clone)]
pub struct IssuancePipeline {
    anchor: Arc<AnchorBatchManager>,
    status: Arc<RevocationStatusList>,
}

impl IssuancePipeline {
    /// Creates a pipeline over the given anchoring and status services.
    pub fn new(anchor: Arc<AnchorBatchManager>, status: Arc<RevocationStatusList>) -> Self {
        Self { anchor, status }
    }

    /// Issues one credential in its own single-leaf batch.
    ///
    /// A relayer failure is not an error: the receipt reports a `failed`
    /// batch that the anchoring dead-letter flow will replay.
    ///
    /// # Errors
    ///
    /// - `Status(Capacity)` when the target list is full
    /// - `Anchor(Conflict)` when the credential id is already anchored with
    ///   a different body
    /// - `Serialization` for bodies that cannot be encoded
    pub async fn issue(&self, request: &IssuanceRequest) -> Result<IssuanceReceipt> {
        let mut receipts = self.issue_batch(std::slice::from_ref(request)).await?;
        receipts.pop().ok_or_else(|| IssuanceError::validation("no receipt produced"))
    }

    /// Issues many credentials under one Merkle root and one relayer call.
    ///
    /// Receipts are returned in request order.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty request list, otherwise as
    /// [`issue`](Self::issue). Status slots reserved before an anchoring
    /// error stay allocated; re-issuing reuses them.
    pub async fn issue_batch(&self, requests: &[IssuanceRequest]) -> Result<Vec<IssuanceReceipt>> {
        if requests.is_empty() {
            return Err(IssuanceError::validation("at least one credential is required"));
        }

        let hashes = requests
            .iter()
            .map(|request| {
                content_hash(&request.credential_id, &request.body).map(|hash| hash.to_hex())
            })
            .collect::<Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(requests.len());
        for request in requests {
            let list_id = request.list_id.clone().unwrap_or_default();
            entries.push(self.status.register_credential(&request.credential_id, &list_id).await?);
        }

        let credential_ids = requests.iter().map(|request| request.credential_id.clone()).collect();
        let batch = self.anchor.create_batch(credential_ids, hashes.clone()).await?;
        let batch = self.anchor.submit(batch.batch_id).await?;

        if batch.status == BatchStatus::Failed {
            warn!(
                batch_id = %batch.batch_id,
                error = batch.last_error.as_deref().unwrap_or("unknown"),
                "credentials registered but anchoring deferred to dead-letter replay"
            );
        } else {
            info!(
                batch_id = %batch.batch_id,
                credentials = requests.len(),
                status = %batch.status,
                "credentials issued"
            );
        }

        Ok(hashes
            .into_iter()
            .zip(entries)
            .map(|(hash, entry)| IssuanceReceipt::new(hash, entry, &batch))
            .collect())
    }

    /// Revokes a credential. Returns `None` for unknown credentials.
    ///
    /// # Errors
    ///
    /// Returns error if the status change cannot be persisted.
    pub async fn revoke(&self, credential_id: &CredentialId) -> Result<Option<StatusEntry>> {
        Ok(self.status.revoke(credential_id).await?)
    }
}

/// Adapts [`IssuancePipeline`] to the bulk job queue.
///
/// An item fails only when issuance itself errors. Anchoring failures are
/// owned by the anchoring dead-letter flow and do not fail the item.
#[derive(Debug, Clone)]
pub struct BulkIssuanceProcessor {
    pipeline: Arc<IssuancePipeline>,
}

impl BulkIssuanceProcessor {
    /// Wraps `pipeline`.
    pub fn new(pipeline: Arc<IssuancePipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl ItemProcessor<IssuanceRequest> for BulkIssuanceProcessor {
    async fn process(&self, item: &IssuanceRequest) -> std::result::Result<(), ItemError> {
        self.pipeline.issue(item).await.map(|_| ()).map_err(|e| {
            ItemError::new(format!("credential {}: {e}", item.credential_id))
        })
    }
}
