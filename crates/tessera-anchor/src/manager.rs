//! Batch lifecycle management.
//!
//! All state lives in one persisted snapshot: batches keyed by id, a root
//! index enforcing one batch per distinct leaf list, a credential index
//! enforcing one root per credential, and the dead-letter map. Relayer calls
//! for a given batch are serialized by a per-batch lock, so two concurrent
//! `submit` calls never both reach the relayer.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use tessera_core::{
    BatchId, Clock, CredentialId, EngineEvent, EventHandler, NoOpEventHandler, SnapshotCell,
    SnapshotStore,
};
use tessera_merkle::{build_tree, MerkleHash};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    batch::{AnchorDeadLetter, AnchorState, BatchStatus, CredentialProof, MerkleBatch},
    config::AnchorConfig,
    error::{AnchorError, Result},
    relayer::{LedgerRelayer, RelayerError},
};

/// Snapshot key for anchoring state.
const SNAPSHOT_KEY: &str = "anchor_batches";

/// Owns the `queued → submitted → confirmed | failed` lifecycle of batches.
pub struct AnchorBatchManager {
    state: SnapshotCell<AnchorState>,
    relayer: Arc<dyn LedgerRelayer>,
    config: AnchorConfig,
    clock: Arc<dyn Clock>,
    event_handler: Arc<dyn EventHandler>,
    submit_locks: Mutex<HashMap<BatchId, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for AnchorBatchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorBatchManager")
            .field("state", &self.state)
            .field("relayer", &self.relayer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AnchorBatchManager {
    /// Creates a manager persisting through `store` and anchoring via
    /// `relayer`.
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        relayer: Arc<dyn LedgerRelayer>,
        config: AnchorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: SnapshotCell::new(store, SNAPSHOT_KEY),
            relayer,
            config,
            clock,
            event_handler: Arc::new(NoOpEventHandler),
            submit_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Routes lifecycle events to `handler`.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = handler;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    /// Loads persisted batches. Called once during startup.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot cannot be loaded.
    pub async fn hydrate(&self) -> Result<()> {
        self.state.hydrate().await?;

        let in_flight = self.batches_with_status(BatchStatus::Submitted).await?.len();
        if in_flight > 0 {
            info!(in_flight, "restored submitted batches awaiting confirmation");
        }
        Ok(())
    }

    /// Builds a batch over `hash_inputs` and records it as `queued`.
    ///
    /// Hash inputs are normalized to lowercase hex without prefix. Creating a
    /// batch whose root already exists returns the existing batch unchanged,
    /// provided it was built for the same credential ids in the same order.
    ///
    /// # Errors
    ///
    /// - `Validation` for empty input, mismatched lengths, or duplicate
    ///   credential ids
    /// - `Merkle` for malformed hashes
    /// - `Conflict` when a credential is already bound to a different root,
    ///   or when the root is already owned by a batch for other credentials
    pub async fn create_batch(
        &self,
        credential_ids: Vec<CredentialId>,
        hash_inputs: Vec<String>,
    ) -> Result<MerkleBatch> {
        if credential_ids.is_empty() {
            return Err(AnchorError::validation("batch requires at least one credential"));
        }
        if credential_ids.len() != hash_inputs.len() {
            return Err(AnchorError::validation(format!(
                "{} credential ids but {} hashes",
                credential_ids.len(),
                hash_inputs.len()
            )));
        }
        let mut seen = BTreeSet::new();
        if let Some(duplicate) = credential_ids.iter().find(|id| !seen.insert(*id)) {
            return Err(AnchorError::validation(format!(
                "credential {duplicate} appears more than once"
            )));
        }

        let leaves = hash_inputs
            .iter()
            .map(|input| MerkleHash::parse_hex(input))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let tree = build_tree(&leaves);
        let root_hex = tree.root().to_hex();

        let log_conflict = |err: &AnchorError| {
            if let AnchorError::Conflict { credential_id, batch_id } = err {
                warn!(
                    credential_id = %credential_id,
                    existing_batch_id = %batch_id,
                    merkle_root = %root_hex,
                    "credential cannot be bound to this root"
                );
            }
        };

        let existing = self
            .state
            .read(|state| {
                state.root_index.get(&root_hex).and_then(|id| state.batches.get(id)).cloned()
            })
            .await?;
        if let Some(existing) = existing {
            let existing = same_credentials(&existing, &credential_ids).inspect_err(log_conflict)?;
            debug!(batch_id = %existing.batch_id, merkle_root = %root_hex, "batch already exists for root");
            return Ok(existing);
        }

        let proofs: BTreeMap<_, _> = credential_ids.iter().cloned().zip(tree.proofs()).collect();
        let merkle_root = tree.root().clone();
        let now = self.clock.now_utc();

        let batch = self
            .state
            .mutate(|state| {
                if let Some(existing) =
                    state.root_index.get(&root_hex).and_then(|id| state.batches.get(id))
                {
                    return same_credentials(existing, &credential_ids);
                }
                if let Some((credential_id, batch_id)) = credential_ids
                    .iter()
                    .find_map(|id| state.credential_index.get(id).map(|batch| (id, *batch)))
                {
                    return Err(AnchorError::Conflict {
                        credential_id: credential_id.clone(),
                        batch_id,
                    });
                }

                let mut batch = MerkleBatch {
                    batch_id: BatchId::new(),
                    credential_ids: credential_ids.clone(),
                    leaf_hashes: leaves,
                    merkle_root,
                    proofs,
                    status: BatchStatus::Queued,
                    tx_hash: None,
                    attempt_count: 0,
                    last_attempt_at: None,
                    last_error: None,
                    submitted_at: None,
                    confirm_after: None,
                    confirmed_at: None,
                    history: Vec::new(),
                    created_at: now,
                    updated_at: now,
                };
                batch.transition(BatchStatus::Queued, now, None);

                state.root_index.insert(root_hex.clone(), batch.batch_id);
                for credential_id in &credential_ids {
                    state.credential_index.insert(credential_id.clone(), batch.batch_id);
                }
                state.batches.insert(batch.batch_id, batch.clone());
                Ok(batch)
            })
            .await
            .inspect_err(log_conflict)?;

        info!(
            batch_id = %batch.batch_id,
            merkle_root = %batch.merkle_root,
            leaf_count = batch.leaf_hashes.len(),
            "anchor batch created"
        );
        Ok(batch)
    }

    /// Sends the batch root to the relayer.
    ///
    /// A no-op returning the batch unchanged when it is already `submitted`
    /// or `confirmed`. Relayer failures are not errors: the batch moves to
    /// `failed` with a dead-letter entry and is returned.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown batches and `Storage` when the outcome
    /// cannot be persisted.
    pub async fn submit(&self, batch_id: BatchId) -> Result<MerkleBatch> {
        let lock = self.submit_lock(batch_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.submit_locked(batch_id).await
        };
        drop(lock);
        self.release_submit_lock(batch_id).await;
        result
    }

    /// Confirms a submitted batch.
    ///
    /// Anything other than `submitted` is left untouched, which discards
    /// confirmations that arrive after the batch failed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown batches.
    pub async fn confirm(&self, batch_id: BatchId) -> Result<MerkleBatch> {
        let current = self.get_batch(batch_id).await?;
        if current.status != BatchStatus::Submitted {
            debug!(batch_id = %batch_id, status = %current.status, "confirmation discarded");
            return Ok(current);
        }

        let now = self.clock.now_utc();
        let (batch, confirmed) = self
            .state
            .mutate(|state| {
                let batch = state
                    .batches
                    .get_mut(&batch_id)
                    .ok_or_else(|| AnchorError::batch_not_found(batch_id))?;
                if batch.status != BatchStatus::Submitted {
                    return Ok((batch.clone(), false));
                }

                batch.confirmed_at = Some(now);
                batch.transition(BatchStatus::Confirmed, now, None);
                let batch = batch.clone();
                state.dead_letters.remove(&batch_id);
                Ok::<_, AnchorError>((batch, true))
            })
            .await?;

        if confirmed {
            self.release_submit_lock(batch_id).await;
            info!(batch_id = %batch_id, tx_hash = ?batch.tx_hash, "anchor batch confirmed");
            self.event_handler
                .handle_event(EngineEvent::BatchConfirmed { batch_id, confirmed_at: now })
                .await;
        }
        Ok(batch)
    }

    /// Confirms every submitted batch whose finality delay has elapsed.
    ///
    /// Batches restored without a `confirm_after` are treated as due.
    ///
    /// # Errors
    ///
    /// Returns error on the first storage failure.
    pub async fn confirm_due(&self) -> Result<Vec<MerkleBatch>> {
        let now = self.clock.now_utc();
        let due: Vec<BatchId> = self
            .state
            .read(|state| {
                state
                    .batches
                    .values()
                    .filter(|batch| batch.status == BatchStatus::Submitted)
                    .filter(|batch| batch.confirm_after.map_or(true, |at| at <= now))
                    .map(|batch| batch.batch_id)
                    .collect()
            })
            .await?;

        let mut confirmed = Vec::with_capacity(due.len());
        for batch_id in due {
            let batch = self.confirm(batch_id).await?;
            if batch.status == BatchStatus::Confirmed {
                confirmed.push(batch);
            }
        }
        Ok(confirmed)
    }

    /// Resets a failed batch to `queued` and submits it again.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the batch is `failed`.
    pub async fn replay(&self, batch_id: BatchId) -> Result<MerkleBatch> {
        let lock = self.submit_lock(batch_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.replay_locked(batch_id).await
        };
        drop(lock);
        self.release_submit_lock(batch_id).await;
        result
    }

    /// Replay body; the caller holds the batch's submit lock.
    async fn replay_locked(&self, batch_id: BatchId) -> Result<MerkleBatch> {
        let current = self.get_batch(batch_id).await?;
        if current.status != BatchStatus::Failed {
            return Err(AnchorError::InvalidTransition {
                batch_id,
                operation: "replay",
                status: current.status,
            });
        }

        let now = self.clock.now_utc();
        self.state
            .mutate(|state| {
                let batch = state
                    .batches
                    .get_mut(&batch_id)
                    .ok_or_else(|| AnchorError::batch_not_found(batch_id))?;
                batch.last_error = None;
                batch.transition(BatchStatus::Queued, now, Some("replay requested".to_string()));
                state.dead_letters.remove(&batch_id);
                Ok::<_, AnchorError>(())
            })
            .await?;

        info!(batch_id = %batch_id, attempts = current.attempt_count, "replaying dead-lettered batch");
        self.submit_locked(batch_id).await
    }

    /// Replays up to `limit` dead letters whose retry time has passed and
    /// whose attempts are below the policy ceiling, earliest first.
    ///
    /// # Errors
    ///
    /// Returns error on the first storage failure.
    pub async fn replay_due(&self, limit: usize) -> Result<Vec<MerkleBatch>> {
        let now = self.clock.now_utc();
        let max_attempts = self.config.retry_policy.max_attempts;
        let due: Vec<BatchId> = self
            .state
            .read(|state| {
                let mut due: Vec<&AnchorDeadLetter> = state
                    .dead_letters
                    .values()
                    .filter(|entry| entry.next_retry_at <= now && entry.attempts < max_attempts)
                    .collect();
                due.sort_by_key(|entry| entry.next_retry_at);
                due.into_iter().take(limit).map(|entry| entry.batch_id).collect()
            })
            .await?;

        let mut replayed = Vec::with_capacity(due.len());
        for batch_id in due {
            match self.replay(batch_id).await {
                Ok(batch) => replayed.push(batch),
                Err(AnchorError::InvalidTransition { status, .. }) => {
                    debug!(batch_id = %batch_id, status = %status, "dead letter resolved concurrently");
                },
                Err(e) => return Err(e),
            }
        }
        Ok(replayed)
    }

    /// Membership proof for a credential.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the credential was never batched.
    pub async fn get_proof(&self, credential_id: &CredentialId) -> Result<CredentialProof> {
        self.state
            .read(|state| {
                let batch_id = state.credential_index.get(credential_id)?;
                let batch = state.batches.get(batch_id)?;
                let proof = batch.proofs.get(credential_id)?;
                Some(CredentialProof {
                    batch_id: *batch_id,
                    merkle_root: batch.merkle_root.clone(),
                    proof: proof.clone(),
                })
            })
            .await?
            .ok_or_else(|| AnchorError::credential_not_found(credential_id))
    }

    /// Current state of a batch.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown batches.
    pub async fn get_batch(&self, batch_id: BatchId) -> Result<MerkleBatch> {
        self.state
            .read(|state| state.batches.get(&batch_id).cloned())
            .await?
            .ok_or_else(|| AnchorError::batch_not_found(batch_id))
    }

    /// Batches currently in `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if hydration fails.
    pub async fn batches_with_status(&self, status: BatchStatus) -> Result<Vec<MerkleBatch>> {
        let mut batches: Vec<MerkleBatch> = self
            .state
            .read(|state| {
                state.batches.values().filter(|batch| batch.status == status).cloned().collect()
            })
            .await?;
        batches.sort_by_key(|batch| batch.created_at);
        Ok(batches)
    }

    /// Up to `limit` dead letters, oldest failure first.
    ///
    /// # Errors
    ///
    /// Returns error if hydration fails.
    pub async fn list_dead_letters(&self, limit: usize) -> Result<Vec<AnchorDeadLetter>> {
        let mut entries: Vec<AnchorDeadLetter> =
            self.state.read(|state| state.dead_letters.values().cloned().collect()).await?;
        entries.sort_by_key(|entry| entry.failed_at);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn submit_lock(&self, batch_id: BatchId) -> Arc<Mutex<()>> {
        self.submit_locks.lock().await.entry(batch_id).or_default().clone()
    }

    /// Drops the batch's lock entry once no caller holds or awaits it.
    async fn release_submit_lock(&self, batch_id: BatchId) {
        let mut locks = self.submit_locks.lock().await;
        if locks.get(&batch_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&batch_id);
        }
    }

    /// Submission body; the caller holds the batch's submit lock.
    async fn submit_locked(&self, batch_id: BatchId) -> Result<MerkleBatch> {
        let batch = self.get_batch(batch_id).await?;
        if !batch.status.is_submittable() {
            debug!(batch_id = %batch_id, status = %batch.status, "batch already submitted");
            return Ok(batch);
        }

        let attempt = batch.attempt_count + 1;
        let attempted_at = self.clock.now_utc();
        debug!(
            batch_id = %batch_id,
            merkle_root = %batch.merkle_root,
            attempt,
            "submitting batch root to relayer"
        );

        match self.relayer.anchor(&batch.merkle_root).await {
            Ok(tx_hash) => self.record_submission(batch_id, attempt, attempted_at, tx_hash).await,
            Err(error) => self.record_failure(batch_id, attempt, attempted_at, &error).await,
        }
    }

    async fn record_submission(
        &self,
        batch_id: BatchId,
        attempt: u32,
        attempted_at: DateTime<Utc>,
        tx_hash: String,
    ) -> Result<MerkleBatch> {
        let now = self.clock.now_utc();
        let confirm_after = offset(now, self.config.finality_delay);

        let batch = self
            .state
            .mutate(|state| {
                let batch = state
                    .batches
                    .get_mut(&batch_id)
                    .ok_or_else(|| AnchorError::batch_not_found(batch_id))?;
                batch.attempt_count = attempt;
                batch.last_attempt_at = Some(attempted_at);
                batch.last_error = None;
                batch.tx_hash = Some(tx_hash.clone());
                batch.submitted_at = Some(now);
                batch.confirm_after = Some(confirm_after);
                batch.transition(BatchStatus::Submitted, now, None);
                let batch = batch.clone();
                state.dead_letters.remove(&batch_id);
                Ok::<_, AnchorError>(batch)
            })
            .await?;

        info!(
            batch_id = %batch_id,
            merkle_root = %batch.merkle_root,
            tx_hash = %tx_hash,
            attempt,
            "anchor batch submitted"
        );
        self.event_handler
            .handle_event(EngineEvent::BatchSubmitted {
                batch_id,
                merkle_root: batch.merkle_root.to_hex(),
                tx_hash,
                attempt,
            })
            .await;
        Ok(batch)
    }

    async fn record_failure(
        &self,
        batch_id: BatchId,
        attempt: u32,
        attempted_at: DateTime<Utc>,
        error: &RelayerError,
    ) -> Result<MerkleBatch> {
        let reason = error.to_string();
        let now = self.clock.now_utc();
        let policy = &self.config.retry_policy;
        let (next_retry_at, retry_after_seconds) = policy.schedule(now, attempt);

        let batch = self
            .state
            .mutate(|state| {
                let batch = state
                    .batches
                    .get_mut(&batch_id)
                    .ok_or_else(|| AnchorError::batch_not_found(batch_id))?;
                batch.attempt_count = attempt;
                batch.last_attempt_at = Some(attempted_at);
                batch.last_error = Some(reason.clone());
                batch.transition(BatchStatus::Failed, now, Some(reason.clone()));
                let batch = batch.clone();
                state.dead_letters.insert(
                    batch_id,
                    AnchorDeadLetter {
                        batch_id,
                        reason: reason.clone(),
                        failed_at: now,
                        attempts: attempt,
                        tx_hash: batch.tx_hash.clone(),
                        next_retry_at,
                        retry_after_seconds,
                    },
                );
                Ok::<_, AnchorError>(batch)
            })
            .await?;

        warn!(
            batch_id = %batch_id,
            attempt,
            retryable = error.is_retryable(),
            retry_after_seconds,
            error = %reason,
            "anchor submission failed, batch dead-lettered"
        );
        if !policy.has_attempts_remaining(attempt) {
            error!(
                batch_id = %batch_id,
                attempts = attempt,
                "batch exhausted automatic retries, manual replay required"
            );
        }

        self.event_handler
            .handle_event(EngineEvent::BatchFailed {
                batch_id,
                reason,
                attempts: attempt,
                next_retry_at,
            })
            .await;
        Ok(batch)
    }
}

/// Returns `existing` when it was built for exactly `credential_ids`.
///
/// A shared root with different credentials would hand out proofs for leaves
/// those credentials never contributed, so it is reported as a conflict on the
/// first credential that does not line up.
fn same_credentials(
    existing: &MerkleBatch,
    credential_ids: &[CredentialId],
) -> Result<MerkleBatch> {
    if existing.credential_ids == credential_ids {
        return Ok(existing.clone());
    }
    let credential_id = credential_ids
        .iter()
        .enumerate()
        .find(|(index, id)| existing.credential_ids.get(*index) != Some(*id))
        .map_or(&credential_ids[0], |(_, id)| id);
    Err(AnchorError::Conflict { credential_id: credential_id.clone(), batch_id: existing.batch_id })
}

/// `at + delay`, saturating at the maximum representable time.
fn offset(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| at.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
