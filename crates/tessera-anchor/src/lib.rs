//! Ledger anchoring for credential hash batches.
//!
//! [`AnchorBatchManager`] folds credential hashes into Merkle batches, hands
//! each root to a [`LedgerRelayer`], and tracks the batch through
//! `queued → submitted → confirmed`. Relayer failures park the batch in a
//! dead-letter store with a backoff-derived retry time; [`ConfirmationPoller`]
//! finalizes submitted batches and optionally replays due dead letters.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod config;
pub mod error;
pub mod manager;
pub mod poller;
pub mod relayer;

pub use batch::{AnchorDeadLetter, BatchHistoryEntry, BatchStatus, CredentialProof, MerkleBatch};
pub use config::AnchorConfig;
pub use error::{AnchorError, Result};
pub use manager::AnchorBatchManager;
pub use poller::{ConfirmationPoller, PollOutcome};
pub use relayer::{HttpRelayer, LedgerRelayer, RelayerConfig, RelayerError};
