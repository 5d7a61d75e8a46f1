//! Merkle batch construction for credential anchoring.
//!
//! Many credential content hashes are folded into one root so that a single
//! ledger write covers the whole batch. Every leaf receives a positional
//! inclusion proof that verifiers can check against the anchored root without
//! access to the other leaves.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod hash;
pub mod tree;

pub use error::{MerkleError, Result};
pub use hash::MerkleHash;
pub use tree::{build_tree, combine, MerkleProof, MerkleTree};
