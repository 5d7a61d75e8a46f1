//! Bottom-up tree construction with duplicate-self pairing.
//!
//! Adjacent nodes are paired level by level. When a level has an odd number
//! of nodes, the last one is paired with itself instead of being promoted
//! unchanged, so every level above the leaves has exactly `ceil(n / 2)`
//! nodes. A node's sibling sits at `index ^ 1`.
//!
//! Degenerate shapes: an empty tree's root is `SHA-256("")`, and a single
//! leaf is its own root with an empty proof.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    error::{MerkleError, Result},
    hash::MerkleHash,
};

/// Domain separation prefix for internal nodes.
const NODE_PREFIX: u8 = 0x01;

/// Hashes two child nodes into their parent: `SHA-256(0x01 || left || right)`.
pub fn combine(left: &MerkleHash, right: &MerkleHash) -> MerkleHash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    MerkleHash::from_bytes(hasher.finalize().to_vec())
}

/// Fully materialized tree over an ordered leaf list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    root: MerkleHash,
    levels: Vec<Vec<MerkleHash>>,
}

/// Builds the tree for `leaves` in the given order.
///
/// Leaf order is significant: proofs are positional, so callers must supply
/// leaves in a stable canonical order.
pub fn build_tree(leaves: &[MerkleHash]) -> MerkleTree {
    if leaves.is_empty() {
        return MerkleTree { root: MerkleHash::content_hash(&[]), levels: Vec::new() };
    }

    let mut levels = vec![leaves.to_vec()];
    while let Some(level) = levels.last().filter(|level| level.len() > 1) {
        let parents = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                combine(left, pair.get(1).unwrap_or(left))
            })
            .collect();
        levels.push(parents);
    }

    let root = levels
        .last()
        .and_then(|top| top.first())
        .cloned()
        .unwrap_or_else(|| MerkleHash::content_hash(&[]));

    MerkleTree { root, levels }
}

impl MerkleTree {
    /// Root hash.
    pub fn root(&self) -> &MerkleHash {
        &self.root
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Leaves in construction order.
    pub fn leaves(&self) -> &[MerkleHash] {
        self.levels.first().map(Vec::as_slice).unwrap_or_default()
    }

    /// Inclusion proof for the leaf at `index`.
    ///
    /// # Errors
    ///
    /// Returns `MerkleError::LeafIndexOutOfRange` if `index` is not a leaf.
    pub fn proof(&self, index: usize) -> Result<MerkleProof> {
        let leaf = self.leaves().get(index).cloned().ok_or(MerkleError::LeafIndexOutOfRange {
            index,
            leaf_count: self.leaf_count(),
        })?;

        let mut siblings = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut position = index;
        for level in self.levels.iter().take_while(|level| level.len() > 1) {
            let sibling = level.get(position ^ 1).unwrap_or(&level[position]);
            siblings.push(sibling.clone());
            position /= 2;
        }

        Ok(MerkleProof { leaf_index: index, leaf, siblings })
    }

    /// Proofs for every leaf, in leaf order.
    pub fn proofs(&self) -> Vec<MerkleProof> {
        (0..self.leaf_count()).filter_map(|index| self.proof(index).ok()).collect()
    }
}

/// Positional inclusion proof for one leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Leaf position in the batch.
    pub leaf_index: usize,

    /// Leaf hash being proven.
    pub leaf: MerkleHash,

    /// Sibling hashes from the leaf level upwards.
    pub siblings: Vec<MerkleHash>,
}

impl MerkleProof {
    /// Walks the proof from the leaf to the root.
    ///
    /// An even position means the running hash is the left child at that
    /// level.
    pub fn compute_root(&self) -> MerkleHash {
        let mut position = self.leaf_index;
        let mut current = self.leaf.clone();

        for sibling in &self.siblings {
            current = if position % 2 == 0 {
                combine(&current, sibling)
            } else {
                combine(sibling, &current)
            };
            position /= 2;
        }

        current
    }

    /// Whether the proof reconstructs `root`.
    pub fn verify(&self, root: &MerkleHash) -> bool {
        self.compute_root() == *root
    }

    /// Like [`verify`](Self::verify), reporting both roots on mismatch.
    ///
    /// # Errors
    ///
    /// Returns `MerkleError::ProofVerificationFailed` if the computed root
    /// differs from `root`.
    pub fn verify_strict(&self, root: &MerkleHash) -> Result<()> {
        let computed = self.compute_root();
        if computed == *root {
            return Ok(());
        }

        Err(MerkleError::ProofVerificationFailed {
            expected: root.to_hex(),
            computed: computed.to_hex(),
        })
    }
}
