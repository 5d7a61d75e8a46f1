//! Property-based tests for Merkle construction invariants.

use proptest::{prelude::*, test_runner::Config as ProptestConfig};
use tessera_merkle::{build_tree, MerkleHash};

/// Creates property test configuration based on environment.
///
/// Uses environment variables:
/// - `PROPTEST_CASES`: Number of test cases (default: 20 for dev, 100 for CI)
/// - `CI`: If set to "true", uses CI configuration
fn proptest_config() -> ProptestConfig {
    let is_ci = std::env::var("CI").unwrap_or_default() == "true";
    let default_cases = if is_ci { 100 } else { 20 };

    let cases =
        std::env::var("PROPTEST_CASES").ok().and_then(|s| s.parse().ok()).unwrap_or(default_cases);

    ProptestConfig::with_cases(cases)
}

fn leaves() -> impl Strategy<Value = Vec<MerkleHash>> {
    prop::collection::vec(prop::array::uniform32(any::<u8>()), 0..70)
        .prop_map(|raw| raw.into_iter().map(MerkleHash::from_bytes).collect())
}

proptest! {
    #![proptest_config(proptest_config())]

    /// Identical ordered leaf lists always produce the identical root.
    #[test]
    fn root_is_deterministic(leaves in leaves()) {
        let first = build_tree(&leaves);
        let second = build_tree(&leaves.clone());

        prop_assert_eq!(first.root(), second.root());
        prop_assert_eq!(first.proofs(), second.proofs());
    }

    /// Every leaf's proof walks back to the reported root.
    #[test]
    fn every_proof_reconstructs_root(leaves in leaves()) {
        let tree = build_tree(&leaves);

        prop_assert_eq!(tree.proofs().len(), leaves.len());
        for (index, proof) in tree.proofs().into_iter().enumerate() {
            prop_assert_eq!(proof.leaf_index, index);
            prop_assert_eq!(&proof.leaf, &leaves[index]);
            prop_assert_eq!(&proof.compute_root(), tree.root());
        }
    }

    /// A proof is bound to its position: moving it to another index breaks it.
    #[test]
    fn proof_is_positional(leaves in leaves(), pick in any::<prop::sample::Index>()) {
        prop_assume!(leaves.len() >= 2);
        let tree = build_tree(&leaves);
        let index = pick.index(leaves.len());

        let mut moved = tree.proof(index).unwrap();
        moved.leaf_index ^= 1;
        prop_assume!(moved.leaf_index < leaves.len());
        prop_assume!(leaves[index] != leaves[moved.leaf_index]);

        prop_assert!(!moved.verify(tree.root()));
    }

    /// Hex parsing ignores case and a `0x` prefix.
    #[test]
    fn hex_parsing_normalizes(bytes in prop::collection::vec(any::<u8>(), 1..48)) {
        let lower = hex::encode(&bytes);
        let prefixed = format!("0x{}", lower.to_uppercase());

        let parsed = MerkleHash::parse_hex(&prefixed).unwrap();
        prop_assert_eq!(parsed.to_hex(), lower);
        prop_assert_eq!(parsed.as_bytes(), bytes.as_slice());
    }
}
