//! Integration and property tests for status list allocation and publication.

use std::{collections::BTreeSet, sync::Arc};

use proptest::{prelude::*, test_runner::Config as ProptestConfig};
use tessera_core::{CredentialId, ListId, MemorySnapshotStore, RealClock, SnapshotStore};
use tessera_status::{bitstring, RevocationStatusList, StatusListConfig, StatusListError};

fn status_list(store: Arc<MemorySnapshotStore>, capacity: usize) -> RevocationStatusList {
    RevocationStatusList::new(
        store as Arc<dyn SnapshotStore>,
        StatusListConfig { default_capacity: capacity },
        Arc::new(RealClock::new()),
    )
}

fn credential(n: usize) -> CredentialId {
    CredentialId::new(format!("urn:uuid:cred-{n}"))
}

#[tokio::test]
async fn indices_are_monotonic_per_list() {
    let list = status_list(Arc::new(MemorySnapshotStore::new()), 64);
    let tenant_a = ListId::from("tenant-a");
    let tenant_b = ListId::from("tenant-b");

    let mut a_indices = Vec::new();
    let mut b_indices = Vec::new();
    for n in 0..6 {
        a_indices.push(list.register_credential(&credential(n), &tenant_a).await.unwrap().index);
        b_indices
            .push(list.register_credential(&credential(100 + n), &tenant_b).await.unwrap().index);
    }

    assert_eq!(a_indices, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(b_indices, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn full_list_rejects_without_consuming_an_index() {
    let store = Arc::new(MemorySnapshotStore::new());
    let list = status_list(store.clone(), 64);
    let small = ListId::from("small");
    list.provision_list(&small, 3).await.unwrap();

    for n in 0..3 {
        list.register_credential(&credential(n), &small).await.unwrap();
    }

    let err = list.register_credential(&credential(3), &small).await.unwrap_err();
    assert!(matches!(err, StatusListError::Capacity { capacity: 3, .. }));
    assert!(err.is_client_error());
    assert_eq!(list.entry(&credential(3)).await.unwrap(), None);

    let other = ListId::from("overflow");
    let moved = list.register_credential(&credential(3), &other).await.unwrap();
    assert_eq!(moved.index, 0);

    let restarted = status_list(store, 64);
    let err = restarted.register_credential(&credential(4), &small).await.unwrap_err();
    assert!(matches!(err, StatusListError::Capacity { .. }));
}

#[tokio::test]
async fn materialized_bits_match_revoked_indices() {
    let list = status_list(Arc::new(MemorySnapshotStore::new()), 20);
    let list_id = ListId::default();
    for n in 0..12 {
        list.register_default(&credential(n)).await.unwrap();
    }
    list.revoke(&credential(0)).await.unwrap();
    list.revoke(&credential(9)).await.unwrap();

    let publication = list.materialize_list(&list_id).await.unwrap();
    let bytes = bitstring::decode(&publication.bitstring).unwrap();

    assert_eq!(publication.size, 20);
    assert_eq!(bytes.len(), 3);
    assert_eq!(publication.revoked_count, 2);
    assert_eq!(bytes, vec![0b0000_0001, 0b0000_0010, 0]);
    assert!(bitstring::bit_is_set(&bytes, 9));
    assert!(!bitstring::bit_is_set(&bytes, 10));
    assert_eq!(publication.digest, bitstring::digest(&bytes));

    let json = serde_json::to_value(&publication).unwrap();
    assert_eq!(json["revokedCount"], 2);
    assert_eq!(json["id"], "default");
}

#[tokio::test]
async fn revocation_survives_restart() {
    let store = Arc::new(MemorySnapshotStore::new());
    let list = status_list(store.clone(), 16);
    list.register_default(&credential(1)).await.unwrap();
    list.revoke(&credential(1)).await.unwrap();

    let restarted = status_list(store, 16);
    restarted.hydrate().await.unwrap();

    assert!(restarted.is_revoked(&credential(1)).await.unwrap());
    assert_eq!(restarted.materialize_list(&ListId::default()).await.unwrap().revoked_count, 1);
}

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

const PROPERTY_CAPACITY: usize = 40;

/// Registers `PROPERTY_CAPACITY` credentials, revokes `revoked`, and returns
/// the published digest.
fn digest_after_revoking(revoked: &BTreeSet<usize>) -> String {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    runtime.block_on(async {
        let list = status_list(Arc::new(MemorySnapshotStore::new()), PROPERTY_CAPACITY);
        for n in 0..PROPERTY_CAPACITY {
            list.register_default(&credential(n)).await.unwrap();
        }
        for n in revoked {
            list.revoke(&credential(*n)).await.unwrap();
        }
        list.materialize_list(&ListId::default()).await.unwrap().digest
    })
}

proptest! {
    #![proptest_config(proptest_config())]

    /// The digest changes exactly when the revoked index set changes.
    #[test]
    fn digest_tracks_revoked_set(
        first in prop::collection::btree_set(0..PROPERTY_CAPACITY, 0..12),
        second in prop::collection::btree_set(0..PROPERTY_CAPACITY, 0..12),
    ) {
        let first_digest = digest_after_revoking(&first);
        let second_digest = digest_after_revoking(&second);

        prop_assert_eq!(first == second, first_digest == second_digest);
    }

    /// Indices are handed out densely from zero until the list is full.
    #[test]
    fn registration_is_dense_until_capacity(capacity in 1usize..24, attempts in 0usize..32) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (assigned, rejected) = runtime.block_on(async {
            let list = status_list(Arc::new(MemorySnapshotStore::new()), capacity);
            let mut assigned = Vec::new();
            let mut rejected = 0;
            for n in 0..attempts {
                match list.register_default(&credential(n)).await {
                    Ok(entry) => assigned.push(entry.index),
                    Err(StatusListError::Capacity { .. }) => rejected += 1,
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            (assigned, rejected)
        });

        prop_assert_eq!(assigned, (0..attempts.min(capacity)).collect::<Vec<_>>());
        prop_assert_eq!(rejected, attempts.saturating_sub(capacity));
    }
}
