//! End-to-end issuance tests over in-memory storage and a scripted relayer.

use std::{sync::Arc, time::Duration};

use serde_json::json;
use tessera::{
    BulkIssuanceProcessor, Config, Engine, IssuanceError, IssuancePipeline, IssuanceRequest,
};
use tessera_anchor::{
    relayer::mock::MockRelayer, AnchorBatchManager, AnchorConfig, AnchorError, BatchStatus,
};
use tessera_core::{
    CredentialId, ListId, MemorySnapshotStore, NoOpEventHandler, RealClock, SnapshotStore,
    TestClock,
};
use tessera_queue::{JobStatus, QueueConfig, ReliableJobQueue};
use tessera_status::{bitstring, RevocationStatusList, StatusListConfig, StatusListError};

struct Harness {
    pipeline: Arc<IssuancePipeline>,
    anchor: Arc<AnchorBatchManager>,
    status: Arc<RevocationStatusList>,
    relayer: Arc<MockRelayer>,
    store: Arc<MemorySnapshotStore>,
    clock: TestClock,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemorySnapshotStore::new());
        let relayer = Arc::new(MockRelayer::new());
        let clock = TestClock::new();

        let anchor = Arc::new(AnchorBatchManager::new(
            store.clone(),
            relayer.clone(),
            AnchorConfig::default(),
            Arc::new(clock.clone()),
        ));
        let status = Arc::new(RevocationStatusList::new(
            store.clone(),
            StatusListConfig::default(),
            Arc::new(clock.clone()),
        ));
        let pipeline = Arc::new(IssuancePipeline::new(anchor.clone(), status.clone()));

        Self { pipeline, anchor, status, relayer, store, clock }
    }

    fn bulk_queue(&self) -> ReliableJobQueue<IssuanceRequest> {
        let store: Arc<dyn SnapshotStore> = self.store.clone();
        ReliableJobQueue::<IssuanceRequest>::new(
            store,
            Arc::new(BulkIssuanceProcessor::new(self.pipeline.clone())),
            QueueConfig::default(),
            Arc::new(self.clock.clone()),
        )
    }
}

fn diploma(name: &str) -> serde_json::Value {
    json!({
        "type": ["VerifiableCredential", "UniversityDegreeCredential"],
        "credentialSubject": {"name": name, "degree": "BSc"},
    })
}

#[tokio::test]
async fn issue_registers_and_anchors_credential() {
    let harness = Harness::new();

    let receipt =
        harness.pipeline.issue(&IssuanceRequest::new("cred-ada", diploma("Ada"))).await.unwrap();

    assert_eq!(receipt.status.index, 0);
    assert_eq!(receipt.status.list_id, ListId::default());
    assert_eq!(receipt.batch_status, BatchStatus::Submitted);
    assert!(receipt.tx_hash.is_some());
    // A single-leaf batch is rooted at the leaf itself.
    assert_eq!(receipt.merkle_root, receipt.content_hash);

    let proof = harness.anchor.get_proof(&CredentialId::new("cred-ada")).await.unwrap();
    assert_eq!(proof.batch_id, receipt.batch_id);
    assert!(proof.verify());
    assert_eq!(harness.relayer.call_count(), 1);
}

#[tokio::test]
async fn reissuing_same_credential_is_idempotent() {
    let harness = Harness::new();
    let request = IssuanceRequest::new("cred-ada", diploma("Ada"));

    let first = harness.pipeline.issue(&request).await.unwrap();
    let second = harness.pipeline.issue(&request).await.unwrap();

    assert_eq!(first.batch_id, second.batch_id);
    assert_eq!(first.status.index, second.status.index);
    assert_eq!(harness.relayer.call_count(), 1);
}

#[tokio::test]
async fn changed_body_for_anchored_credential_conflicts() {
    let harness = Harness::new();
    let first =
        harness.pipeline.issue(&IssuanceRequest::new("cred-ada", diploma("Ada"))).await.unwrap();

    let err = harness
        .pipeline
        .issue(&IssuanceRequest::new("cred-ada", diploma("Ada Lovelace")))
        .await
        .unwrap_err();

    match err {
        IssuanceError::Anchor(AnchorError::Conflict { credential_id, batch_id }) => {
            assert_eq!(credential_id, CredentialId::new("cred-ada"));
            assert_eq!(batch_id, first.batch_id);
        },
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn identical_bodies_under_distinct_ids_anchor_separately() {
    let harness = Harness::new();
    let body = diploma("Ada");

    let first =
        harness.pipeline.issue(&IssuanceRequest::new("cred-a", body.clone())).await.unwrap();
    let second = harness.pipeline.issue(&IssuanceRequest::new("cred-b", body)).await.unwrap();

    assert_ne!(first.batch_id, second.batch_id);
    assert_ne!(first.content_hash, second.content_hash);
    assert_eq!(harness.relayer.call_count(), 2);

    for (id, receipt) in [("cred-a", &first), ("cred-b", &second)] {
        let proof = harness.anchor.get_proof(&CredentialId::new(id)).await.unwrap();
        assert_eq!(proof.batch_id, receipt.batch_id);
        assert_eq!(proof.merkle_root.to_hex(), receipt.merkle_root);
        assert!(proof.verify());
    }
}

#[tokio::test]
async fn identical_bodies_share_a_batch_with_distinct_leaves() {
    let harness = Harness::new();
    let requests = vec![
        IssuanceRequest::new("cred-a", diploma("Ada")),
        IssuanceRequest::new("cred-b", diploma("Ada")),
    ];

    let receipts = harness.pipeline.issue_batch(&requests).await.unwrap();

    assert_eq!(receipts[0].batch_id, receipts[1].batch_id);
    assert_ne!(receipts[0].content_hash, receipts[1].content_hash);
    for request in &requests {
        let proof = harness.anchor.get_proof(&request.credential_id).await.unwrap();
        assert!(proof.verify());
    }
}

#[tokio::test]
async fn issue_batch_shares_one_root_and_one_relayer_call() {
    let harness = Harness::new();
    let requests: Vec<_> = ["ada", "grace", "edsger"]
        .iter()
        .map(|name| IssuanceRequest::new(format!("cred-{name}"), diploma(name)))
        .collect();

    let receipts = harness.pipeline.issue_batch(&requests).await.unwrap();

    assert_eq!(receipts.len(), 3);
    assert!(receipts.iter().all(|r| r.batch_id == receipts[0].batch_id));
    assert_eq!(
        receipts.iter().map(|r| r.status.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(harness.relayer.call_count(), 1);

    for request in &requests {
        let proof = harness.anchor.get_proof(&request.credential_id).await.unwrap();
        assert!(proof.verify());
        assert_eq!(proof.merkle_root.to_hex(), receipts[0].merkle_root);
    }
}

#[tokio::test]
async fn empty_batch_is_rejected() {
    let harness = Harness::new();

    let err = harness.pipeline.issue_batch(&[]).await.unwrap_err();

    assert!(matches!(err, IssuanceError::Validation { .. }));
    assert_eq!(harness.relayer.call_count(), 0);
}

#[tokio::test]
async fn relayer_failure_is_reported_not_raised() {
    let harness = Harness::new();
    harness.relayer.fail_times(1).await;

    let receipt =
        harness.pipeline.issue(&IssuanceRequest::new("cred-ada", diploma("Ada"))).await.unwrap();

    assert_eq!(receipt.batch_status, BatchStatus::Failed);
    assert_eq!(receipt.tx_hash, None);

    let dead_letters = harness.anchor.list_dead_letters(10).await.unwrap();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].batch_id, receipt.batch_id);

    let replayed = harness.anchor.replay(receipt.batch_id).await.unwrap();
    assert_eq!(replayed.status, BatchStatus::Submitted);
}

#[tokio::test]
async fn exhausted_list_surfaces_capacity_error() {
    let harness = Harness::new();
    harness.status.provision_list(&ListId::new("pilot"), 1).await.unwrap();

    harness
        .pipeline
        .issue(&IssuanceRequest::new("cred-ada", diploma("Ada")).with_list("pilot"))
        .await
        .unwrap();
    let err = harness
        .pipeline
        .issue(&IssuanceRequest::new("cred-grace", diploma("Grace")).with_list("pilot"))
        .await
        .unwrap_err();

    assert!(matches!(err, IssuanceError::Status(StatusListError::Capacity { capacity: 1, .. })));
    assert!(err.is_client_error());
    // Nothing was anchored for the rejected credential.
    assert_eq!(harness.relayer.call_count(), 1);
}

#[tokio::test]
async fn revocation_is_visible_in_published_list() {
    let harness = Harness::new();
    for name in ["ada", "grace", "edsger"] {
        harness
            .pipeline
            .issue(&IssuanceRequest::new(format!("cred-{name}"), diploma(name)))
            .await
            .unwrap();
    }

    let revoked = harness.pipeline.revoke(&CredentialId::new("cred-grace")).await.unwrap();
    assert!(revoked.is_some_and(|entry| entry.revoked));

    let publication = harness.status.materialize_list(&ListId::default()).await.unwrap();
    let bytes = bitstring::decode(&publication.bitstring).unwrap();

    assert_eq!(publication.revoked_count, 1);
    assert!(!bitstring::bit_is_set(&bytes, 0));
    assert!(bitstring::bit_is_set(&bytes, 1));
    assert!(!bitstring::bit_is_set(&bytes, 2));
}

#[tokio::test]
async fn bulk_job_isolates_failing_items() {
    let harness = Harness::new();
    harness.pipeline.issue(&IssuanceRequest::new("cred-ada", diploma("Ada"))).await.unwrap();
    let queue = harness.bulk_queue();

    let job_id = queue
        .enqueue(vec![
            IssuanceRequest::new("cred-grace", diploma("Grace")),
            // Conflicts with the credential issued above.
            IssuanceRequest::new("cred-ada", diploma("Someone else")),
            IssuanceRequest::new("cred-edsger", diploma("Edsger")),
        ])
        .await
        .unwrap();

    let result = queue.process_next().await.unwrap().expect("job should be due");

    assert_eq!(result.job_id, job_id);
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!((result.success, result.failed), (2, 1));
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].index, 1);
    assert!(result.errors[0].message.contains("cred-ada"));

    assert!(harness.status.entry(&CredentialId::new("cred-edsger")).await.unwrap().is_some());
}

#[tokio::test]
async fn engine_drains_bulk_jobs_and_confirms_anchors() {
    let store = Arc::new(MemorySnapshotStore::new());
    let relayer = Arc::new(MockRelayer::new());
    let config = Config {
        worker_pool_size: 2,
        finality_delay_seconds: 0,
        confirmation_poll_interval_ms: 10,
        job_poll_interval_ms: 10,
        shutdown_timeout_seconds: 5,
        ..Config::default()
    };

    let mut engine =
        Engine::new(store, relayer.clone(), config, Arc::new(RealClock::new()), Arc::new(NoOpEventHandler));
    engine.start().await.unwrap();

    let job_id = engine
        .bulk_queue()
        .enqueue(vec![
            IssuanceRequest::new("cred-1", diploma("One")),
            IssuanceRequest::new("cred-2", diploma("Two")),
        ])
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = engine.bulk_queue().get_job(job_id).await.unwrap();
        let confirmed = engine.anchor().batches_with_status(BatchStatus::Confirmed).await.unwrap();
        if job.status == JobStatus::Completed && confirmed.len() == 2 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "engine did not settle: {job:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(relayer.call_count(), 2);
    engine.shutdown().await.unwrap();
}
