//! Benchmarks for batch construction and issuance.
//!
//! Tree construction dominates batch creation cost, and the issuance path
//! adds one snapshot write per mutation on top of it.

use std::{hint::black_box, sync::Arc, time::Duration};

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use tessera::{IssuancePipeline, IssuanceRequest};
use tessera_anchor::{relayer::mock::MockRelayer, AnchorBatchManager, AnchorConfig};
use tessera_core::{MemorySnapshotStore, RealClock};
use tessera_merkle::{build_tree, MerkleHash};
use tessera_status::{RevocationStatusList, StatusListConfig};
use tokio::runtime::Runtime;

fn leaves(count: usize) -> Vec<MerkleHash> {
    (0..count).map(|n| MerkleHash::content_hash(format!("credential-{n}").as_bytes())).collect()
}

/// Benchmarks root and proof construction across batch sizes.
fn bench_build_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle_build");

    for size in [1, 16, 256, 4096] {
        let input = leaves(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("leaves", size), &input, |b, input| {
            b.iter(|| black_box(build_tree(black_box(input))));
        });
    }

    group.finish();
}

/// Benchmarks proof verification for a leaf in a large batch.
fn bench_verify_proof(c: &mut Criterion) {
    let tree = build_tree(&leaves(4096));
    let proof = tree.proof(1234).unwrap();
    let root = tree.root().clone();

    c.bench_function("merkle_verify_4096", |b| {
        b.iter(|| black_box(proof.verify(black_box(&root))));
    });
}

/// Benchmarks the full issue path against in-memory storage.
fn bench_issue_batch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("issuance");
    group.measurement_time(Duration::from_secs(10));

    for size in [1, 64] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("issue_batch", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let store = Arc::new(MemorySnapshotStore::new());
                    let clock = Arc::new(RealClock::new());
                    let anchor = Arc::new(AnchorBatchManager::new(
                        store.clone(),
                        Arc::new(MockRelayer::new()),
                        AnchorConfig::default(),
                        clock.clone(),
                    ));
                    let status = Arc::new(RevocationStatusList::new(
                        store,
                        StatusListConfig::default(),
                        clock,
                    ));
                    let requests: Vec<_> = (0..size)
                        .map(|n| {
                            IssuanceRequest::new(format!("cred-{n}"), json!({"subject": n}))
                        })
                        .collect();
                    (IssuancePipeline::new(anchor, status), requests)
                },
                |(pipeline, requests)| {
                    rt.block_on(async { black_box(pipeline.issue_batch(&requests).await.unwrap()) })
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build_tree, bench_verify_proof, bench_issue_batch);
criterion_main!(benches);
