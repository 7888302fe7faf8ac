//! Benchmarks the in-memory store's claim hot path: the poller's
//! read-modify-write cycle under the CAS contract.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sagaflow_scheduler::store::{InMemoryJobStore, Job, JobStore};

fn bench_claim_job(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryJobStore::new();
    let jobs: Vec<_> = rt.block_on(async {
        let mut ids = Vec::new();
        for _ in 0..1000 {
            let job = store.save_job(Job::new("bench", serde_json::json!({}))).await.unwrap();
            ids.push(job.id);
        }
        ids
    });

    let mut index = 0usize;
    c.bench_function("claim_job", |b| {
        b.iter(|| {
            let id = jobs[index % jobs.len()];
            index += 1;
            rt.block_on(async { black_box(store.claim_job(id).await.ok()) })
        })
    });
}

criterion_group!(benches, bench_claim_job);
criterion_main!(benches);
