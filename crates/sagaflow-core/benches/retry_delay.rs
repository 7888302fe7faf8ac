//! Benchmarks the retry policy's delay computation, the hot path the
//! engine calls between every retried activity attempt.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sagaflow_core::RetryPolicy;

fn bench_delay_for_attempt(c: &mut Criterion) {
    let policy = RetryPolicy::exponential()
        .with_max_attempts(10)
        .with_jitter(0.1);

    c.bench_function("delay_for_attempt", |b| {
        b.iter(|| {
            for attempt in 1..=black_box(10u32) {
                black_box(policy.delay_for_attempt(attempt));
            }
        })
    });
}

fn bench_no_jitter(c: &mut Criterion) {
    let policy = RetryPolicy::exponential().with_max_interval(Duration::from_secs(30));

    c.bench_function("delay_for_attempt_no_jitter", |b| {
        b.iter(|| black_box(policy.delay_for_attempt(black_box(5))))
    });
}

criterion_group!(benches, bench_delay_for_attempt, bench_no_jitter);
criterion_main!(benches);
