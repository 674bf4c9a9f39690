use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::time::Duration;

use reportforge_core::TenantId;
use reportforge_jobs::{BackoffPolicy, InMemoryJobQueue, Job, JobKind, JobQueue};

fn bench_enqueue_claim_ack(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_cycle");

    for &batch in &[10usize, 100, 1000] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(
            BenchmarkId::new("enqueue_claim_ack", batch),
            &batch,
            |b, &batch| {
                b.iter(|| {
                    let queue = InMemoryJobQueue::new();
                    let tenant = TenantId::new();
                    for _ in 0..batch {
                        queue
                            .enqueue(Job::new(tenant, JobKind::Export, serde_json::json!({})))
                            .unwrap();
                    }
                    let lease = Duration::from_secs(60);
                    while let Some(job) = queue.claim_next("bench", lease, None).unwrap() {
                        queue.ack(job.id, "bench").unwrap();
                    }
                    black_box(queue.stats(None).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_backoff_math(c: &mut Criterion) {
    let policy = BackoffPolicy::exponential(
        10,
        Duration::from_millis(500),
        Duration::from_secs(60),
    );

    c.bench_function("backoff_delay_curve", |b| {
        b.iter(|| {
            for attempt in 2..=10u32 {
                black_box(policy.delay_before_attempt(black_box(attempt)));
            }
        });
    });
}

criterion_group!(benches, bench_enqueue_claim_ack, bench_backoff_math);
criterion_main!(benches);
