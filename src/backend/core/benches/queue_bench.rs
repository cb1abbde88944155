//! Benchmarks for the in-memory job queue and circuit breaker.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use herald_core::breaker::{BreakerConfig, CircuitBreaker};
use herald_core::clock::SystemClock;
use herald_core::jobs::{EnqueueOptions, InMemoryQueueBackend, JobPayload, JobQueue, RetryPolicy};
use herald_core::posts::PostId;

fn queue() -> JobQueue {
    JobQueue::new(
        Arc::new(InMemoryQueueBackend::new()),
        Arc::new(SystemClock),
        RetryPolicy::default(),
    )
}

fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_enqueue");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let payload = JobPayload::publish_content(PostId::new(), "benchmark post body");

    group.throughput(Throughput::Elements(1));
    group.bench_function("publish_content", |b| {
        let queue = queue();
        b.to_async(&rt).iter(|| async {
            black_box(queue.enqueue(&payload, EnqueueOptions::default()).await.unwrap());
        });
    });
    group.finish();
}

fn bench_claim_complete(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_claim_complete");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for depth in [100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(depth));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.to_async(&rt).iter(|| async move {
                let queue = queue();
                let payload = JobPayload::publish_content(PostId::new(), "drain");
                for _ in 0..depth {
                    queue.enqueue(&payload, EnqueueOptions::default()).await.unwrap();
                }
                while let Some(job) = queue.dequeue_next().await.unwrap() {
                    queue.mark_completed(job.id).await.unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_breaker_closed(c: &mut Criterion) {
    let mut group = c.benchmark_group("breaker_execute");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let breaker = CircuitBreaker::new(BreakerConfig::new("bench"));

    group.bench_function("closed_success", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(breaker.execute(|| async { Ok::<_, ()>(1u32) }).await.unwrap());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_claim_complete, bench_breaker_closed);
criterion_main!(benches);
