//! Execution Engine Benchmarks
//!
//! Benchmarks for plan resolution, pass-through execution and policy primitives.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use safeguard::*;
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn factory(rt: &Runtime, operations: usize) -> ExecutionPlanFactory {
    let _guard = rt.enter();
    let descriptors = (0..operations).fold(StaticDescriptors::new(), |acc, i| {
        acc.with(
            format!("bench::op{i}()"),
            PolicyDescriptors::none()
                .with_retry(RetryDescriptor::new(2).jitter_ms(0))
                .with_circuit_breaker(CircuitBreakerDescriptor::default()),
        )
    });
    ExecutionPlanFactory::builder()
        .descriptors(descriptors)
        .build()
        .unwrap()
}

// =============================================================================
// Plan Resolution Benchmarks
// =============================================================================

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");
    let rt = runtime();

    let cached = factory(&rt, 1);
    let op = OperationId::new("bench::op0()");
    cached.resolve_plan(&op).unwrap();
    group.bench_function("cached_hit", |b| {
        b.iter(|| black_box(cached.resolve_plan(&op).unwrap()))
    });

    for operations in [16usize, 256] {
        group.bench_with_input(
            BenchmarkId::new("cold_resolve", operations),
            &operations,
            |b, &operations| {
                b.iter_batched(
                    || factory(&rt, operations),
                    |factory| {
                        for i in 0..operations {
                            let op = OperationId::new(format!("bench::op{i}()"));
                            black_box(factory.resolve_plan(&op).unwrap());
                        }
                    },
                    criterion::BatchSize::LargeInput,
                )
            },
        );
    }

    group.bench_function("operation_id_from_signature", |b| {
        b.iter(|| black_box(OperationId::from_signature("bench::op", &["u64", "String"])))
    });

    group.finish();
}

// =============================================================================
// Execution Benchmarks
// =============================================================================

fn bench_execution(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution");
    let rt = runtime();
    let factory = Arc::new(factory(&rt, 1));
    let call = call_fn(|_| async { Ok(json!(1)) });

    let passthrough = OperationId::new("bench::undeclared()");
    group.bench_function("pass_through", |b| {
        b.to_async(&rt).iter(|| {
            let factory = Arc::clone(&factory);
            let call = Arc::clone(&call);
            let op = passthrough.clone();
            async move { black_box(factory.execute(&op, Arguments::empty(), call).await) }
        })
    });

    let guarded = OperationId::new("bench::op0()");
    group.bench_function("sync_failsafe", |b| {
        b.to_async(&rt).iter(|| {
            let factory = Arc::clone(&factory);
            let call = Arc::clone(&call);
            let op = guarded.clone();
            async move { black_box(factory.execute(&op, Arguments::empty(), call).await) }
        })
    });

    group.finish();
}

// =============================================================================
// Policy Primitive Benchmarks
// =============================================================================

fn bench_primitives(c: &mut Criterion) {
    let mut group = c.benchmark_group("primitives");

    let breaker = CircuitBreaker::new(CircuitBreakerConfig::new("bench"));
    group.bench_function("breaker_acquire_success", |b| {
        b.iter(|| {
            if let Some(permit) = breaker.acquire() {
                permit.success();
            }
        })
    });

    let rt = runtime();
    let bulkhead = Bulkhead::new(BulkheadConfig::new("bench", 64));
    group.bench_function("bulkhead_admit_release", |b| {
        b.to_async(&rt).iter(|| {
            let bulkhead = Arc::clone(&bulkhead);
            async move {
                if let Some(admission) = bulkhead.try_admit() {
                    black_box(admission.permit().await);
                }
            }
        })
    });

    let retry = RetryPolicy::new(RetryConfig::new("bench", 3));
    group.bench_function("retry_next_delay", |b| b.iter(|| black_box(retry.next_delay())));

    group.finish();
}

criterion_group!(benches, bench_resolution, bench_execution, bench_primitives);
criterion_main!(benches);
