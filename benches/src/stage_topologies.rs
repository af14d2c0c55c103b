mod common;

use common::{checksum, simulated_work};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use pipeflow::prelude::*;
use tokio::runtime::Runtime;

const ITEMS: u64 = 2_000;

/// Benchmark a linear chain of synchronous stages at different stream capacities
///
/// Capacity 1 is fully lockstep; larger capacities let stages run ahead.
fn bench_linear_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("topology_linear_chain");
    let runtime = Runtime::new().unwrap();

    for capacity in [1, 16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            b.to_async(&runtime).iter(|| async move {
                let token = Token::new();
                let out = PipelineBuilder::new(&token)
                    .with_config(PipelineConfig::new().with_stream_capacity(capacity))
                    .generate(0..ITEMS)
                    .map(checksum)
                    .filter(|x| x % 3 != 0)
                    .batch(32)
                    .collect()
                    .await;
                black_box(out);
            });
        });
    }

    group.finish();
}

/// Benchmark unordered against ordered fan-out with the same worker counts
fn bench_fan_out_ordering(c: &mut Criterion) {
    let mut group = c.benchmark_group("topology_fan_out_ordering");
    let runtime = Runtime::new().unwrap();

    for workers in [1, 4, 8] {
        group.bench_with_input(BenchmarkId::new("unordered", workers), &workers, |b, &workers| {
            b.to_async(&runtime).iter(|| async move {
                let token = Token::new();
                let out = fan_out_fan_in(&token, generator(&token, 0..ITEMS), workers, simulated_work);
                black_box(collect(&token, out).await);
            });
        });

        group.bench_with_input(BenchmarkId::new("ordered", workers), &workers, |b, &workers| {
            b.to_async(&runtime).iter(|| async move {
                let token = Token::new();
                let out = ordered_fan_out_fan_in(&token, generator(&token, 0..ITEMS), workers, simulated_work);
                black_box(collect(&token, out).await);
            });
        });
    }

    group.finish();
}

/// Benchmark the reorder window size of an ordered fan-out
fn bench_reorder_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("topology_reorder_window");
    let runtime = Runtime::new().unwrap();

    for window in [4, 64, DEFAULT_REORDER_WINDOW] {
        group.bench_with_input(BenchmarkId::from_parameter(window), &window, |b, &window| {
            b.to_async(&runtime).iter(|| async move {
                let token = Token::new();
                let out = ordered_fan_out_fan_in_windowed(
                    &token,
                    generator(&token, 0..ITEMS),
                    8,
                    window,
                    simulated_work,
                );
                black_box(collect(&token, out).await);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_linear_chain, bench_fan_out_ordering, bench_reorder_window);
criterion_main!(benches);
