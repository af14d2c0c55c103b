mod common;

use common::simulated_work;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use pipeflow::prelude::*;
use tokio::runtime::Runtime;

const JOBS: u64 = 2_000;

/// Benchmark submitting a fixed batch of jobs to pools of varying size
fn bench_pool_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_pool_scaling");
    let runtime = Runtime::new().unwrap();

    for workers in [1, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            b.to_async(&runtime).iter(|| async move {
                let token = Token::new();
                let mut pool = WorkPool::<u64, u64>::new(workers, 64);
                let results = pool.start(&token, simulated_work).unwrap();

                let reader = {
                    let token = token.clone();
                    tokio::spawn(async move { collect(&token, results).await })
                };

                for job in 0..JOBS {
                    pool.submit(job).await.unwrap();
                }
                pool.close();

                black_box(reader.await.unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pool_scaling);
criterion_main!(benches);
