use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pipeflow::prelude::*;

/// Deterministic per-item latency so workers finish out of order
fn jitter(x: u64) -> Duration {
    Duration::from_millis((x * 7919) % 13)
}

#[tokio::test]
async fn scenario_map_filter_take() {
    let token = Token::new();
    let source = generator(&token, vec![1, 2, 3, 4, 5]);
    let squared = map(&token, source, |x: i32| x * x);
    let large = filter(&token, squared, |x: &i32| *x > 10);
    let first = take(&token, large, 1);

    assert_eq!(collect(&token, first).await, vec![16]);
}

#[tokio::test]
async fn scenario_batch_keeps_remainder() {
    let token = Token::new();
    let batches = batch(&token, generator(&token, 1..=7), 3);

    assert_eq!(
        collect(&token, batches).await,
        vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_ordered_fan_out_with_jitter() {
    let token = Token::new();
    let out = ordered_fan_out_fan_in(&token, generator(&token, 1..=5u64), 3, |x| async move {
        tokio::time::sleep(jitter(x)).await;
        x * x
    });

    assert_eq!(collect(&token, out).await, vec![1, 4, 9, 16, 25]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn builder_matches_free_functions() {
    let token = Token::new();
    let out = Pipeline::generate(&token, 0..100u64)
        .ordered_fan_out_fan_in(4, |x| async move {
            tokio::time::sleep(jitter(x)).await;
            x + 1
        })
        .filter(|x| x % 3 == 0)
        .batch(5)
        .take(2)
        .try_collect()
        .await
        .unwrap();

    assert_eq!(out, vec![vec![3, 6, 9, 12, 15], vec![18, 21, 24, 27, 30]]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_terminates_every_stage() {
    let token = Token::new();
    let mapped = Arc::new(AtomicUsize::new(0));
    let worked = Arc::new(AtomicUsize::new(0));

    let (writer, source) = channel(1);
    let producer = {
        let token = token.clone();
        tokio::spawn(async move {
            let mut next = 0u64;
            let halt = loop {
                match writer.send(&token, next).await {
                    Ok(()) => next += 1,
                    Err(halt) => break halt,
                }
            };
            writer.finish(Err(halt.clone()));
            halt
        })
    };

    let counter = Arc::clone(&mapped);
    let doubled = map(&token, source, move |x| {
        counter.fetch_add(1, Ordering::SeqCst);
        x * 2
    });
    let (left, right) = tee(&token, doubled);
    let counter = Arc::clone(&worked);
    let slow = fan_out_fan_in(&token, left, 3, move |x| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1)).await;
            x
        }
    });

    let left_reader = {
        let token = token.clone();
        tokio::spawn(async move { sink(&token, slow, |_| {}).await })
    };
    let right_reader = {
        let token = token.clone();
        tokio::spawn(async move { sink(&token, right, |_| {}).await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    token.cancel();

    let left_reason = tokio::time::timeout(Duration::from_secs(2), left_reader)
        .await
        .expect("left branch did not stop after cancellation")
        .unwrap();
    let right_reason = tokio::time::timeout(Duration::from_secs(2), right_reader)
        .await
        .expect("right branch did not stop after cancellation")
        .unwrap();
    let producer_halt = tokio::time::timeout(Duration::from_secs(2), producer)
        .await
        .expect("producer did not stop after cancellation")
        .unwrap();

    assert_eq!(left_reason, CloseReason::Cancelled);
    assert_eq!(right_reason, CloseReason::Cancelled);
    assert!(matches!(producer_halt, Halt::Cancelled | Halt::Detached));
    assert!(worked.load(Ordering::SeqCst) > 0);

    // No callback anywhere in the chain runs once the grace period is over
    tokio::time::sleep(Duration::from_millis(20)).await;
    let (mapped_at, worked_at) = (mapped.load(Ordering::SeqCst), worked.load(Ordering::SeqCst));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mapped.load(Ordering::SeqCst), mapped_at);
    assert_eq!(worked.load(Ordering::SeqCst), worked_at);
}

#[tokio::test]
async fn deadline_token_stops_endless_source() {
    let token = Token::with_timeout(Duration::from_millis(25));
    let result = Pipeline::generate(&token, 0u64..)
        .map(|x| x.wrapping_mul(3))
        .try_collect()
        .await;

    assert_eq!(result, Err(PipelineError::Cancelled));
}

/// Sample `calls` until two readings 50ms apart agree
async fn settled(calls: &AtomicUsize) -> usize {
    let mut last = calls.load(Ordering::SeqCst);
    loop {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let now = calls.load(Ordering::SeqCst);
        if now == last {
            return now;
        }
        last = now;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn take_releases_endless_upstream_without_cancelling() {
    let token = Token::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let out = Pipeline::generate(&token, 0u64..)
        .map(move |x| {
            counter.fetch_add(1, Ordering::SeqCst);
            x + 1
        })
        .take(3)
        .collect()
        .await;

    assert_eq!(out, vec![1, 2, 3]);
    let stopped_at = tokio::time::timeout(Duration::from_secs(2), settled(&calls))
        .await
        .expect("upstream kept running after take finished");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), stopped_at);
    assert!(!token.is_cancelled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn take_releases_upstream_behind_a_rejecting_filter() {
    let token = Token::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let out = Pipeline::generate(&token, 0u64..)
        .filter(move |x| {
            counter.fetch_add(1, Ordering::SeqCst);
            *x < 3
        })
        .take(3)
        .collect()
        .await;

    assert_eq!(out, vec![0, 1, 2]);
    let stopped_at = tokio::time::timeout(Duration::from_secs(2), settled(&calls))
        .await
        .expect("filter kept pulling from the generator after take finished");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), stopped_at);
    assert!(!token.is_cancelled());
}

#[tokio::test]
async fn item_errors_are_routed_apart_from_values() {
    let token = Token::new();
    let parsed = map_with_error(&token, generator(&token, vec!["1", "x", "3", "y"]), |s: &str| {
        s.parse::<u32>()
    });
    let (values, errors) = collect_errors(&token, parsed);

    let (values, errors) = tokio::join!(collect(&token, values), collect(&token, errors));
    assert_eq!(values, vec![1, 3]);
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| !e.is_panic()));
}

#[tokio::test]
async fn stage_panic_is_reported_as_failure() {
    let token = Token::new();
    let result = Pipeline::generate(&token, vec![2, 1, 0])
        .map(|x: u32| 6 / x)
        .try_collect()
        .await;

    match result {
        Err(PipelineError::StageFailed(failure)) => assert_eq!(failure.stage, "map"),
        other => panic!("Expected stage failure, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn work_pool_processes_submitted_jobs() {
    let token = Token::new();
    let mut pool = WorkPool::<u64, u64>::new(3, 4);
    let results = pool
        .start(&token, |job: u64| async move {
            tokio::time::sleep(jitter(job)).await;
            job * job
        })
        .unwrap();

    let reader = {
        let token = token.clone();
        tokio::spawn(async move { collect(&token, results).await })
    };

    for job in 1..=20u64 {
        pool.submit(job).await.unwrap();
    }
    pool.close();
    pool.wait().await.unwrap();

    let mut out = reader.await.unwrap();
    out.sort();
    assert_eq!(out, (1..=20u64).map(|x| x * x).collect::<Vec<_>>());
    assert_eq!(pool.state(), PoolState::Drained);
    assert_eq!(pool.stats().iter().map(|s| s.processed).sum::<u64>(), 20);
}

#[tokio::test]
async fn fan_in_merges_independent_sources() {
    let token = Token::new();
    let merged = fan_in(
        &token,
        vec![
            generator(&token, vec![1, 2]),
            generator(&token, vec![10, 20]),
            generator(&token, Vec::new()),
        ],
    );

    let mut out = collect(&token, merged).await;
    out.sort();
    assert_eq!(out, vec![1, 2, 10, 20]);
}
