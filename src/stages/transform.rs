use std::panic::{self, AssertUnwindSafe};

use super::error::{BoxError, ItemError};
use super::{DEFAULT_CAPACITY, both_detached, finish_stage, guarded, still_live};
use crate::core::error::panic_message;
use crate::core::stream::named_channel;
use crate::core::{Halt, Stream, StreamWriter, Token};

/// Apply `f` to every value, preserving order
///
/// A panic in `f` is fatal to this stage: it stops reading and closes its
/// output with a `Failed` reason. Use [`map_with_error`] for recoverable
/// per-item failures.
pub fn map<T, U, F>(token: &Token, input: Stream<T>, f: F) -> Stream<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> U + Send + 'static,
{
    spawn_map(token, input, DEFAULT_CAPACITY, f)
}

pub(crate) fn spawn_map<T, U, F>(token: &Token, input: Stream<T>, capacity: usize, mut f: F) -> Stream<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> U + Send + 'static,
{
    let (out, stream) = named_channel("map", capacity);
    let token = token.clone();

    tokio::spawn(async move {
        let outcome = run_map(input, &out, &token, &mut f).await;
        finish_stage("map", out, outcome);
    });

    stream
}

async fn run_map<T, U>(
    mut input: Stream<T>,
    out: &StreamWriter<U>,
    token: &Token,
    f: &mut impl FnMut(T) -> U,
) -> Result<(), Halt> {
    loop {
        let value = input.recv_for(token, out.detached()).await?;
        let mapped = guarded("map", f, value)?;
        out.send(token, mapped).await?;
    }
}

/// Keep only values for which `predicate` holds, in their original relative order
pub fn filter<T, P>(token: &Token, input: Stream<T>, predicate: P) -> Stream<T>
where
    T: Send + 'static,
    P: FnMut(&T) -> bool + Send + 'static,
{
    spawn_filter(token, input, DEFAULT_CAPACITY, predicate)
}

pub(crate) fn spawn_filter<T, P>(token: &Token, input: Stream<T>, capacity: usize, mut predicate: P) -> Stream<T>
where
    T: Send + 'static,
    P: FnMut(&T) -> bool + Send + 'static,
{
    let (out, stream) = named_channel("filter", capacity);
    let token = token.clone();

    tokio::spawn(async move {
        let outcome = run_filter(input, &out, &token, &mut predicate).await;
        finish_stage("filter", out, outcome);
    });

    stream
}

async fn run_filter<T>(
    mut input: Stream<T>,
    out: &StreamWriter<T>,
    token: &Token,
    predicate: &mut impl FnMut(&T) -> bool,
) -> Result<(), Halt> {
    let mut check = |value: T| (predicate(&value), value);
    loop {
        let value = input.recv_for(token, out.detached()).await?;
        let (keep, value) = guarded("filter", &mut check, value)?;
        if keep {
            out.send(token, value).await?;
        }
    }
}

/// Apply a fallible `f` to every value, producing one `Result` per input
///
/// This stage never fails as a whole: errors returned by `f` become
/// `ItemError::Failed` and panics become `ItemError::Panicked`.
pub fn map_with_error<T, U, E, F>(token: &Token, input: Stream<T>, f: F) -> Stream<Result<U, ItemError>>
where
    T: Send + 'static,
    U: Send + 'static,
    E: Into<BoxError>,
    F: FnMut(T) -> Result<U, E> + Send + 'static,
{
    spawn_map_with_error(token, input, DEFAULT_CAPACITY, f)
}

pub(crate) fn spawn_map_with_error<T, U, E, F>(
    token: &Token,
    input: Stream<T>,
    capacity: usize,
    mut f: F,
) -> Stream<Result<U, ItemError>>
where
    T: Send + 'static,
    U: Send + 'static,
    E: Into<BoxError>,
    F: FnMut(T) -> Result<U, E> + Send + 'static,
{
    spawn_map(token, input, capacity, move |value| {
        match panic::catch_unwind(AssertUnwindSafe(|| f(value))) {
            Ok(Ok(mapped)) => Ok(mapped),
            Ok(Err(e)) => Err(ItemError::Failed(e.into())),
            Err(payload) => Err(ItemError::Panicked(panic_message(payload.as_ref()))),
        }
    })
}

/// Split a stream of results into a values stream and an errors stream
///
/// A single routing task reads the input and forwards each item to the
/// matching output, so both outputs must be drained concurrently: an unread
/// output stalls delivery to the other one. Dropping one output entirely
/// detaches it and routing continues for the other.
pub fn collect_errors<T, E>(token: &Token, input: Stream<Result<T, E>>) -> (Stream<T>, Stream<E>)
where
    T: Send + 'static,
    E: Send + 'static,
{
    let (values_out, values) = named_channel("collect_errors", DEFAULT_CAPACITY);
    let (errors_out, errors) = named_channel("collect_errors", DEFAULT_CAPACITY);
    let token = token.clone();

    tokio::spawn(async move {
        let outcome = route(input, &values_out, &errors_out, &token).await;
        errors_out.finish(outcome.clone());
        finish_stage("collect_errors", values_out, outcome);
    });

    (values, errors)
}

async fn route<T, E>(
    mut input: Stream<Result<T, E>>,
    values: &StreamWriter<T>,
    errors: &StreamWriter<E>,
    token: &Token,
) -> Result<(), Halt> {
    let mut values_live = true;
    let mut errors_live = true;

    while values_live || errors_live {
        match input.recv_for(token, both_detached(values, errors)).await? {
            Ok(value) if values_live => values_live = still_live(values.send(token, value).await)?,
            Err(error) if errors_live => errors_live = still_live(errors.send(token, error).await)?,
            _ => {}
        }
    }

    Err(Halt::Detached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CloseReason;
    use crate::stages::source::{collect, generator, take};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Wait until `calls` stops moving, then return its value
    async fn settled(calls: &AtomicUsize) -> usize {
        let mut last = calls.load(Ordering::SeqCst);
        loop {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let now = calls.load(Ordering::SeqCst);
            if now == last {
                return now;
            }
            last = now;
        }
    }

    #[tokio::test]
    async fn map_preserves_order() {
        let token = Token::new();
        let squares = map(&token, generator(&token, 1..=5), |x: i32| x * x);
        assert_eq!(collect(&token, squares).await, vec![1, 4, 9, 16, 25]);
    }

    #[tokio::test]
    async fn map_panic_fails_the_stage() {
        let token = Token::new();
        let mut out = map(&token, generator(&token, vec![1, 2, 3]), |x: i32| {
            if x == 2 {
                panic!("cannot handle two");
            }
            x
        });

        assert_eq!(out.recv(&token).await, Ok(1));
        match out.recv(&token).await {
            Err(Halt::Closed(CloseReason::Failed(failure))) => {
                assert_eq!(failure.stage, "map");
                assert_eq!(failure.message, "cannot handle two");
            }
            other => panic!("Expected failed close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn upstream_failure_propagates_through_filter() {
        let token = Token::new();
        let failing = map(&token, generator(&token, vec![1, 2]), |x: i32| {
            if x == 2 {
                panic!("boom");
            }
            x
        });
        let mut kept = filter(&token, failing, |_| true);

        assert_eq!(kept.recv(&token).await, Ok(1));
        assert!(matches!(
            kept.recv(&token).await,
            Err(Halt::Closed(CloseReason::Failed(_)))
        ));
        assert!(matches!(kept.close_reason(), Some(CloseReason::Failed(f)) if f.stage == "map"));
    }

    #[tokio::test]
    async fn filter_keeps_relative_order() {
        let token = Token::new();
        let evens = filter(&token, generator(&token, 1..=10), |x: &i32| x % 2 == 0);
        assert_eq!(collect(&token, evens).await, vec![2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn map_with_error_tags_each_item() {
        let token = Token::new();
        let input = generator(&token, vec!["1", "x", "3"]);
        let parsed = map_with_error(&token, input, |s: &str| s.parse::<i32>());
        let results = collect(&token, parsed).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().ok(), Some(&1));
        assert!(matches!(results[1], Err(ItemError::Failed(_))));
        assert_eq!(results[2].as_ref().ok(), Some(&3));
    }

    #[tokio::test]
    async fn map_with_error_converts_panics() {
        let token = Token::new();
        let input = generator(&token, vec![0, 1]);
        let results = collect(
            &token,
            map_with_error(&token, input, |x: i32| -> Result<i32, String> {
                if x == 0 {
                    panic!("zero");
                }
                Ok(x)
            }),
        )
        .await;

        assert!(matches!(&results[0], Err(ItemError::Panicked(msg)) if msg == "zero"));
        assert_eq!(results[1].as_ref().ok(), Some(&1));
    }

    #[tokio::test]
    async fn collect_errors_splits_preserving_order() {
        let token = Token::new();
        let input = generator(
            &token,
            vec![Ok(1), Err("a"), Ok(2), Err("b"), Ok(3)],
        );
        let (values, errors) = collect_errors(&token, input);

        let (values, errors) = tokio::join!(collect(&token, values), collect(&token, errors));
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(errors, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn collect_errors_continues_when_one_side_dropped() {
        let token = Token::new();
        let input = generator(&token, vec![Err::<i32, &str>("a"), Ok(1), Err("b"), Ok(2)]);
        let (values, errors) = collect_errors(&token, input);
        drop(errors);

        assert_eq!(collect(&token, values).await, vec![1, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejecting_filter_releases_endless_upstream_after_take() {
        let token = Token::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let kept = filter(&token, generator(&token, 0u64..), move |x: &u64| {
            counter.fetch_add(1, Ordering::SeqCst);
            *x < 3
        });

        assert_eq!(collect(&token, take(&token, kept, 3)).await, vec![0, 1, 2]);

        let stopped_at = tokio::time::timeout(Duration::from_secs(2), settled(&calls))
            .await
            .expect("filter kept pulling after its reader was dropped");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), stopped_at);
        assert!(!token.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn collect_errors_stops_when_both_sides_dropped() {
        let token = Token::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let results = map(&token, generator(&token, 0u64..), move |x| {
            counter.fetch_add(1, Ordering::SeqCst);
            if x % 2 == 0 { Ok(x) } else { Err(x) }
        });
        let (values, errors) = collect_errors(&token, results);
        drop(values);
        drop(errors);

        let stopped_at = tokio::time::timeout(Duration::from_secs(2), settled(&calls))
            .await
            .expect("router kept pulling after both outputs were dropped");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), stopped_at);
    }
}
