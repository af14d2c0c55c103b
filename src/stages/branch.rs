use std::future::Future;
use std::mem;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::debug;

use super::{DEFAULT_CAPACITY, both_detached, finish_stage, still_live};
use crate::core::stream::{SharedWriter, named_channel};
use crate::core::{CloseReason, Halt, StageFailure, Stream, StreamWriter, Token};

/// Spread the values of one stream over `workers` parallel tasks
///
/// All workers race to read the same input; each writes `f(value)` to its own
/// output stream. No ordering holds across workers, and within one worker the
/// order is whatever it happened to dequeue. `f` is shared by every worker.
/// `workers` is clamped to at least one.
pub fn fan_out<T, U, F, Fut>(token: &Token, input: Stream<T>, workers: usize, f: F) -> Vec<Stream<U>>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = U> + Send + 'static,
{
    spawn_fan_out(token, input, workers, DEFAULT_CAPACITY, f)
}

pub(crate) fn spawn_fan_out<T, U, F, Fut>(
    token: &Token,
    input: Stream<T>,
    workers: usize,
    capacity: usize,
    f: F,
) -> Vec<Stream<U>>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = U> + Send + 'static,
{
    let workers = workers.max(1);
    let input = Arc::new(Mutex::new(input));
    let f = Arc::new(f);

    debug!(stage = "fan_out", workers, "Spawning workers");

    (0..workers)
        .map(|worker_id| {
            let (out, stream) = named_channel("fan_out", capacity);
            let input = Arc::clone(&input);
            let f = Arc::clone(&f);
            let token = token.clone();

            tokio::spawn(async move {
                let outcome = run_worker(&input, &out, &token, f.as_ref()).await;
                debug!(stage = "fan_out", worker_id, "Worker exiting");
                finish_stage("fan_out", out, outcome);
            });

            stream
        })
        .collect()
}

async fn run_worker<T, U, F, Fut>(
    input: &Mutex<Stream<T>>,
    out: &StreamWriter<U>,
    token: &Token,
    f: &F,
) -> Result<(), Halt>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = U>,
{
    loop {
        let value = input.lock().await.recv_for(token, out.detached()).await?;
        let mapped = AssertUnwindSafe(f(value))
            .catch_unwind()
            .await
            .map_err(|payload| Halt::Failed(StageFailure::from_panic("fan_out", payload)))?;
        out.send(token, mapped).await?;
    }
}

/// Merge several streams into one
///
/// One relay task per input forwards into the shared output. The output is
/// closed only after every relay has finished, with the most severe close
/// reason observed across the inputs. No ordering holds across inputs.
pub fn fan_in<T>(token: &Token, inputs: Vec<Stream<T>>) -> Stream<T>
where
    T: Send + 'static,
{
    spawn_fan_in(token, inputs, DEFAULT_CAPACITY)
}

pub(crate) fn spawn_fan_in<T>(token: &Token, inputs: Vec<Stream<T>>, capacity: usize) -> Stream<T>
where
    T: Send + 'static,
{
    let (out, merged) = named_channel("fan_in", capacity);
    let mut relays = JoinSet::new();

    for input in inputs {
        let shared = out.share();
        let token = token.clone();
        relays.spawn(async move { relay(input, &shared, &token).await });
    }

    tokio::spawn(async move {
        let mut reason = CloseReason::Exhausted;
        while let Some(joined) = relays.join_next().await {
            let relay_reason = match joined {
                Ok(halt) => halt.into_reason(),
                Err(e) => CloseReason::Failed(StageFailure::new("fan_in", e.to_string())),
            };
            reason = reason.merge(relay_reason);
        }
        debug!(stage = "fan_in", ?reason, "All relays finished");
        out.close_with(reason);
    });

    merged
}

async fn relay<T>(mut input: Stream<T>, out: &SharedWriter<T>, token: &Token) -> Halt {
    loop {
        let value = match input.recv_for(token, out.detached()).await {
            Ok(value) => value,
            Err(halt) => return halt,
        };
        if let Err(halt) = out.send(token, value).await {
            return halt;
        }
    }
}

/// `fan_in(fan_out(...))`: parallel map with no ordering guarantee
pub fn fan_out_fan_in<T, U, F, Fut>(token: &Token, input: Stream<T>, workers: usize, f: F) -> Stream<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = U> + Send + 'static,
{
    fan_in(token, fan_out(token, input, workers, f))
}

/// Duplicate a stream into two branches that see the same values in the same order
///
/// Branches are coupled: one task forwards each value to the first branch and
/// then to the second before reading the next, so a branch that is alive but
/// not being read stalls both. A dropped branch is skipped.
pub fn tee<T>(token: &Token, input: Stream<T>) -> (Stream<T>, Stream<T>)
where
    T: Clone + Send + 'static,
{
    tee_with_capacity(token, input, DEFAULT_CAPACITY)
}

/// [`tee`] with `capacity` slots of slack per branch, so a slow branch only
/// stalls the other one once its slack is used up
pub fn tee_with_capacity<T>(token: &Token, input: Stream<T>, capacity: usize) -> (Stream<T>, Stream<T>)
where
    T: Clone + Send + 'static,
{
    let (first_out, first) = named_channel("tee", capacity);
    let (second_out, second) = named_channel("tee", capacity);
    let token = token.clone();

    tokio::spawn(async move {
        let outcome = run_tee(input, &first_out, &second_out, &token).await;
        second_out.finish(outcome.clone());
        finish_stage("tee", first_out, outcome);
    });

    (first, second)
}

async fn run_tee<T: Clone>(
    mut input: Stream<T>,
    first: &StreamWriter<T>,
    second: &StreamWriter<T>,
    token: &Token,
) -> Result<(), Halt> {
    let mut first_live = true;
    let mut second_live = true;

    while first_live || second_live {
        let value = input.recv_for(token, both_detached(first, second)).await?;
        match (first_live, second_live) {
            (true, true) => {
                first_live = still_live(first.send(token, value.clone()).await)?;
                second_live = still_live(second.send(token, value).await)?;
            }
            (true, false) => first_live = still_live(first.send(token, value).await)?,
            _ => second_live = still_live(second.send(token, value).await)?,
        }
    }

    Err(Halt::Detached)
}

/// Upper bound on the slots reserved up front for one batch
const MAX_BATCH_PREALLOC: usize = 1024;

/// Group values into vectors of `size` (at least one)
///
/// Full groups are emitted as soon as they fill up; a non-empty remainder is
/// emitted once the input closes. Empty groups are never emitted.
pub fn batch<T>(token: &Token, input: Stream<T>, size: usize) -> Stream<Vec<T>>
where
    T: Send + 'static,
{
    spawn_batch(token, input, size, DEFAULT_CAPACITY)
}

pub(crate) fn spawn_batch<T>(token: &Token, input: Stream<T>, size: usize, capacity: usize) -> Stream<Vec<T>>
where
    T: Send + 'static,
{
    let (out, stream) = named_channel("batch", capacity);
    let token = token.clone();
    let size = size.max(1);

    tokio::spawn(async move {
        let outcome = run_batch(input, &out, &token, size).await;
        finish_stage("batch", out, outcome);
    });

    stream
}

async fn run_batch<T>(
    mut input: Stream<T>,
    out: &StreamWriter<Vec<T>>,
    token: &Token,
    size: usize,
) -> Result<(), Halt> {
    let prealloc = size.min(MAX_BATCH_PREALLOC);
    let mut group = Vec::with_capacity(prealloc);
    loop {
        match input.recv_for(token, out.detached()).await {
            Ok(value) => {
                group.push(value);
                if group.len() == size {
                    let full = mem::replace(&mut group, Vec::with_capacity(prealloc));
                    out.send(token, full).await?;
                }
            }
            Err(Halt::Closed(reason)) => {
                if !group.is_empty() {
                    out.send(token, group).await?;
                }
                return Err(Halt::Closed(reason));
            }
            Err(halt) => return Err(halt),
        }
    }
}
