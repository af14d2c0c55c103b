use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::branch::{spawn_fan_in, spawn_fan_out};
use super::{DEFAULT_CAPACITY, finish_stage};
use crate::core::stream::named_channel;
use crate::core::{Halt, StageFailure, Stream, StreamWriter, Token};

/// Default bound on indexed-but-not-yet-emitted items in the ordered fan-out
pub const DEFAULT_REORDER_WINDOW: usize = 1024;

const STAGE: &str = "ordered_fan_out_fan_in";

/// A value tagged with its input position. The permit reserves one slot of
/// the reorder window and is released when the value is emitted.
pub(crate) struct OrderedItem<T> {
    index: u64,
    value: T,
    permit: OwnedSemaphorePermit,
}

impl<T> OrderedItem<T> {
    fn into_value(self) -> T {
        drop(self.permit);
        self.value
    }
}

/// Parallel map over `workers` tasks whose output is in exact input order
///
/// Uses [`DEFAULT_REORDER_WINDOW`] as the reorder window.
pub fn ordered_fan_out_fan_in<T, U, F, Fut>(token: &Token, input: Stream<T>, workers: usize, f: F) -> Stream<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = U> + Send + 'static,
{
    ordered_fan_out_fan_in_windowed(token, input, workers, DEFAULT_REORDER_WINDOW, f)
}

/// Parallel map whose output is in exact input order, holding at most
/// `window` results out of order at any time
///
/// The indexing task stalls once `window` items are in flight and resumes as
/// the reordering task emits them, so memory stays bounded even when one
/// worker lags far behind the others. A panic in `f` fails the output and
/// stops every internal task.
pub fn ordered_fan_out_fan_in_windowed<T, U, F, Fut>(
    token: &Token,
    input: Stream<T>,
    workers: usize,
    window: usize,
    f: F,
) -> Stream<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = U> + Send + 'static,
{
    spawn_ordered(token, input, workers, window, DEFAULT_CAPACITY, f)
}

pub(crate) fn spawn_ordered<T, U, F, Fut>(
    token: &Token,
    input: Stream<T>,
    workers: usize,
    window: usize,
    capacity: usize,
    f: F,
) -> Stream<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = U> + Send + 'static,
{
    // Internal stages share a child token so the reorderer can stop them alone
    let internal = token.child();
    let window = Arc::new(Semaphore::new(window.max(1)));
    let f = Arc::new(f);

    let indexed = spawn_indexer(&internal, input, window, capacity);
    let worker_outputs = spawn_fan_out(&internal, indexed, workers, capacity, move |item: OrderedItem<T>| {
        let f = Arc::clone(&f);
        async move {
            let OrderedItem { index, value, permit } = item;
            let result = AssertUnwindSafe((*f)(value))
                .catch_unwind()
                .await
                .map_err(|payload| StageFailure::from_panic(STAGE, payload));
            OrderedItem {
                index,
                value: result,
                permit,
            }
        }
    });
    let merged = spawn_fan_in(&internal, worker_outputs, capacity);

    let (out, stream) = named_channel(STAGE, capacity);
    let token = token.clone();

    tokio::spawn(async move {
        let outcome = run_reorder(merged, &out, &token).await;
        finish_stage(STAGE, out, outcome);
        internal.cancel();
    });

    stream
}

fn spawn_indexer<T>(
    token: &Token,
    input: Stream<T>,
    window: Arc<Semaphore>,
    capacity: usize,
) -> Stream<OrderedItem<T>>
where
    T: Send + 'static,
{
    let (out, stream) = named_channel("indexer", capacity);
    let token = token.clone();

    tokio::spawn(async move {
        let outcome = run_indexer(input, &out, &token, window).await;
        finish_stage("indexer", out, outcome);
    });

    stream
}

async fn run_indexer<T>(
    mut input: Stream<T>,
    out: &StreamWriter<OrderedItem<T>>,
    token: &Token,
    window: Arc<Semaphore>,
) -> Result<(), Halt> {
    let mut index = 0u64;
    loop {
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Halt::Cancelled),
            permit = Arc::clone(&window).acquire_owned() => permit.map_err(|_| Halt::Cancelled)?,
        };
        let value = input.recv_for(token, out.detached()).await?;
        out.send(token, OrderedItem { index, value, permit }).await?;
        index += 1;
    }
}

async fn run_reorder<U>(
    mut input: Stream<OrderedItem<Result<U, StageFailure>>>,
    out: &StreamWriter<U>,
    token: &Token,
) -> Result<(), Halt> {
    let mut pending: HashMap<u64, OrderedItem<Result<U, StageFailure>>> = HashMap::new();
    let mut next_index = 0u64;

    loop {
        let item = match input.recv_for(token, out.detached()).await {
            Ok(item) => item,
            Err(halt) => {
                debug!(stage = STAGE, emitted = next_index, pending = pending.len(), "Reorder input closed");
                return Err(halt);
            }
        };
        pending.insert(item.index, item);

        // Emit the contiguous prefix, stop at the first hole
        while let Some(ready) = pending.remove(&next_index) {
            next_index += 1;
            let value = ready.into_value().map_err(Halt::Failed)?;
            out.send(token, value).await?;
        }
    }
}
