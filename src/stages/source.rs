use tracing::debug;

use super::{DEFAULT_CAPACITY, finish_stage};
use crate::core::stream::named_channel;
use crate::core::{CloseReason, Halt, Stream, StreamWriter, Token};

/// Emit `values` in order on a new stream, then close it
///
/// Every send races against cancellation; the stream is closed on every exit path.
pub fn generator<T, I>(token: &Token, values: I) -> Stream<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    spawn_generator(token, values, DEFAULT_CAPACITY)
}

pub(crate) fn spawn_generator<T, I>(token: &Token, values: I, capacity: usize) -> Stream<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    let (out, stream) = named_channel("generator", capacity);
    let token = token.clone();
    let values = values.into_iter();

    tokio::spawn(async move {
        let outcome = emit_all(&out, &token, values).await;
        finish_stage("generator", out, outcome);
    });

    stream
}

async fn emit_all<T>(
    out: &StreamWriter<T>,
    token: &Token,
    values: impl Iterator<Item = T>,
) -> Result<(), Halt> {
    for value in values {
        out.send(token, value).await?;
    }
    Ok(())
}

/// Terminal stage: call `f` once per value, in arrival order
///
/// Returns how the input ended, or `Cancelled` if the token fired first.
pub async fn sink<T, F>(token: &Token, mut input: Stream<T>, mut f: F) -> CloseReason
where
    F: FnMut(T),
{
    loop {
        match input.recv(token).await {
            Ok(value) => f(value),
            Err(halt) => return halt.into_reason(),
        }
    }
}

/// Drain `input` into a vector, stopping early on cancellation
pub async fn collect<T>(token: &Token, input: Stream<T>) -> Vec<T> {
    let mut values = Vec::new();
    sink(token, input, |value| values.push(value)).await;
    values
}

/// Re-emit every value through a stream with `capacity` slots of slack
pub fn buffer<T>(token: &Token, input: Stream<T>, capacity: usize) -> Stream<T>
where
    T: Send + 'static,
{
    let (out, stream) = named_channel("buffer", capacity);
    let token = token.clone();

    tokio::spawn(async move {
        let outcome = forward(input, &out, &token).await;
        finish_stage("buffer", out, outcome);
    });

    stream
}

async fn forward<T>(mut input: Stream<T>, out: &StreamWriter<T>, token: &Token) -> Result<(), Halt> {
    loop {
        let value = input.recv_for(token, out.detached()).await?;
        out.send(token, value).await?;
    }
}

/// Forward the first `n` values, then release the input and close
///
/// The input reader is dropped as soon as the limit is reached, so an upstream
/// producer blocked on its next send is released instead of leaking.
pub fn take<T>(token: &Token, input: Stream<T>, n: usize) -> Stream<T>
where
    T: Send + 'static,
{
    spawn_take(token, input, n, DEFAULT_CAPACITY)
}

pub(crate) fn spawn_take<T>(token: &Token, input: Stream<T>, n: usize, capacity: usize) -> Stream<T>
where
    T: Send + 'static,
{
    let (out, stream) = named_channel("take", capacity);
    let token = token.clone();

    tokio::spawn(async move {
        let mut input = input;
        let outcome = forward_n(&mut input, &out, &token, n).await;
        if outcome.is_ok() {
            debug!(stage = "take", limit = n, "Limit reached, releasing upstream");
        }
        drop(input);
        finish_stage("take", out, outcome);
    });

    stream
}

async fn forward_n<T>(
    input: &mut Stream<T>,
    out: &StreamWriter<T>,
    token: &Token,
    n: usize,
) -> Result<(), Halt> {
    for _ in 0..n {
        let value = input.recv_for(token, out.detached()).await?;
        out.send(token, value).await?;
    }
    Ok(())
}
