use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tracing::warn;

use super::error::StageFailure;
use super::token::Token;

/// Why a stream stopped delivering values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The producer ran out of input and closed normally
    Exhausted,
    /// The producer observed cancellation and stopped early
    Cancelled,
    /// The producer (or a stage upstream of it) aborted
    Failed(StageFailure),
}

impl CloseReason {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, CloseReason::Exhausted)
    }

    /// Keep the more severe of two reasons. Failures win over cancellation,
    /// cancellation wins over normal exhaustion, and the first failure is kept.
    pub(crate) fn merge(self, other: CloseReason) -> CloseReason {
        match (self, other) {
            (CloseReason::Failed(f), _) => CloseReason::Failed(f),
            (_, CloseReason::Failed(f)) => CloseReason::Failed(f),
            (CloseReason::Cancelled, _) | (_, CloseReason::Cancelled) => CloseReason::Cancelled,
            _ => CloseReason::Exhausted,
        }
    }
}

/// Why a send or receive did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    /// The token fired while waiting
    Cancelled,
    /// The reader side was dropped, nobody will ever receive again
    Detached,
    /// The input stream has been closed by its owner
    Closed(CloseReason),
    /// A callback run by this stage panicked
    Failed(StageFailure),
}

impl Halt {
    /// The close reason a stage should record on its own output after halting
    pub fn into_reason(self) -> CloseReason {
        match self {
            Halt::Cancelled => CloseReason::Cancelled,
            Halt::Detached => CloseReason::Exhausted,
            Halt::Closed(reason) => reason,
            Halt::Failed(failure) => CloseReason::Failed(failure),
        }
    }
}

type Slot = Arc<OnceLock<CloseReason>>;

/// Create a stream with room for `capacity` values in flight (at least one).
///
/// The writer is the stream's single owner: only it can close the stream.
pub fn channel<T>(capacity: usize) -> (StreamWriter<T>, Stream<T>) {
    named_channel("external", capacity)
}

pub(crate) fn named_channel<T>(stage: &'static str, capacity: usize) -> (StreamWriter<T>, Stream<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let slot: Slot = Arc::new(OnceLock::new());
    (
        StreamWriter {
            tx,
            slot: slot.clone(),
            stage,
        },
        Stream { rx, slot },
    )
}

/// Owning write half of a [`Stream`]
///
/// Dropping a writer without calling [`close`](Self::close) or
/// [`close_with`](Self::close_with) marks the stream as failed.
pub struct StreamWriter<T> {
    tx: mpsc::Sender<T>,
    slot: Slot,
    stage: &'static str,
}

impl<T> StreamWriter<T> {
    /// Send a value, racing against cancellation.
    ///
    /// Cancellation is checked first, so no value is sent once the token has fired.
    pub async fn send(&self, token: &Token, value: T) -> Result<(), Halt> {
        send_racing(&self.tx, token, value).await
    }

    /// Close the stream after normal completion
    pub fn close(self) {
        self.close_with(CloseReason::Exhausted);
    }

    /// Close the stream, recording why it stopped
    pub fn close_with(self, reason: CloseReason) {
        let _ = self.slot.set(reason);
    }

    /// Close the stream with the reason implied by a stage's final outcome
    pub fn finish(self, outcome: Result<(), Halt>) {
        match outcome {
            Ok(()) => self.close(),
            Err(halt) => self.close_with(halt.into_reason()),
        }
    }

    /// A non-owning send handle for relays that share this stream's output
    pub(crate) fn share(&self) -> SharedWriter<T> {
        SharedWriter {
            tx: self.tx.clone(),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the reader has been dropped
    pub async fn detached(&self) {
        self.tx.closed().await
    }
}

impl<T> Drop for StreamWriter<T> {
    fn drop(&mut self) {
        let mut abandoned = false;
        self.slot.get_or_init(|| {
            abandoned = true;
            CloseReason::Failed(StageFailure::new(self.stage, "writer dropped without closing"))
        });
        if abandoned {
            warn!(stage = self.stage, "Stream writer dropped without closing");
        }
    }
}

/// Send-only handle onto a stream owned by someone else. It cannot close the stream.
pub(crate) struct SharedWriter<T> {
    tx: mpsc::Sender<T>,
}

impl<T> SharedWriter<T> {
    pub(crate) async fn send(&self, token: &Token, value: T) -> Result<(), Halt> {
        send_racing(&self.tx, token, value).await
    }

    pub(crate) async fn detached(&self) {
        self.tx.closed().await
    }
}

async fn send_racing<T>(tx: &mpsc::Sender<T>, token: &Token, value: T) -> Result<(), Halt> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Halt::Cancelled),
        sent = tx.send(value) => sent.map_err(|_| Halt::Detached),
    }
}

/// Read half of a point-to-point, bounded queue of values
///
/// Values arrive in send order. After the owner closes the stream, buffered
/// values are still delivered before end-of-stream is observed. Dropping the
/// reader detaches it, which makes every later send by the producer fail
/// immediately instead of blocking.
pub struct Stream<T> {
    rx: mpsc::Receiver<T>,
    slot: Slot,
}

impl<T> Stream<T> {
    /// Receive the next value, racing against cancellation
    pub async fn recv(&mut self, token: &Token) -> Result<T, Halt> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Halt::Cancelled),
            next = self.rx.recv() => match next {
                Some(value) => Ok(value),
                None => Err(Halt::Closed(self.final_reason())),
            },
        }
    }

    /// Receive the next value on behalf of a stage whose own output may lose its reader
    ///
    /// Fails with `Detached` as soon as `downstream` resolves, so a stage that
    /// rarely sends (a filter rejecting everything, a half-full batch) stops
    /// pulling from its input once nobody reads its output.
    pub async fn recv_for(
        &mut self,
        token: &Token,
        downstream: impl Future<Output = ()>,
    ) -> Result<T, Halt> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Halt::Cancelled),
            _ = downstream => Err(Halt::Detached),
            next = self.rx.recv() => match next {
                Some(value) => Ok(value),
                None => Err(Halt::Closed(self.final_reason())),
            },
        }
    }

    /// Receive the next value without observing any token
    pub async fn next_value(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// `None` while the owner is still writing, the recorded reason once it has closed
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.slot.get().cloned()
    }

    /// The reason recorded by the owner, assuming end-of-stream has been observed
    pub(crate) fn final_reason(&self) -> CloseReason {
        self.close_reason().unwrap_or(CloseReason::Exhausted)
    }
}

impl<T> futures::Stream for Stream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
