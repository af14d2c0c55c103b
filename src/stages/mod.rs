pub mod branch;
pub mod error;
pub mod ordered;
pub mod source;
pub mod transform;

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::core::{CloseReason, Halt, StageFailure, StreamWriter};

// Re-export commonly used types
pub use branch::{batch, fan_in, fan_out, fan_out_fan_in, tee, tee_with_capacity};
pub use error::ItemError;
pub use ordered::{DEFAULT_REORDER_WINDOW, ordered_fan_out_fan_in, ordered_fan_out_fan_in_windowed};
pub use source::{buffer, collect, generator, sink, take};
pub use transform::{collect_errors, filter, map, map_with_error};

/// Slack of every stream created by a free stage function
pub(crate) const DEFAULT_CAPACITY: usize = 1;

/// Log how a stage ended and close its output with the matching reason
pub(crate) fn finish_stage<T>(stage: &'static str, out: StreamWriter<T>, outcome: Result<(), Halt>) {
    match &outcome {
        Ok(()) | Err(Halt::Closed(CloseReason::Exhausted)) => debug!(stage, "Stage finished"),
        Err(Halt::Cancelled) | Err(Halt::Closed(CloseReason::Cancelled)) => {
            debug!(stage, "Stage cancelled")
        }
        Err(Halt::Detached) => debug!(stage, "Downstream detached, stopping stage"),
        Err(Halt::Closed(CloseReason::Failed(failure))) => {
            debug!(stage, upstream = failure.stage, "Propagating upstream failure")
        }
        Err(Halt::Failed(failure)) => {
            warn!(stage, message = %failure.message, "Stage callback panicked")
        }
    }
    out.finish(outcome);
}

/// Run a stage callback, turning a panic into a stage-fatal halt
pub(crate) fn guarded<T, U>(stage: &'static str, f: &mut impl FnMut(T) -> U, value: T) -> Result<U, Halt> {
    panic::catch_unwind(AssertUnwindSafe(|| f(value)))
        .map_err(|payload| Halt::Failed(StageFailure::from_panic(stage, payload)))
}

/// Resolves once neither branch of a two-output stage has a reader
pub(crate) async fn both_detached<A, B>(first: &StreamWriter<A>, second: &StreamWriter<B>) {
    tokio::join!(first.detached(), second.detached());
}

/// Map a branch send result to whether the branch still has a reader
///
/// A stage that runs out of live branches returns `Err(Halt::Detached)`,
/// which [`finish_stage`] records as `Exhausted`: nobody is left to observe
/// the close, so it is a normal end rather than a failure.
pub(crate) fn still_live(sent: Result<(), Halt>) -> Result<bool, Halt> {
    match sent {
        Ok(()) => Ok(true),
        Err(Halt::Detached) => Ok(false),
        Err(halt) => Err(halt),
    }
}
