//! Concurrent stream-processing stages connected by bounded streams
//!
//! A pipeline is a chain of stages. Each stage runs as its own tokio task,
//! reads one or more [`Stream`](core::Stream)s and writes to fresh ones.
//! Every stage observes a shared [`Token`](core::Token) and stops promptly
//! once it is cancelled or its deadline passes. Streams record why they
//! closed, so a consumer can tell exhaustion from cancellation or failure.
//!
//! Use the free functions in [`stages`] to wire stages by hand, the
//! [`Pipeline`](pipeline::Pipeline) builder for linear chains, or
//! [`WorkPool`](pool::WorkPool) for a long-lived pool fed by explicit submits.

pub mod core;
pub mod pipeline;
pub mod pool;
pub mod prelude;
pub mod stages;
