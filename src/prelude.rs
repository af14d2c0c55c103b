//! Prelude module for convenient imports
//!
//! Import everything you need with: `use pipeflow::prelude::*;`

// Core types
pub use crate::core::{
    CloseReason, Halt, PipelineError, StageFailure, Stream, StreamWriter, Token, cancel_on_signal,
    channel,
};

// Stages
pub use crate::stages::{
    DEFAULT_REORDER_WINDOW, ItemError, batch, buffer, collect, collect_errors, fan_in, fan_out,
    fan_out_fan_in, filter, generator, map, map_with_error, ordered_fan_out_fan_in,
    ordered_fan_out_fan_in_windowed, sink, take, tee, tee_with_capacity,
};

// Pipeline builder
pub use crate::pipeline::{Pipeline, PipelineBuilder, PipelineConfig};

// Work pool
pub use crate::pool::{Handler, PoolError, PoolState, WorkPool, WorkerStats};
