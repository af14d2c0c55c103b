use serde::{Deserialize, Serialize};

use crate::stages::DEFAULT_REORDER_WINDOW;

/// Tuning knobs applied to every stage a pipeline builder creates
///
/// Deserializes from any serde format; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Slack of each stream between stages
    pub stream_capacity: usize,
    /// Maximum out-of-order results held by an ordered fan-out
    pub reorder_window: usize,
    /// Slack of each tee branch
    pub tee_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stream_capacity: 1,
            reorder_window: DEFAULT_REORDER_WINDOW,
            tee_capacity: 1,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the slack of every stream between stages (at least 1)
    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity.max(1);
        self
    }

    /// Set the reorder window of ordered fan-outs (at least 1)
    pub fn with_reorder_window(mut self, window: usize) -> Self {
        self.reorder_window = window.max(1);
        self
    }

    /// Set the per-branch slack of tees (at least 1)
    pub fn with_tee_capacity(mut self, capacity: usize) -> Self {
        self.tee_capacity = capacity.max(1);
        self
    }
}
