use thiserror::Error;

/// Describes why a stage stopped producing before its input was exhausted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("stage '{stage}' failed: {message}")]
pub struct StageFailure {
    pub stage: &'static str,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    /// Build a failure from a caught panic payload
    pub fn from_panic(stage: &'static str, payload: Box<dyn std::any::Any + Send>) -> Self {
        Self::new(stage, panic_message(payload.as_ref()))
    }
}

/// Extract the message carried by a panic payload, if it is a string
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Pipeline-level errors surfaced by terminal operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Pipeline was cancelled")]
    Cancelled,

    #[error("Stage failure: {0}")]
    StageFailed(#[from] StageFailure),
}
