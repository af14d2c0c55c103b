pub mod error;
pub mod stream;
pub mod token;

// Re-export commonly used types
pub use error::{PipelineError, StageFailure};
pub use stream::{CloseReason, Halt, Stream, StreamWriter, channel};
pub use token::{Token, cancel_on_signal};
