use std::error::Error as StdError;

use thiserror::Error;

/// Boxed error produced by a fallible per-item callback
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Recoverable, per-item failure produced by `map_with_error`
#[derive(Error, Debug)]
pub enum ItemError {
    #[error("Item failed: {0}")]
    Failed(BoxError),

    #[error("Item callback panicked: {0}")]
    Panicked(String),
}

impl ItemError {
    pub fn is_panic(&self) -> bool {
        matches!(self, ItemError::Panicked(_))
    }
}
