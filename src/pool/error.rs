use thiserror::Error;

/// Lifecycle errors reported by a work pool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Work pool has not been started")]
    NotStarted,

    #[error("Work pool has already been started")]
    AlreadyStarted,

    #[error("Work pool is closed to new jobs")]
    Closed,

    #[error("Work pool was cancelled")]
    Cancelled,
}
