pub mod error;
pub mod handler;
pub mod work_pool;

// Re-export commonly used types
pub use error::PoolError;
pub use handler::Handler;
pub use work_pool::{PoolState, WorkPool, WorkerStats};
