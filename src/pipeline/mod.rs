pub mod builder;
pub mod config;

// Re-export commonly used types
pub use builder::{Pipeline, PipelineBuilder};
pub use config::PipelineConfig;
