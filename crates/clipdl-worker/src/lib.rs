//! Clip pipeline orchestration for clipdl.
//!
//! Ties the media, storage and account crates together into a job runner
//! and backs the `clipdl` binary.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use logging::JobLogger;
pub use pipeline::ClipPipeline;
