//! Shared data models for the clipdl pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Clip jobs and their lifecycle
//! - Aspect-ratio modes and quality labels
//! - Video metadata served from the content cache
//! - Job events passed to presentation layers
//! - Strict timestamp and content-id helpers

pub mod aspect;
pub mod event;
pub mod job;
pub mod quality;
pub mod timestamp;
pub mod utils;
pub mod video;

// Re-export common types
pub use aspect::AspectMode;
pub use event::{JobEvent, SafetyNotice};
pub use job::{ClipJob, JobId, JobStatus, Stage};
pub use quality::Quality;
pub use timestamp::{format_seconds, validate_clip_range, ClipRange, TimestampError};
pub use utils::{extract_youtube_id, YoutubeIdError, YoutubeIdResult};
pub use video::VideoMetadata;
