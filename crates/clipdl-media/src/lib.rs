//! External tool orchestration for clipdl.
//!
//! This crate provides:
//! - A process supervisor with timeouts, cancellation and streaming output
//! - Progress parsing for yt-dlp and FFmpeg output
//! - yt-dlp download and metadata invocations with error classification
//! - FFmpeg trim/crop clip creation
//! - Source URL admission and download safety throttling

pub mod clip;
pub mod command;
pub mod download;
pub mod error;
pub mod metrics;
pub mod process;
pub mod progress;
pub mod safety;
pub mod url_policy;

pub use clip::{clip_output_filename, create_clip, ClipRequest};
pub use command::{resolve_tool, FfmpegCommand};
pub use download::{
    classify_tool_error, download_video, fetch_metadata, format_selector, format_selector_for,
    DownloadRequest, DownloadedVideo,
};
pub use error::{MediaError, MediaResult};
pub use process::{LineSink, ProcessInvocation, ProcessOutcome, ProcessSupervisor, StreamMode};
pub use progress::{parse_clock, parse_download_progress, TranscodeProgress};
pub use safety::{SafetyConfig, SafetyDirectives, SafetyState, SafetyThrottle};
pub use url_policy::admit_url;
