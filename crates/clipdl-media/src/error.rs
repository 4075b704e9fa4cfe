//! Error types for media operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while running external tools.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Executable missing, empty path, or spawn failure. Never retried.
    #[error("Failed to launch {program}: {reason}")]
    LaunchFailure { program: String, reason: String },

    /// Invocation exceeded its deadline; the process has been killed.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    /// Non-zero exit or recognized error output, already mapped to a
    /// user-facing message.
    #[error("{message}")]
    ToolReportedFailure {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create a launch failure error.
    pub fn launch_failure(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LaunchFailure {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Create a tool failure error.
    pub fn tool_failed(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::ToolReportedFailure {
            message: message.into(),
            exit_code,
        }
    }

    pub fn invalid_url(reason: impl Into<String>) -> Self {
        Self::InvalidUrl(reason.into())
    }
}

impl From<clipdl_models::TimestampError> for MediaError {
    fn from(e: clipdl_models::TimestampError) -> Self {
        Self::InvalidTimestamp(e.to_string())
    }
}
