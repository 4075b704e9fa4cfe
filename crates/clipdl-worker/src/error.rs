//! Pipeline error types.
//!
//! Everything below the pipeline is converted here; callers never see raw
//! I/O or HTTP errors.

use std::time::Duration;

use clipdl_account::AccountError;
use clipdl_media::MediaError;
use clipdl_models::job::JobTransitionError;
use clipdl_storage::StorageError;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Could not start {0}")]
    LaunchFailure(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// User-facing message already mapped from tool output.
    #[error("{message}")]
    ToolReportedFailure {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("{0}")]
    Account(AccountError),

    #[error("Cancelled")]
    Cancelled,

    #[error("Cache error: {0}")]
    Cache(String),
}

impl PipelineError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Network(_) | PipelineError::Timeout(_))
    }

    /// Whether the account must change (credits, license) before retrying.
    pub fn needs_account_action(&self) -> bool {
        matches!(
            self,
            PipelineError::Account(AccountError::NoCreditsRemaining)
                | PipelineError::Account(AccountError::InvalidLicense)
        )
    }
}

impl From<MediaError> for PipelineError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::LaunchFailure { program, reason } => {
                Self::LaunchFailure(format!("{}: {}", program, reason))
            }
            MediaError::Timeout(d) => Self::Timeout(d),
            MediaError::Cancelled => Self::Cancelled,
            MediaError::ToolReportedFailure { message, exit_code } => {
                Self::ToolReportedFailure { message, exit_code }
            }
            MediaError::InvalidUrl(msg) => Self::InvalidInput(msg),
            MediaError::InvalidTimestamp(msg) => Self::InvalidInput(msg),
            MediaError::FileNotFound(path) => {
                Self::InvalidInput(format!("File not found: {}", path.display()))
            }
            MediaError::Io(e) => Self::ToolReportedFailure {
                message: format!("I/O error: {}", e),
                exit_code: None,
            },
            MediaError::JsonParse(e) => Self::ToolReportedFailure {
                message: format!("Unreadable tool output: {}", e),
                exit_code: None,
            },
        }
    }
}

impl From<AccountError> for PipelineError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::Cancelled => Self::Cancelled,
            AccountError::NetworkTransient(_)
            | AccountError::NetworkPermanent { .. }
            | AccountError::RateLimited { .. }
            | AccountError::InvalidResponse(_) => Self::Network(e.to_string()),
            other => Self::Account(other),
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(e: StorageError) -> Self {
        Self::Cache(e.to_string())
    }
}

impl From<JobTransitionError> for PipelineError {
    fn from(e: JobTransitionError) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_media_mapping() {
        let err: PipelineError = MediaError::launch_failure("yt-dlp", "not found").into();
        assert!(matches!(err, PipelineError::LaunchFailure(ref m) if m.contains("yt-dlp")));

        let err: PipelineError = MediaError::tool_failed("Private video", Some(1)).into();
        assert_eq!(err.to_string(), "Private video");

        let err: PipelineError = MediaError::FileNotFound(PathBuf::from("/x.mp4")).into();
        assert!(matches!(err, PipelineError::InvalidInput(_)));

        let err: PipelineError =
            MediaError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")).into();
        assert!(matches!(err, PipelineError::ToolReportedFailure { exit_code: None, .. }));
    }

    #[test]
    fn test_account_mapping() {
        let err: PipelineError = AccountError::NoCreditsRemaining.into();
        assert!(err.needs_account_action());

        let err: PipelineError = AccountError::NetworkTransient("reset".into()).into();
        assert!(matches!(err, PipelineError::Network(_)));
        assert!(err.is_retryable());

        let err: PipelineError = AccountError::Cancelled.into();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
