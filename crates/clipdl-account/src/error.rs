//! Account and backend error types.

use thiserror::Error;

/// Result type for account operations.
pub type AccountResult<T> = Result<T, AccountError>;

/// Errors that can occur talking to the backend or managing account state.
#[derive(Debug, Error)]
pub enum AccountError {
    /// Connection failure, timeout or 5xx. Retried with backoff.
    #[error("Network error: {0}")]
    NetworkTransient(String),

    /// 4xx other than 404/429. Never retried.
    #[error("Backend rejected request (HTTP {status}): {message}")]
    NetworkPermanent { status: u16, message: String },

    #[error("Rate limited by backend")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No free credits remaining")]
    NoCreditsRemaining,

    #[error("License key is not valid")]
    InvalidLicense,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Credential store error: {0}")]
    CredentialStore(String),
}

impl AccountError {
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn credential_store(msg: impl Into<String>) -> Self {
        Self::CredentialStore(msg.into())
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => Self::NotFound(message),
            429 => Self::RateLimited {
                retry_after_ms: None,
            },
            500..=599 => Self::NetworkTransient(format!("HTTP {}: {}", status, message)),
            _ => Self::NetworkPermanent { status, message },
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AccountError::NetworkTransient(_) | AccountError::RateLimited { .. }
        )
    }

    /// Server-requested delay before retrying, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            AccountError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AccountError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::InvalidResponse(e.to_string());
        }
        if let Some(status) = e.status() {
            return Self::from_http_status(status.as_u16(), e.to_string());
        }
        // Connect, timeout, body and request errors are all transport failures
        Self::NetworkTransient(e.to_string())
    }
}

impl From<serde_json::Error> for AccountError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}
