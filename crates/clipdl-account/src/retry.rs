//! Retry policy with exponential backoff and jitter.
//!
//! - Exponential backoff with full jitter
//! - Respects a server-provided retry delay on 429
//! - Sleeps are cancellable

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};

use crate::error::{AccountError, AccountResult};
use crate::metrics::record_retry;

// =============================================================================
// Configuration
// =============================================================================

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub base_delay_ms: u64,
    /// Maximum delay cap (in milliseconds).
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_retries: u32 = std::env::var("CLIPDL_BACKEND_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_retries);

        let base_delay_ms: u64 = std::env::var("CLIPDL_BACKEND_RETRY_BASE_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.base_delay_ms);

        let max_delay_ms: u64 = std::env::var("CLIPDL_BACKEND_RETRY_MAX_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_delay_ms);

        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
        }
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Execute an async operation with retry.
///
/// Retries only errors where [`AccountError::is_retryable`] holds
/// (connection failures, timeouts, 5xx, 429). Everything else is returned
/// immediately. Cancellation interrupts both the attempt and the backoff.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    cancel: &CancellationToken,
    op: F,
) -> AccountResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = AccountResult<T>>,
{
    let mut attempt = 0;

    loop {
        let span = info_span!("backend_retry", operation = %operation, attempt = attempt + 1);

        let result = tokio::select! {
            r = op().instrument(span) => r,
            _ = cancel.cancelled() => return Err(AccountError::Cancelled),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = calculate_delay(config, attempt, e.retry_after_ms());

                warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Backend call failed, retrying"
                );

                record_retry(operation);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(AccountError::Cancelled),
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Calculate retry delay with exponential backoff and full jitter.
fn calculate_delay(config: &RetryConfig, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
    // Honor the server's delay, within our cap
    if let Some(after) = retry_after_ms {
        return Duration::from_millis(after.min(config.max_delay_ms));
    }

    // base * 2^attempt, capped
    let exp_delay = config
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    let capped_delay = exp_delay.min(config.max_delay_ms);

    let jittered = if capped_delay > 0 {
        rand::rng().random_range(0..=capped_delay)
    } else {
        0
    };

    // Ensure minimum delay of base_delay_ms
    Duration::from_millis(jittered.max(config.base_delay_ms.min(capped_delay)))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 200);
        assert_eq!(config.max_delay_ms, 5000);
    }

    #[test]
    fn test_calculate_delay_with_retry_after() {
        let config = RetryConfig::default();
        assert_eq!(calculate_delay(&config, 0, Some(2000)), Duration::from_millis(2000));
        assert_eq!(calculate_delay(&config, 0, Some(60_000)), Duration::from_millis(5000));
    }

    #[test]
    fn test_calculate_delay_bounds() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 2000,
        };
        for attempt in 0..20 {
            let delay = calculate_delay(&config, attempt, None);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(2000));
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = with_retry(&fast_config(), "test", &CancellationToken::new(), || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AccountError::NetworkTransient("reset".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: AccountResult<()> =
            with_retry(&fast_config(), "test", &CancellationToken::new(), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(AccountError::from_http_status(503, "down")) }
            })
            .await;

        assert!(matches!(result, Err(AccountError::NetworkTransient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: AccountResult<()> =
            with_retry(&fast_config(), "test", &CancellationToken::new(), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(AccountError::from_http_status(400, "bad")) }
            })
            .await;

        assert!(matches!(result, Err(AccountError::NetworkPermanent { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_ms: 10_000,
            max_delay_ms: 10_000,
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result: AccountResult<()> = with_retry(&config, "test", &cancel, || async {
            Err(AccountError::NetworkTransient("reset".into()))
        })
        .await;

        assert!(matches!(result, Err(AccountError::Cancelled)));
    }
}
