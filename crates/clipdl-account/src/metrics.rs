//! Backend metrics collection.
//!
//! Provides standardized metrics for monitoring backend calls:
//! - Request counters by operation and status
//! - Latency histograms
//! - Retry counters
//! - Account cache hits and misses

use metrics::{counter, histogram};

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    /// Total backend requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "clipdl_backend_requests_total";

    /// Total retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "clipdl_backend_retries_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "clipdl_backend_latency_seconds";

    /// Account cache lookups by result (`hit` / `miss`).
    pub const ACCOUNT_CACHE_LOOKUPS_TOTAL: &str = "clipdl_account_cache_lookups_total";
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record metrics for a completed backend request.
///
/// `status` is 0 when no response was received.
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

/// Record a retry attempt.
pub fn record_retry(operation: &str) {
    counter!(
        names::RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    counter!(
        names::ACCOUNT_CACHE_LOOKUPS_TOTAL,
        "result" => if hit { "hit" } else { "miss" }
    )
    .increment(1);
}
