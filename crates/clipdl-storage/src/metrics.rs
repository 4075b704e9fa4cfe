//! Content cache metrics.

use metrics::{counter, gauge};

/// Metric name constants for consistency.
pub mod names {
    /// Payload lookups that found a fresh entry.
    pub const CACHE_HITS_TOTAL: &str = "clipdl_content_cache_hits_total";

    /// Payload lookups that missed (absent, expired or dangling).
    pub const CACHE_MISSES_TOTAL: &str = "clipdl_content_cache_misses_total";

    /// Entries removed to make room, by reason.
    pub const CACHE_EVICTIONS_TOTAL: &str = "clipdl_content_cache_evictions_total";

    /// Bytes currently held by cached payloads.
    pub const CACHE_BYTES: &str = "clipdl_content_cache_bytes";
}

pub fn record_hit() {
    counter!(names::CACHE_HITS_TOTAL).increment(1);
}

pub fn record_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// `reason` is `lru`, `expired` or `missing`.
pub fn record_eviction(reason: &'static str) {
    counter!(names::CACHE_EVICTIONS_TOTAL, "reason" => reason).increment(1);
}

pub fn record_size(total_bytes: u64) {
    gauge!(names::CACHE_BYTES).set(total_bytes as f64);
}
