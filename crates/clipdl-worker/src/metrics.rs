//! Job metrics.

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Finished jobs by outcome (`completed` / `failed` / `cancelled`).
    pub const JOBS_TOTAL: &str = "clipdl_jobs_total";

    /// End-to-end job duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "clipdl_job_duration_seconds";

    /// Jobs served from the content cache.
    pub const JOB_CACHE_HITS_TOTAL: &str = "clipdl_job_cache_hits_total";
}

pub fn record_job(outcome: &'static str, duration: Duration, cache_hit: bool) {
    counter!(names::JOBS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => outcome).record(duration.as_secs_f64());
    if cache_hit {
        counter!(names::JOB_CACHE_HITS_TOTAL).increment(1);
    }
}
