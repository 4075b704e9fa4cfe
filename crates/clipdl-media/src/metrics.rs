//! Media tool metrics.
//!
//! Counters and histograms for external tool runs and safety throttling.

use std::time::Duration;

use metrics::{counter, histogram};

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    /// External process runs by program and outcome.
    pub const PROCESS_RUNS_TOTAL: &str = "clipdl_process_runs_total";

    /// External process wall-clock duration in seconds by program.
    pub const PROCESS_DURATION_SECONDS: &str = "clipdl_process_duration_seconds";

    /// Downloads admitted by the safety throttle.
    pub const THROTTLED_DOWNLOADS_TOTAL: &str = "clipdl_throttled_downloads_total";

    /// Safety delay applied before a download, in seconds.
    pub const THROTTLE_DELAY_SECONDS: &str = "clipdl_throttle_delay_seconds";
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record one finished (or aborted) process run.
pub fn record_process_run(program: &str, outcome: &'static str, duration: Duration) {
    counter!(
        names::PROCESS_RUNS_TOTAL,
        "program" => program.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        names::PROCESS_DURATION_SECONDS,
        "program" => program.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a throttled download and the delay it was given.
pub fn record_throttle(delay: Duration) {
    counter!(names::THROTTLED_DOWNLOADS_TOTAL).increment(1);
    histogram!(names::THROTTLE_DELAY_SECONDS).record(delay.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_process_run("ffmpeg", "success", Duration::from_millis(20));
        record_throttle(Duration::from_secs(3));
    }
}
