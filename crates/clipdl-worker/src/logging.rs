//! Structured job logging.
//!
//! Every line carries the job id and the stage so one job can be followed
//! through concurrent output.

use std::path::Path;
use std::time::Duration;

use clipdl_models::{ClipJob, JobId, JobStatus, SafetyNotice};
use tracing::{error, info, warn, Span};

/// Job logger with the job's identity attached to every event.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    url: String,
}

impl JobLogger {
    pub fn new(job: &ClipJob) -> Self {
        Self {
            job_id: job.id.to_string(),
            url: job.url.clone(),
        }
    }

    pub fn from_id(job_id: &JobId, url: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            url: url.to_string(),
        }
    }

    pub fn log_start(&self, start: &str, end: &str) {
        info!(
            job_id = %self.job_id,
            url = %self.url,
            start = start,
            end = end,
            "Job started"
        );
    }

    pub fn log_status(&self, status: JobStatus) {
        info!(job_id = %self.job_id, status = %status, "Job status changed");
    }

    pub fn log_cache(&self, key: &str, hit: bool) {
        info!(
            job_id = %self.job_id,
            cache_key = key,
            cache_hit = hit,
            "Content cache checked"
        );
    }

    pub fn log_notice(&self, notice: &SafetyNotice) {
        warn!(job_id = %self.job_id, notice = ?notice, "{}", notice.message());
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, "Job warning: {}", message);
    }

    pub fn log_failure(&self, message: &str) {
        error!(job_id = %self.job_id, url = %self.url, "Job failed: {}", message);
    }

    pub fn log_completion(&self, output: &Path, cache_hit: bool, elapsed: Duration) {
        info!(
            job_id = %self.job_id,
            output = %output.display(),
            cache_hit = cache_hit,
            duration_ms = elapsed.as_millis() as u64,
            "Job completed"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Span covering the whole job.
    pub fn span(&self) -> Span {
        tracing::info_span!("clip_job", job_id = %self.job_id)
    }
}
