//! Job events passed to presentation layers.
//!
//! The pipeline never shares mutable job state with a UI; it sends these
//! messages over a channel instead.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus};

/// User-visible notice produced by download safety throttling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SafetyNotice {
    /// Today's download count, shown once the first threshold is reached
    DailyCount { count: u32 },
    /// One-time advice to slow down, shown once ever
    SlowDownTip { count: u32 },
}

impl SafetyNotice {
    pub fn message(&self) -> String {
        match self {
            SafetyNotice::DailyCount { count } => {
                format!("You have downloaded {} videos today.", count)
            }
            SafetyNotice::SlowDownTip { count } => format!(
                "You have downloaded {} videos today. Spacing downloads out lowers the chance of a temporary block from YouTube.",
                count
            ),
        }
    }
}

/// Event emitted while a job runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Lifecycle status change
    Status {
        job_id: JobId,
        status: JobStatus,
        timestamp: DateTime<Utc>,
    },
    /// Job-level progress (0-1)
    Progress { job_id: JobId, value: f64 },
    /// Safety notice for the user
    Notice { job_id: JobId, notice: SafetyNotice },
    /// Clip produced
    Completed {
        job_id: JobId,
        output_path: PathBuf,
        cache_hit: bool,
    },
    /// Job failed with a user-facing message
    Failed { job_id: JobId, message: String },
}

impl JobEvent {
    pub fn status(job_id: &JobId, status: JobStatus) -> Self {
        JobEvent::Status {
            job_id: job_id.clone(),
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Status { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Notice { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. } => job_id,
        }
    }
}
