//! Clip job definitions and lifecycle.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{AspectMode, Quality};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job accepted, nothing started yet
    #[default]
    Pending,
    /// Downloader is running
    Downloading,
    /// Transcoder is running
    Processing,
    /// Clip produced
    Completed,
    /// Job failed with an error
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `next` is a legal successor of this status.
    ///
    /// `Pending -> Processing` is the cache-hit path that skips downloading.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Pending, Downloading) | (Pending, Processing) => true,
            (Downloading, Processing) => true,
            (Processing, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Illegal job transition: {from} -> {to}")]
pub struct JobTransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Pipeline stage, each owning a disjoint slice of the job's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Transcode,
}

impl Stage {
    /// Progress sub-range `[lo, hi]` owned by this stage.
    pub fn range(&self) -> (f64, f64) {
        match self {
            Stage::Download => (0.0, 0.5),
            Stage::Transcode => (0.5, 1.0),
        }
    }

    /// Map a stage-local fraction (0-1) onto job-level progress.
    pub fn scale(&self, fraction: f64) -> f64 {
        let (lo, hi) = self.range();
        lo + (hi - lo) * fraction.clamp(0.0, 1.0)
    }
}

/// A single download-and-clip request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipJob {
    /// Unique job ID
    pub id: JobId,
    /// Source video URL
    pub url: String,
    /// Clip start (HH:MM:SS)
    pub start: String,
    /// Clip end (HH:MM:SS)
    pub end: String,
    /// Aspect-ratio crop mode
    #[serde(default)]
    pub aspect: AspectMode,
    /// Requested quality
    #[serde(default)]
    pub quality: Quality,
    /// Lifecycle status
    #[serde(default)]
    pub status: JobStatus,
    /// Job-level progress (0-1), monotonic
    #[serde(default)]
    pub progress: f64,
    /// Produced clip
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Failure message shown to the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Whether the source came from the content cache
    #[serde(default)]
    pub cache_hit: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClipJob {
    /// Create a new pending job.
    pub fn new(
        url: impl Into<String>,
        start: impl Into<String>,
        end: impl Into<String>,
        aspect: AspectMode,
        quality: Quality,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            url: url.into(),
            start: start.into(),
            end: end.into(),
            aspect,
            quality,
            status: JobStatus::Pending,
            progress: 0.0,
            output_path: None,
            error_message: None,
            cache_hit: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), JobTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(JobTransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record stage-local progress.
    ///
    /// Returns the new job-level value if it advanced; progress never moves backwards.
    pub fn set_stage_progress(&mut self, stage: Stage, fraction: f64) -> Option<f64> {
        let value = stage.scale(fraction);
        if value > self.progress {
            self.progress = value;
            self.updated_at = Utc::now();
            Some(value)
        } else {
            None
        }
    }

    /// Mark job as completed with its output file.
    pub fn complete(&mut self, output: PathBuf) -> Result<(), JobTransitionError> {
        self.transition(JobStatus::Completed)?;
        self.progress = 1.0;
        self.output_path = Some(output);
        Ok(())
    }

    /// Mark job as failed with a user-facing message.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), JobTransitionError> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(error.into());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
