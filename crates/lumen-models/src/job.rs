//! Job records and their state transitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::ProcessingOptions;

/// Progress reported as soon as the upload has been persisted.
pub const INTAKE_PROGRESS: u8 = 10;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
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

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Upload is still being received
    #[default]
    Uploading,
    /// Encoder is running (or about to)
    Processing,
    /// Output is ready for download
    Completed,
    /// Job failed; see the error message
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploading => "uploading",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// Terminal states accept no further writes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reasons a patch cannot be applied to a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobTransitionError {
    #[error("job {id} is already {status}; no further updates are accepted")]
    Terminal { id: JobId, status: JobStatus },

    #[error("job {id} cannot move from {from} back to {to}")]
    Backwards {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("output filename can only be set when job {0} completes")]
    OutputBeforeCompletion(JobId),

    #[error("job {0} cannot complete without an output filename")]
    MissingOutput(JobId),

    #[error("error message can only be set when job {0} fails")]
    ErrorWithoutFailure(JobId),
}

/// A single green-screen removal job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Progress (0-100)
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Original upload name, display only
    pub filename: String,
    /// Set exactly once, when the job completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_filename: Option<String>,
    /// Snapshot taken at intake; never changes afterwards
    pub options: ProcessingOptions,
    /// Absent for anonymous uploads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub has_watermark: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a job that is still uploading.
    pub fn new(
        id: JobId,
        filename: impl Into<String>,
        options: ProcessingOptions,
        owner_id: Option<String>,
        has_watermark: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Uploading,
            progress: 0,
            error: None,
            filename: filename.into(),
            output_filename: None,
            options,
            owner_id,
            has_watermark,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create the record written once the upload is on disk.
    pub fn intake(
        id: JobId,
        filename: impl Into<String>,
        options: ProcessingOptions,
        owner_id: Option<String>,
        has_watermark: bool,
    ) -> Self {
        let mut job = Self::new(id, filename, options, owner_id, has_watermark);
        job.status = JobStatus::Processing;
        job.progress = INTAKE_PROGRESS;
        job
    }

    /// Build a record for an upsert against an id with no existing record.
    pub fn from_patch(id: JobId, patch: JobPatch) -> Result<Self, JobTransitionError> {
        let mut job = Self::new(id, String::new(), ProcessingOptions::default(), None, false);
        job.apply(patch)?;
        Ok(job)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a partial update, enforcing the job invariants.
    ///
    /// Progress never regresses: a lower value than the current one is ignored.
    pub fn apply(&mut self, patch: JobPatch) -> Result<(), JobTransitionError> {
        if self.status.is_terminal() {
            return Err(JobTransitionError::Terminal {
                id: self.id.clone(),
                status: self.status,
            });
        }

        let next = patch.status.unwrap_or(self.status);
        if self.status == JobStatus::Processing && next == JobStatus::Uploading {
            return Err(JobTransitionError::Backwards {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        if patch.output_filename.is_some() && next != JobStatus::Completed {
            return Err(JobTransitionError::OutputBeforeCompletion(self.id.clone()));
        }
        if patch.error.is_some() && next != JobStatus::Error {
            return Err(JobTransitionError::ErrorWithoutFailure(self.id.clone()));
        }

        match next {
            JobStatus::Completed => {
                let output = patch
                    .output_filename
                    .ok_or_else(|| JobTransitionError::MissingOutput(self.id.clone()))?;
                self.output_filename = Some(output);
                self.progress = 100;
                self.error = None;
            }
            JobStatus::Error => {
                self.error = Some(
                    patch
                        .error
                        .unwrap_or_else(|| "Processing failed".to_string()),
                );
                self.progress = 0;
            }
            JobStatus::Uploading | JobStatus::Processing => {
                if let Some(progress) = patch.progress {
                    self.progress = self.progress.max(progress.min(100));
                }
            }
        }

        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Partial job update, the payload of a store upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub error: Option<String>,
    pub output_filename: Option<String>,
}

impl JobPatch {
    /// Progress update for a running job.
    pub fn progress(progress: u8) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            progress: Some(progress),
            ..Default::default()
        }
    }

    /// Terminal success.
    pub fn completed(output_filename: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            output_filename: Some(output_filename.into()),
            ..Default::default()
        }
    }

    /// Terminal failure.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            progress: Some(0),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
