//! Types for the job orchestrator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::fetcher::UrlRejection;
use crate::job::{ErrorCode, ExtractionJob, JobError, JobStatus};

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The submitted URL failed validation; nothing was persisted.
    #[error(transparent)]
    InvalidUrl(#[from] UrlRejection),

    /// An upload job points at a file that does not exist.
    #[error("staged source not found: {0}")]
    SourceMissing(PathBuf),

    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Job store error.
    #[error("job store error: {0}")]
    JobStore(#[from] JobError),
}

/// Result of submitting a job.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Created(ExtractionJob),
    /// The idempotency key was already used; this is the original job.
    Existing(ExtractionJob),
}

impl EnqueueOutcome {
    pub fn job(&self) -> &ExtractionJob {
        match self {
            EnqueueOutcome::Created(job) | EnqueueOutcome::Existing(job) => job,
        }
    }

    pub fn into_job(self) -> ExtractionJob {
        match self {
            EnqueueOutcome::Created(job) | EnqueueOutcome::Existing(job) => job,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueOutcome::Created(_))
    }
}

/// How one `process` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed { recipe_id: String },
    Failed { code: ErrorCode, message: String },
    Cancelled,
    /// Another writer (the reaper, usually) finished the job first.
    Superseded { status: JobStatus },
    /// Another worker owns the job, or it is no longer pending.
    AlreadyClaimed,
    NotFound,
    /// The job store failed; the job was left as it was.
    StoreError(String),
}

impl ProcessOutcome {
    /// Whether this call did any work on the job.
    pub fn was_claimed(&self) -> bool {
        !matches!(
            self,
            ProcessOutcome::AlreadyClaimed
                | ProcessOutcome::NotFound
                | ProcessOutcome::StoreError(_)
        )
    }
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the worker pool is running.
    pub running: bool,
    /// Number of worker loops.
    pub workers: usize,
    /// Jobs this process is working on right now.
    pub active_jobs: usize,
    /// Jobs waiting to be claimed.
    pub pending_count: usize,
    /// Jobs in downloading, processing or extracting, across all processes.
    pub in_progress_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_status_default() {
        let status = OrchestratorStatus::default();
        assert!(!status.running);
        assert_eq!(status.active_jobs, 0);
        assert_eq!(status.pending_count, 0);
    }

    #[test]
    fn test_process_outcome_was_claimed() {
        assert!(!ProcessOutcome::AlreadyClaimed.was_claimed());
        assert!(!ProcessOutcome::NotFound.was_claimed());
        assert!(!ProcessOutcome::StoreError("locked".to_string()).was_claimed());
        assert!(ProcessOutcome::Cancelled.was_claimed());
    }

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::JobNotFound("job-456".to_string());
        assert_eq!(err.to_string(), "job not found: job-456");

        let err = OrchestratorError::from(UrlRejection::Empty);
        assert_eq!(err.to_string(), "invalid URL: empty");
    }
}
