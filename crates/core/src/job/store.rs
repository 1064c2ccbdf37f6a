//! Job storage trait and types.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use super::{
    ClaimOutcome, CreateJobRequest, ErrorCode, ExtractionJob, JobStatus, TransitionOutcome,
};

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// A job with the same `(user_id, idempotency_key)` already exists.
    #[error("job already exists for idempotency key (existing job {existing_id})")]
    Conflict { existing_id: String },

    /// The request itself is malformed.
    #[error("invalid job request: {0}")]
    InvalidRequest(String),

    /// A status the operation does not accept.
    #[error("invalid transition to {status}: {reason}")]
    InvalidTransition { status: JobStatus, reason: String },

    /// Persistence-layer error.
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for JobError {
    fn from(e: rusqlite::Error) -> Self {
        JobError::Database(e.to_string())
    }
}

/// Filter for querying jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub user_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            user_id: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Whether a job matches this filter (ignores pagination).
    pub fn matches(&self, job: &ExtractionJob) -> bool {
        self.status.is_none_or(|s| s == job.status)
            && self
                .user_id
                .as_deref()
                .is_none_or(|u| u == job.user_id)
    }
}

/// Validate the shape of a create request before it reaches storage.
pub(crate) fn check_create_request(request: &CreateJobRequest) -> Result<(), JobError> {
    if request.user_id.trim().is_empty() {
        return Err(JobError::InvalidRequest("user_id is empty".to_string()));
    }
    if request.job_type.is_remote() {
        if request.source_url.as_deref().is_none_or(str::is_empty) {
            return Err(JobError::InvalidRequest(
                "url jobs require a source_url".to_string(),
            ));
        }
    } else if request.source_path.is_none() {
        return Err(JobError::InvalidRequest(format!(
            "{} jobs require a staged source_path",
            request.job_type
        )));
    }
    if request
        .idempotency_key
        .as_deref()
        .is_some_and(|k| k.trim().is_empty())
    {
        return Err(JobError::InvalidRequest(
            "idempotency_key must not be blank".to_string(),
        ));
    }
    Ok(())
}

/// Reject progress updates that would perform a claim or a terminal write.
pub(crate) fn check_progress_status(status: JobStatus) -> Result<(), JobError> {
    if status.is_active() {
        return Ok(());
    }
    let reason = if status == JobStatus::Pending {
        "jobs leave pending only through claim"
    } else {
        "terminal transitions use mark_completed, mark_failed or mark_cancelled"
    };
    Err(JobError::InvalidTransition {
        status,
        reason: reason.to_string(),
    })
}

/// Durable job storage with atomic transition primitives.
///
/// Every status-changing call is a single conditional write keyed on the
/// current status. Losing a race is reported through [`ClaimOutcome`] or
/// [`TransitionOutcome`], never as an error.
pub trait JobStore: Send + Sync {
    /// Insert a new job in `pending`.
    ///
    /// Fails with [`JobError::Conflict`] when the `(user_id, idempotency_key)`
    /// pair already exists.
    fn create(&self, request: CreateJobRequest) -> Result<ExtractionJob, JobError>;

    fn get(&self, id: &str) -> Result<Option<ExtractionJob>, JobError>;

    fn find_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<ExtractionJob>, JobError>;

    fn list(&self, filter: &JobFilter) -> Result<Vec<ExtractionJob>, JobError>;

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError>;

    /// Oldest pending jobs first.
    fn list_pending(&self, limit: usize) -> Result<Vec<ExtractionJob>, JobError>;

    /// Move a job from `pending` to `downloading` and stamp `started_at`,
    /// only if it is still pending.
    fn claim(&self, id: &str) -> Result<ClaimOutcome, JobError>;

    /// Advisory status/progress update for an active job.
    ///
    /// Applies only while the job is active and `status` is not behind the
    /// current status. Progress never decreases.
    fn update_progress(
        &self,
        id: &str,
        status: JobStatus,
        progress: u8,
        message: &str,
    ) -> Result<TransitionOutcome, JobError>;

    /// Record the locally staged artifact for a non-terminal job.
    fn record_artifact(
        &self,
        id: &str,
        source_path: &Path,
        mime_type: &str,
    ) -> Result<TransitionOutcome, JobError>;

    fn mark_completed(&self, id: &str, recipe_id: &str) -> Result<TransitionOutcome, JobError>;

    fn mark_failed(
        &self,
        id: &str,
        code: ErrorCode,
        message: &str,
    ) -> Result<TransitionOutcome, JobError>;

    fn mark_cancelled(&self, id: &str) -> Result<TransitionOutcome, JobError>;

    /// Active jobs whose `started_at` is older than `max_age`.
    fn list_stuck(&self, max_age: Duration) -> Result<Vec<ExtractionJob>, JobError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobType;

    #[test]
    fn test_filter_builder() {
        let filter = JobFilter::new()
            .with_status(JobStatus::Failed)
            .with_user("alice")
            .with_limit(5)
            .with_offset(10);
        assert_eq!(filter.status, Some(JobStatus::Failed));
        assert_eq!(filter.user_id.as_deref(), Some("alice"));
        assert_eq!(filter.limit, 5);
        assert_eq!(filter.offset, 10);
    }

    #[test]
    fn test_check_create_request() {
        assert!(check_create_request(&CreateJobRequest::url("u1", "https://youtu.be/x")).is_ok());

        let mut missing_url = CreateJobRequest::url("u1", "");
        assert!(check_create_request(&missing_url).is_err());
        missing_url.source_url = None;
        assert!(check_create_request(&missing_url).is_err());

        let upload = CreateJobRequest::upload("u1", JobType::Image, "/tmp/a.jpg", "image/jpeg");
        assert!(check_create_request(&upload).is_ok());

        let mut no_path = upload.clone();
        no_path.source_path = None;
        assert!(check_create_request(&no_path).is_err());

        let blank_key = CreateJobRequest::url("u1", "https://youtu.be/x").with_idempotency_key(" ");
        assert!(check_create_request(&blank_key).is_err());

        assert!(check_create_request(&CreateJobRequest::url("", "https://youtu.be/x")).is_err());
    }

    #[test]
    fn test_check_progress_status() {
        assert!(check_progress_status(JobStatus::Processing).is_ok());
        assert!(matches!(
            check_progress_status(JobStatus::Pending),
            Err(JobError::InvalidTransition { .. })
        ));
        assert!(matches!(
            check_progress_status(JobStatus::Completed),
            Err(JobError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_conflict_display() {
        let err = JobError::Conflict {
            existing_id: "job-1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "job already exists for idempotency key (existing job job-1)"
        );
    }
}
