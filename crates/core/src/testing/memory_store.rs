//! In-memory job store for testing.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};

use crate::job::{
    ClaimOutcome, CreateJobRequest, ErrorCode, ExtractionJob, JobError, JobFilter, JobStatus,
    JobStore, TransitionOutcome,
};
use crate::job::{check_create_request, check_progress_status};

/// A [`JobStore`] held in a `Vec`, honoring the same conditional-write
/// contract as the SQLite store.
///
/// Each call holds the lock for its whole read-check-write, which gives the
/// same single-row atomicity the database provides.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<Vec<ExtractionJob>>,
    unavailable: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every store call fail with a database error, as a lost
    /// connection would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<ExtractionJob>>, JobError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(JobError::Database("database is unavailable".to_string()));
        }
        self.jobs
            .lock()
            .map_err(|_| JobError::Database("in-memory store lock poisoned".to_string()))
    }

    /// Insert a job exactly as given, bypassing creation checks.
    pub fn insert(&self, job: ExtractionJob) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.retain(|j| j.id != job.id);
            jobs.push(job);
        }
    }

    /// Pretend the job was claimed `age` ago.
    pub fn backdate_start(&self, id: &str, age: chrono::Duration) {
        if let Ok(mut jobs) = self.jobs.lock() {
            if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
                job.started_at = Some(Utc::now() - age);
            }
        }
    }

    /// Snapshot of every stored job, in insertion order.
    pub fn all(&self) -> Vec<ExtractionJob> {
        self.jobs.lock().map(|j| j.clone()).unwrap_or_default()
    }

    /// Apply `write` when `allowed` accepts the current status.
    fn transition(
        &self,
        id: &str,
        allowed: impl Fn(JobStatus) -> bool,
        write: impl FnOnce(&mut ExtractionJob),
    ) -> Result<TransitionOutcome, JobError> {
        let mut jobs = self.lock()?;
        let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if !allowed(job.status) {
            return Ok(TransitionOutcome::Rejected {
                current: job.status,
            });
        }
        write(job);
        Ok(TransitionOutcome::Applied)
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

impl JobStore for InMemoryJobStore {
    fn create(&self, request: CreateJobRequest) -> Result<ExtractionJob, JobError> {
        check_create_request(&request)?;
        let mut jobs = self.lock()?;

        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(existing) = jobs
                .iter()
                .find(|j| j.user_id == request.user_id && j.idempotency_key.as_deref() == Some(key))
            {
                return Err(JobError::Conflict {
                    existing_id: existing.id.clone(),
                });
            }
        }

        let job = ExtractionJob {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: request.user_id,
            job_type: request.job_type,
            source_url: request.source_url,
            source_path: request.source_path,
            mime_type: request.mime_type,
            status: JobStatus::Pending,
            progress: 0,
            status_message: Some("Queued".to_string()),
            result_recipe_id: None,
            error_code: None,
            error_message: None,
            idempotency_key: request.idempotency_key,
            created_at: now(),
            started_at: None,
            completed_at: None,
        };
        jobs.push(job.clone());
        Ok(job)
    }

    fn get(&self, id: &str) -> Result<Option<ExtractionJob>, JobError> {
        Ok(self.lock()?.iter().find(|j| j.id == id).cloned())
    }

    fn find_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<ExtractionJob>, JobError> {
        Ok(self
            .lock()?
            .iter()
            .find(|j| j.user_id == user_id && j.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<ExtractionJob>, JobError> {
        let jobs = self.lock()?;
        // Newest first, like the SQL store.
        Ok(jobs
            .iter()
            .rev()
            .filter(|j| filter.matches(j))
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect())
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError> {
        Ok(self.lock()?.iter().filter(|j| filter.matches(j)).count() as i64)
    }

    fn list_pending(&self, limit: usize) -> Result<Vec<ExtractionJob>, JobError> {
        Ok(self
            .lock()?
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    fn claim(&self, id: &str) -> Result<ClaimOutcome, JobError> {
        let mut jobs = self.lock()?;
        let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
            return Ok(ClaimOutcome::NotFound);
        };
        if job.status != JobStatus::Pending || job.started_at.is_some() {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        job.status = JobStatus::Downloading;
        job.started_at = Some(now());
        job.status_message = Some("Starting".to_string());
        Ok(ClaimOutcome::Claimed(job.clone()))
    }

    fn update_progress(
        &self,
        id: &str,
        status: JobStatus,
        progress: u8,
        message: &str,
    ) -> Result<TransitionOutcome, JobError> {
        check_progress_status(status)?;
        self.transition(
            id,
            |current| current.can_advance_to(status),
            |job| {
                job.status = status;
                job.progress = job.progress.max(progress.min(100));
                job.status_message = Some(message.to_string());
            },
        )
    }

    fn record_artifact(
        &self,
        id: &str,
        source_path: &Path,
        mime_type: &str,
    ) -> Result<TransitionOutcome, JobError> {
        self.transition(
            id,
            |current| !current.is_terminal(),
            |job| {
                job.source_path = Some(source_path.to_path_buf());
                job.mime_type = Some(mime_type.to_string());
            },
        )
    }

    fn mark_completed(&self, id: &str, recipe_id: &str) -> Result<TransitionOutcome, JobError> {
        self.transition(
            id,
            |current| current.is_active(),
            |job| {
                job.status = JobStatus::Completed;
                job.result_recipe_id = Some(recipe_id.to_string());
                job.progress = 100;
                job.status_message = Some("Recipe extracted".to_string());
                job.completed_at = Some(now());
            },
        )
    }

    fn mark_failed(
        &self,
        id: &str,
        code: ErrorCode,
        message: &str,
    ) -> Result<TransitionOutcome, JobError> {
        self.transition(
            id,
            |current| !current.is_terminal(),
            |job| {
                job.status = JobStatus::Failed;
                job.error_code = Some(code.as_str().to_string());
                job.error_message = Some(message.to_string());
                job.status_message = Some("Failed".to_string());
                job.completed_at = Some(now());
            },
        )
    }

    fn mark_cancelled(&self, id: &str) -> Result<TransitionOutcome, JobError> {
        self.transition(
            id,
            |current| !current.is_terminal(),
            |job| {
                job.status = JobStatus::Cancelled;
                job.status_message = Some("Cancelled".to_string());
                job.completed_at = Some(now());
            },
        )
    }

    fn list_stuck(&self, max_age: Duration) -> Result<Vec<ExtractionJob>, JobError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| JobError::InvalidRequest(format!("max_age out of range: {}", e)))?;
        let cutoff = Utc::now() - max_age;
        let mut stuck: Vec<ExtractionJob> = self
            .lock()?
            .iter()
            .filter(|j| j.status.is_active() && j.started_at.is_some_and(|s| s < cutoff))
            .cloned()
            .collect();
        stuck.sort_by_key(|j| j.started_at);
        Ok(stuck)
    }
}
