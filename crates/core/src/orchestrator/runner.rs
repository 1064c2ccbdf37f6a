//! Job orchestrator implementation.
//!
//! Drives claimed jobs through the state machine:
//! downloading (fetch or locate the source), processing (assemble the
//! extraction input), extracting (call the extraction service), then a
//! terminal write. Claims are arbitrated by the job store, so any number of
//! worker loops, in this process or others, can share one queue.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::extractor::{ExtractionInput, ExtractorError, RecipeExtractor};
use crate::fetcher::{mime_for_path, validate_source_url, FetchError, Fetchers, SourceMetadata};
use crate::job::{
    ClaimOutcome, CreateJobRequest, ErrorCode, ExtractionJob, JobError, JobFilter, JobStatus,
    JobStore, TransitionOutcome,
};
use crate::metrics;
use crate::recipe::RecipeStore;

use super::config::OrchestratorConfig;
use super::types::{EnqueueOutcome, OrchestratorError, OrchestratorStatus, ProcessOutcome};

/// Why a job stopped before reaching its own terminal write.
enum Abort {
    Failed { code: ErrorCode, message: String },
    /// The job's token fired, or another writer made the job terminal.
    Interrupted,
}

impl Abort {
    fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Abort::Failed {
            code,
            message: message.into(),
        }
    }
}

impl From<JobError> for Abort {
    fn from(e: JobError) -> Self {
        Abort::failed(ErrorCode::Internal, e.to_string())
    }
}

/// The staged media for one job.
struct Staged {
    path: PathBuf,
    mime_type: String,
    /// Set when this process downloaded the file and must delete it.
    fetched: bool,
    thumbnail_url: Option<String>,
    metadata: Option<SourceMetadata>,
}

/// Collaborators shared by every worker loop.
#[derive(Clone)]
struct Pipeline {
    store: Arc<dyn JobStore>,
    fetchers: Fetchers,
    extractor: Arc<dyn RecipeExtractor>,
    recipes: Arc<dyn RecipeStore>,
    /// Cancellation tokens of jobs this process is working on.
    active: Arc<RwLock<HashMap<String, CancellationToken>>>,
    cancel_check: Duration,
}

/// Trip `token` once another writer makes the job terminal.
///
/// Cancels and reaper timeouts from other processes only reach this one
/// through the store.
async fn watch_for_terminal(
    store: Arc<dyn JobStore>,
    job_id: String,
    token: CancellationToken,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match store.get(&job_id) {
            Ok(Some(job)) if job.is_terminal() => {
                info!("Job {} became {} elsewhere, aborting in-flight work", job_id, job.status);
                token.cancel();
                return;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!("Job {} disappeared while processing", job_id);
                token.cancel();
                return;
            }
            Err(e) => debug!("Could not re-read job {}: {}", job_id, e),
        }
    }
}

impl Pipeline {
    async fn process(&self, job_id: &str, shutdown: &CancellationToken) -> ProcessOutcome {
        let claim = match self.store.claim(job_id) {
            Ok(claim) => claim,
            Err(e) => {
                error!("Failed to claim job {}: {}", job_id, e);
                metrics::JOB_CLAIMS.with_label_values(&["error"]).inc();
                return ProcessOutcome::StoreError(e.to_string());
            }
        };
        metrics::JOB_CLAIMS.with_label_values(&[claim.label()]).inc();

        let job = match claim {
            ClaimOutcome::Claimed(job) => job,
            ClaimOutcome::AlreadyClaimed => {
                debug!("Job {} already claimed", job_id);
                return ProcessOutcome::AlreadyClaimed;
            }
            ClaimOutcome::NotFound => return ProcessOutcome::NotFound,
        };
        info!("Claimed job {} ({} for user {})", job.id, job.job_type, job.user_id);

        let token = shutdown.child_token();
        self.active
            .write()
            .await
            .insert(job.id.clone(), token.clone());

        // A cancel that landed between the claim and the registration above
        // found no token to trip.
        if let Ok(Some(current)) = self.store.get(&job.id) {
            if current.is_terminal() {
                token.cancel();
            }
        }

        let watcher = tokio::spawn(watch_for_terminal(
            self.store.clone(),
            job.id.clone(),
            token.clone(),
            self.cancel_check,
        ));

        let mut staged = None;
        let result = self.run(&job, &token, &mut staged).await;
        watcher.abort();
        let outcome = self.finish(&job, result);

        self.active.write().await.remove(&job.id);
        if let Some(staged) = staged.filter(|s| s.fetched) {
            match tokio::fs::remove_file(&staged.path).await {
                Ok(()) => debug!("Removed media {:?} for job {}", staged.path, job.id),
                Err(e) => debug!("Could not remove media {:?}: {}", staged.path, e),
            }
        }
        outcome
    }

    /// Write the terminal status for a finished run.
    fn finish(&self, job: &ExtractionJob, result: Result<String, Abort>) -> ProcessOutcome {
        let write = match &result {
            Ok(recipe_id) => self.store.mark_completed(&job.id, recipe_id),
            Err(Abort::Failed { code, message }) => self.store.mark_failed(&job.id, *code, message),
            Err(Abort::Interrupted) => self.store.mark_failed(
                &job.id,
                ErrorCode::Internal,
                "Worker stopped before the job finished",
            ),
        };

        let outcome = match (write, result) {
            (Ok(TransitionOutcome::Applied), Ok(recipe_id)) => {
                info!("Job {} completed with recipe {}", job.id, recipe_id);
                ProcessOutcome::Completed { recipe_id }
            }
            (Ok(TransitionOutcome::Applied), Err(Abort::Failed { code, message })) => {
                warn!("Job {} failed ({}): {}", job.id, code, message);
                ProcessOutcome::Failed { code, message }
            }
            (Ok(TransitionOutcome::Applied), Err(Abort::Interrupted)) => {
                warn!("Job {} interrupted by shutdown", job.id);
                ProcessOutcome::Failed {
                    code: ErrorCode::Internal,
                    message: "Worker stopped before the job finished".to_string(),
                }
            }
            (Ok(TransitionOutcome::Rejected { current }), _) => {
                info!("Job {} was already {} when the worker finished", job.id, current);
                // Counted by whoever made the winning write.
                return if current == JobStatus::Cancelled {
                    ProcessOutcome::Cancelled
                } else {
                    ProcessOutcome::Superseded { status: current }
                };
            }
            (Ok(TransitionOutcome::NotFound), _) => {
                warn!("Job {} disappeared while processing", job.id);
                return ProcessOutcome::NotFound;
            }
            (Err(e), _) => {
                // Left active; the reaper will fail it once it is old enough.
                error!("Failed to record outcome of job {}: {}", job.id, e);
                return ProcessOutcome::Failed {
                    code: ErrorCode::Internal,
                    message: e.to_string(),
                };
            }
        };

        match &outcome {
            ProcessOutcome::Completed { .. } => {
                metrics::JOBS_FINISHED.with_label_values(&["completed"]).inc();
            }
            ProcessOutcome::Failed { code, .. } => {
                metrics::JOBS_FINISHED.with_label_values(&["failed"]).inc();
                metrics::JOB_FAILURES.with_label_values(&[code.as_str()]).inc();
            }
            _ => {}
        }
        outcome
    }

    /// Advisory progress write. Stops the job if it became terminal.
    fn advance(
        &self,
        job: &ExtractionJob,
        status: JobStatus,
        progress: u8,
        message: &str,
    ) -> Result<(), Abort> {
        match self.store.update_progress(&job.id, status, progress, message)? {
            TransitionOutcome::Applied => {
                debug!("Job {} -> {} ({}%): {}", job.id, status, progress, message);
                Ok(())
            }
            TransitionOutcome::Rejected { current } if current.is_terminal() => {
                Err(Abort::Interrupted)
            }
            TransitionOutcome::Rejected { current } => {
                debug!("Job {} stays {} instead of {}", job.id, current, status);
                Ok(())
            }
            TransitionOutcome::NotFound => Err(Abort::Interrupted),
        }
    }

    async fn run(
        &self,
        job: &ExtractionJob,
        token: &CancellationToken,
        staged: &mut Option<Staged>,
    ) -> Result<String, Abort> {
        let media = if job.job_type.is_remote() {
            self.fetch_remote(job, token).await?
        } else {
            self.locate_upload(job)?
        };
        let staged = staged.insert(media);

        if token.is_cancelled() {
            return Err(Abort::Interrupted);
        }

        self.advance(job, JobStatus::Processing, 40, "Preparing media")?;
        let input = ExtractionInput {
            job_id: job.id.clone(),
            user_id: job.user_id.clone(),
            job_type: job.job_type,
            media_path: staged.path.clone(),
            mime_type: staged.mime_type.clone(),
            source_url: job.source_url.clone(),
            metadata: staged.metadata.clone(),
            thumbnail_url: staged.thumbnail_url.clone(),
        };

        self.advance(job, JobStatus::Extracting, 60, "Extracting recipe")?;
        let start = Instant::now();
        let result = self.extractor.extract(&input, token).await;
        let label = match &result {
            Ok(_) => "success",
            Err(ExtractorError::Cancelled) => "cancelled",
            Err(ExtractorError::NoRecipe(_)) => "no_recipe",
            Err(_) => "failure",
        };
        metrics::EXTRACTION_DURATION
            .with_label_values(&[label])
            .observe(start.elapsed().as_secs_f64());

        let mut recipe = match result {
            Ok(recipe) => recipe,
            Err(_) if token.is_cancelled() => return Err(Abort::Interrupted),
            Err(e) if e.is_cancelled() => return Err(Abort::Interrupted),
            Err(e) => return Err(Abort::failed(e.error_code(), e.to_string())),
        };
        if recipe.thumbnail_url.is_none() {
            recipe.thumbnail_url = staged.thumbnail_url.clone();
        }

        self.advance(job, JobStatus::Extracting, 90, "Saving recipe")?;
        let stored = self
            .recipes
            .save(&job.id, &job.user_id, &recipe)
            .map_err(|e| Abort::failed(ErrorCode::Internal, format!("failed to save recipe: {}", e)))?;
        Ok(stored.id)
    }

    async fn fetch_remote(
        &self,
        job: &ExtractionJob,
        token: &CancellationToken,
    ) -> Result<Staged, Abort> {
        let url = job.source_url.as_deref().unwrap_or_default();
        let validated = validate_source_url(url).map_err(|rejection| {
            metrics::URL_REJECTIONS
                .with_label_values(&[rejection.error_code().as_str()])
                .inc();
            Abort::failed(rejection.error_code(), rejection.to_string())
        })?;

        let platform = validated.platform();
        let fetcher = self.fetchers.for_platform(platform);
        if !fetcher.is_configured().await {
            return Err(Abort::failed(
                ErrorCode::CredentialsNotConfigured,
                format!("No session credentials configured for {}", platform),
            ));
        }

        self.advance(
            job,
            JobStatus::Downloading,
            10,
            &format!("Downloading from {}", platform),
        )?;

        // Metadata is best-effort; the download decides the outcome.
        let (fetched, probed) = tokio::join!(
            fetcher.fetch(validated.as_str(), &job.id, token),
            fetcher.probe(validated.as_str(), token)
        );
        let metadata = match probed {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                debug!("Metadata probe for job {} failed: {}", job.id, e);
                None
            }
        };

        let media = match fetched {
            Ok(media) => media,
            Err(FetchError::Cancelled) => return Err(Abort::Interrupted),
            Err(_) if token.is_cancelled() => return Err(Abort::Interrupted),
            Err(e) => return Err(Abort::failed(e.error_code(), e.to_string())),
        };

        let staged = Staged {
            path: media.media_path,
            mime_type: media.mime_type,
            fetched: true,
            thumbnail_url: media.thumbnail_url,
            metadata,
        };
        match self
            .store
            .record_artifact(&job.id, &staged.path, &staged.mime_type)
        {
            Ok(TransitionOutcome::Applied) => {}
            Ok(_) => {
                // Terminal already; hand the file back so it gets removed.
                let _ = tokio::fs::remove_file(&staged.path).await;
                return Err(Abort::Interrupted);
            }
            Err(e) => warn!("Failed to record artifact for job {}: {}", job.id, e),
        }
        self.advance(job, JobStatus::Downloading, 30, "Source downloaded")?;
        Ok(staged)
    }

    fn locate_upload(&self, job: &ExtractionJob) -> Result<Staged, Abort> {
        let Some(path) = job.source_path.clone() else {
            return Err(Abort::failed(
                ErrorCode::SourceMissing,
                "upload job has no staged source",
            ));
        };
        if !path.is_file() {
            return Err(Abort::failed(
                ErrorCode::SourceMissing,
                format!("staged source {:?} not found", path),
            ));
        }
        let mime_type = job
            .mime_type
            .clone()
            .or_else(|| mime_for_path(&path).map(str::to_string))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        self.advance(job, JobStatus::Downloading, 30, "Source staged")?;
        Ok(Staged {
            path,
            mime_type,
            fetched: false,
            thumbnail_url: None,
            metadata: None,
        })
    }
}

/// The job orchestrator - claims pending jobs and drives them to completion.
pub struct JobOrchestrator {
    config: OrchestratorConfig,
    pipeline: Pipeline,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown: RwLock<CancellationToken>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        fetchers: Fetchers,
        extractor: Arc<dyn RecipeExtractor>,
        recipes: Arc<dyn RecipeStore>,
    ) -> Self {
        let cancel_check = Duration::from_millis(config.cancel_check_interval_ms.max(1));
        Self {
            config,
            pipeline: Pipeline {
                store,
                fetchers,
                extractor,
                recipes,
                active: Arc::new(RwLock::new(HashMap::new())),
                cancel_check,
            },
            running: Arc::new(AtomicBool::new(false)),
            shutdown: RwLock::new(CancellationToken::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Submit a job.
    ///
    /// URLs are validated before anything is written. Reusing an
    /// idempotency key returns the original job.
    pub async fn enqueue(
        &self,
        request: CreateJobRequest,
    ) -> Result<EnqueueOutcome, OrchestratorError> {
        if request.job_type.is_remote() {
            let url = request.source_url.as_deref().unwrap_or_default();
            if let Err(rejection) = validate_source_url(url) {
                metrics::URL_REJECTIONS
                    .with_label_values(&[rejection.error_code().as_str()])
                    .inc();
                info!("Rejected submission from {}: {}", request.user_id, rejection);
                return Err(rejection.into());
            }
        } else if let Some(path) = &request.source_path {
            if !path.is_file() {
                return Err(OrchestratorError::SourceMissing(path.clone()));
            }
        }

        let user_id = request.user_id.clone();
        match self.pipeline.store.create(request) {
            Ok(job) => {
                metrics::JOBS_CREATED
                    .with_label_values(&[job.job_type.as_str()])
                    .inc();
                info!("Enqueued {} job {} for user {}", job.job_type, job.id, job.user_id);
                Ok(EnqueueOutcome::Created(job))
            }
            Err(JobError::Conflict { existing_id }) => {
                debug!(
                    "Idempotent resubmission by {} resolved to job {}",
                    user_id, existing_id
                );
                self.pipeline
                    .store
                    .get(&existing_id)?
                    .map(EnqueueOutcome::Existing)
                    .ok_or(OrchestratorError::JobNotFound(existing_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Claim and process one job on the calling task.
    pub async fn process(&self, job_id: &str) -> ProcessOutcome {
        let shutdown = self.shutdown.read().await.clone();
        self.pipeline.process(job_id, &shutdown).await
    }

    /// Cancel a job. If this process is working on it, its fetch or
    /// extraction is aborted.
    pub async fn cancel(&self, job_id: &str) -> Result<TransitionOutcome, OrchestratorError> {
        let outcome = self.pipeline.store.mark_cancelled(job_id)?;
        match outcome {
            TransitionOutcome::Applied => {
                metrics::JOBS_FINISHED.with_label_values(&["cancelled"]).inc();
                if let Some(token) = self.pipeline.active.read().await.get(job_id) {
                    token.cancel();
                    info!("Cancelled job {} (in-flight work aborted)", job_id);
                } else {
                    info!("Cancelled job {}", job_id);
                }
            }
            TransitionOutcome::Rejected { current } => {
                debug!("Cancel of job {} ignored, already {}", job_id, current);
            }
            TransitionOutcome::NotFound => {
                return Err(OrchestratorError::JobNotFound(job_id.to_string()));
            }
        }
        Ok(outcome)
    }

    /// Start the worker pool (spawns background tasks).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        let shutdown = {
            let mut guard = self.shutdown.write().await;
            if guard.is_cancelled() {
                *guard = CancellationToken::new();
            }
            guard.clone()
        };

        info!("Starting job orchestrator with {} workers", self.config.workers);
        let mut workers = self.workers.lock().await;
        for worker in 0..self.config.workers {
            workers.push(tokio::spawn(worker_loop(
                worker,
                self.pipeline.clone(),
                self.config.clone(),
                shutdown.clone(),
            )));
        }
    }

    /// Stop the worker pool. In-flight jobs are interrupted.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping job orchestrator");
        self.shutdown.read().await.cancel();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Worker task ended abnormally: {}", e);
            }
        }
        info!("Job orchestrator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Get current orchestrator status.
    pub async fn status(&self) -> OrchestratorStatus {
        let store = &self.pipeline.store;
        let count = |status: JobStatus| match store.count(&JobFilter::new().with_status(status)) {
            Ok(n) => n as usize,
            Err(e) => {
                warn!("Failed to count {} jobs: {}", status, e);
                0
            }
        };

        OrchestratorStatus {
            running: self.is_running(),
            workers: self.config.workers,
            active_jobs: self.pipeline.active.read().await.len(),
            pending_count: count(JobStatus::Pending),
            in_progress_count: JobStatus::ACTIVE.iter().map(|s| count(*s)).sum(),
        }
    }
}

async fn worker_loop(
    worker: usize,
    pipeline: Pipeline,
    config: OrchestratorConfig,
    shutdown: CancellationToken,
) {
    debug!("Worker {} started", worker);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    while !shutdown.is_cancelled() {
        let mut worked = false;
        match pipeline.store.list_pending(config.batch_size) {
            Ok(jobs) => {
                for job in jobs {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    match pipeline.process(&job.id, &shutdown).await {
                        // Back off instead of hammering a failing store.
                        ProcessOutcome::StoreError(_) => break,
                        outcome if outcome.was_claimed() => {
                            worked = true;
                            break;
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => warn!("Worker {} could not list pending jobs: {}", worker, e),
        }

        if !worked {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
    debug!("Worker {} stopped", worker);
}
