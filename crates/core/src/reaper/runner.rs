//! Periodic recovery of abandoned jobs and orphaned temp files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use glob::Pattern;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::ReaperConfig;
use crate::job::{ErrorCode, JobStore, TransitionOutcome};
use crate::metrics;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    /// Jobs failed with TIMEOUT.
    pub jobs_reaped: usize,
    /// Stuck jobs that reached a terminal status before the write landed.
    pub jobs_skipped: usize,
    pub files_removed: usize,
    /// Individual actions that failed; retried on the next tick.
    pub errors: usize,
}

/// Fails jobs that outlived the maximum age and deletes stale temp files.
///
/// The reaper is the only component that declares a job dead. Workers never
/// time out their own jobs.
pub struct Reaper {
    config: ReaperConfig,
    store: Arc<dyn JobStore>,
    temp_dir: PathBuf,
    file_prefix: String,
}

impl Reaper {
    pub fn new(
        config: ReaperConfig,
        store: Arc<dyn JobStore>,
        temp_dir: impl Into<PathBuf>,
        file_prefix: impl Into<String>,
    ) -> Self {
        Self {
            config,
            store,
            temp_dir: temp_dir.into(),
            file_prefix: file_prefix.into(),
        }
    }

    /// Run ticks every `interval_secs` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Reaper started (interval {}s, max job age {}s, temp dir {:?})",
            self.config.interval_secs, self.config.max_job_age_secs, self.temp_dir
        );

        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let report = self.tick(&cancel).await;
                    if report != ReapReport::default() {
                        info!(
                            "Reaper tick: {} jobs reaped, {} skipped, {} files removed, {} errors",
                            report.jobs_reaped, report.jobs_skipped, report.files_removed, report.errors
                        );
                    }
                }
            }
        }

        info!("Reaper stopped");
    }

    /// One sweep of jobs and temp files. The two sweeps run concurrently and
    /// neither one's failure affects the other.
    pub async fn tick(&self, cancel: &CancellationToken) -> ReapReport {
        let (jobs, files) = tokio::join!(self.sweep_jobs(cancel), self.sweep_temp_files(cancel));
        ReapReport {
            jobs_reaped: jobs.jobs_reaped,
            jobs_skipped: jobs.jobs_skipped,
            files_removed: files.files_removed,
            errors: jobs.errors + files.errors,
        }
    }

    async fn sweep_jobs(&self, cancel: &CancellationToken) -> ReapReport {
        let mut report = ReapReport::default();
        let max_age = self.config.max_job_age();

        let stuck = match self.store.list_stuck(max_age) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Reaper could not list stuck jobs: {}", e);
                report.errors += 1;
                return report;
            }
        };

        let message = format!(
            "Job exceeded the maximum age of {} seconds",
            self.config.max_job_age_secs
        );

        for job in stuck {
            if cancel.is_cancelled() {
                debug!("Reaper job sweep cancelled");
                break;
            }
            match self.store.mark_failed(&job.id, ErrorCode::Timeout, &message) {
                Ok(TransitionOutcome::Applied) => {
                    warn!(
                        "Reaped job {} (status {}, started at {:?})",
                        job.id, job.status, job.started_at
                    );
                    metrics::REAPED_JOBS.inc();
                    metrics::JOBS_FINISHED.with_label_values(&["failed"]).inc();
                    metrics::JOB_FAILURES
                        .with_label_values(&[ErrorCode::Timeout.as_str()])
                        .inc();
                    report.jobs_reaped += 1;
                }
                Ok(outcome) => {
                    debug!("Stuck job {} finished before reaping: {:?}", job.id, outcome);
                    report.jobs_skipped += 1;
                }
                Err(e) => {
                    warn!("Failed to reap job {}: {}", job.id, e);
                    report.errors += 1;
                }
            }
        }
        report
    }

    fn temp_pattern(&self) -> String {
        format!(
            "{}/{}*",
            Pattern::escape(&self.temp_dir.to_string_lossy()).trim_end_matches('/'),
            Pattern::escape(&self.file_prefix)
        )
    }

    async fn sweep_temp_files(&self, cancel: &CancellationToken) -> ReapReport {
        let mut report = ReapReport::default();
        let max_age = self.config.max_file_age();
        let pattern = self.temp_pattern();

        let paths: Vec<PathBuf> = match glob::glob(&pattern) {
            Ok(paths) => paths
                .filter_map(|entry| match entry {
                    Ok(path) => Some(path),
                    Err(e) => {
                        debug!("Unreadable temp entry: {}", e);
                        None
                    }
                })
                .collect(),
            Err(e) => {
                warn!("Invalid temp file pattern {}: {}", pattern, e);
                report.errors += 1;
                return report;
            }
        };

        let now = SystemTime::now();
        for path in paths {
            if cancel.is_cancelled() {
                debug!("Reaper temp sweep cancelled");
                break;
            }
            match remove_if_stale(&path, now, max_age).await {
                Ok(true) => {
                    info!("Removed orphaned temp file {:?}", path);
                    metrics::TEMP_FILES_REMOVED.inc();
                    report.files_removed += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to remove temp file {:?}: {}", path, e);
                    report.errors += 1;
                }
            }
        }
        report
    }
}

/// Delete `path` when it is a regular file last modified more than `max_age` ago.
async fn remove_if_stale(path: &Path, now: SystemTime, max_age: Duration) -> std::io::Result<bool> {
    let metadata = tokio::fs::symlink_metadata(path).await?;
    if !metadata.is_file() {
        return Ok(false);
    }
    let age = now
        .duration_since(metadata.modified()?)
        .unwrap_or(Duration::ZERO);
    if age <= max_age {
        return Ok(false);
    }
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        // Another reaper or the owning job got there first.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::testing::{fixtures, InMemoryJobStore};

    fn reaper(store: Arc<InMemoryJobStore>, dir: &Path) -> Reaper {
        Reaper::new(
            ReaperConfig {
                enabled: true,
                interval_secs: 1,
                max_job_age_secs: 600,
            },
            store,
            dir,
            "ladle-",
        )
    }

    fn age_file(path: &Path, age: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn test_tick_reaps_old_jobs_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryJobStore::new());

        let old = store.create(fixtures::url_request("user-1")).unwrap();
        let young = store.create(fixtures::url_request("user-1")).unwrap();
        for job in [&old, &young] {
            store.claim(&job.id).unwrap();
            store
                .update_progress(&job.id, JobStatus::Processing, 30, "Processing")
                .unwrap();
        }
        store.backdate_start(&old.id, chrono::Duration::seconds(1200));
        store.backdate_start(&young.id, chrono::Duration::seconds(300));

        let report = reaper(store.clone(), dir.path())
            .tick(&CancellationToken::new())
            .await;
        assert_eq!(report.jobs_reaped, 1);

        let old = store.get(&old.id).unwrap().unwrap();
        assert_eq!(old.status, JobStatus::Failed);
        assert_eq!(old.error_code.as_deref(), Some("TIMEOUT"));
        let young = store.get(&young.id).unwrap().unwrap();
        assert_eq!(young.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_tick_ignores_pending_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        let job = store.create(fixtures::url_request("user-1")).unwrap();

        let report = reaper(store.clone(), dir.path())
            .tick(&CancellationToken::new())
            .await;
        assert_eq!(report.jobs_reaped, 0);
        assert_eq!(
            store.get(&job.id).unwrap().unwrap().status,
            JobStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_temp_sweep_respects_prefix_and_age() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryJobStore::new());

        let stale = dir.path().join("ladle-job1-abc.mp4");
        let fresh = dir.path().join("ladle-job2-def.mp4");
        let foreign = dir.path().join("other-file.mp4");
        for path in [&stale, &fresh, &foreign] {
            std::fs::write(path, b"x").unwrap();
        }
        age_file(&stale, Duration::from_secs(1300));
        age_file(&fresh, Duration::from_secs(1100));
        age_file(&foreign, Duration::from_secs(5000));

        let report = reaper(store, dir.path())
            .tick(&CancellationToken::new())
            .await;
        assert_eq!(report.files_removed, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(foreign.exists());
    }

    #[tokio::test]
    async fn test_cancelled_tick_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        let job = store.create(fixtures::url_request("user-1")).unwrap();
        store.claim(&job.id).unwrap();
        store.backdate_start(&job.id, chrono::Duration::seconds(5000));
        let stale = dir.path().join("ladle-old.mp4");
        std::fs::write(&stale, b"x").unwrap();
        age_file(&stale, Duration::from_secs(5000));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = reaper(store.clone(), dir.path()).tick(&cancel).await;

        assert_eq!(report, ReapReport::default());
        assert!(stale.exists());
        assert!(store.get(&job.id).unwrap().unwrap().status.is_active());
    }

    #[tokio::test]
    async fn test_run_exits_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        let reaper = reaper(store, dir.path());
        let cancel = CancellationToken::new();

        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trip.cancel();
        });
        tokio::time::timeout(Duration::from_secs(5), reaper.run(cancel))
            .await
            .unwrap();
    }

    #[test]
    fn test_temp_pattern_is_escaped() {
        let store = Arc::new(InMemoryJobStore::new());
        let reaper = Reaper::new(ReaperConfig::default(), store, "/tmp/[x]/", "ladle-");
        assert_eq!(reaper.temp_pattern(), "/tmp/[[]x[]]/ladle-*");
    }
}
