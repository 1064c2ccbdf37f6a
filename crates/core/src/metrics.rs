//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Job store (creations, claims, terminal transitions)
//! - Fetching and extraction (durations by outcome)
//! - Reaper (timed-out jobs, removed temp files)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Jobs
// =============================================================================

/// Jobs created by type.
pub static JOBS_CREATED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ladle_jobs_created_total", "Total extraction jobs created"),
        &["job_type"], // "url", "image", "video"
    )
    .unwrap()
});

/// Claim attempts by outcome.
pub static JOB_CLAIMS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ladle_job_claims_total", "Total claim attempts"),
        &["outcome"], // "claimed", "already_claimed", "not_found", "error"
    )
    .unwrap()
});

/// Jobs that reached a terminal status.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ladle_jobs_finished_total", "Total jobs by terminal status"),
        &["status"],
    )
    .unwrap()
});

/// Failed jobs by error code.
pub static JOB_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ladle_job_failures_total", "Total failed jobs by error code"),
        &["error_code"],
    )
    .unwrap()
});

/// URLs rejected before any subprocess ran.
pub static URL_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ladle_url_rejections_total", "Total rejected source URLs"),
        &["error_code"],
    )
    .unwrap()
});

// =============================================================================
// Fetch & extraction
// =============================================================================

/// Source fetch duration in seconds.
pub static FETCH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("ladle_fetch_duration_seconds", "Duration of source fetches")
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["outcome"], // "success", "failure", "cancelled"
    )
    .unwrap()
});

/// Extraction call duration in seconds.
pub static EXTRACTION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ladle_extraction_duration_seconds",
            "Duration of recipe extraction calls",
        )
        .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 180.0, 300.0]),
        &["outcome"],
    )
    .unwrap()
});

// =============================================================================
// Reaper
// =============================================================================

/// Jobs failed with TIMEOUT by the reaper.
pub static REAPED_JOBS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("ladle_reaped_jobs_total", "Total jobs reaped as stuck").unwrap()
});

/// Orphaned temp files deleted by the reaper.
pub static TEMP_FILES_REMOVED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ladle_temp_files_removed_total",
        "Total orphaned temp files removed",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Jobs
        Box::new(JOBS_CREATED.clone()),
        Box::new(JOB_CLAIMS.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(JOB_FAILURES.clone()),
        Box::new(URL_REJECTIONS.clone()),
        // Fetch & extraction
        Box::new(FETCH_DURATION.clone()),
        Box::new(EXTRACTION_DURATION.clone()),
        // Reaper
        Box::new(REAPED_JOBS.clone()),
        Box::new(TEMP_FILES_REMOVED.clone()),
    ]
}
