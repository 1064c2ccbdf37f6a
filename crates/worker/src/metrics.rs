//! Prometheus metrics for the daemon.
//!
//! Core counters live in `ladle_core::metrics`; this module adds gauges that
//! are sampled from the job store and owns the registry.

use once_cell::sync::Lazy;
use prometheus::{self, Encoder, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::warn;

use ladle_core::job::JobFilter;
use ladle_core::{JobStatus, JobStore};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Jobs by current status (collected dynamically).
pub static JOBS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("ladle_jobs_by_status", "Current job count by status"),
        &["status"],
    )
    .unwrap()
});

const STATUSES: [JobStatus; 7] = [
    JobStatus::Pending,
    JobStatus::Downloading,
    JobStatus::Processing,
    JobStatus::Extracting,
    JobStatus::Completed,
    JobStatus::Failed,
    JobStatus::Cancelled,
];

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(JOBS_BY_STATUS.clone()))
        .unwrap();

    // Core metrics (jobs, fetcher, extractor, reaper)
    for metric in ladle_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Refresh the per-status job gauges from the store.
pub fn collect_job_metrics(store: &dyn JobStore) {
    for status in STATUSES {
        match store.count(&JobFilter::new().with_status(status)) {
            Ok(count) => JOBS_BY_STATUS
                .with_label_values(&[status.as_str()])
                .set(count),
            Err(e) => warn!("Failed to count {} jobs: {}", status, e),
        }
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
