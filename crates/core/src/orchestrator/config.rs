//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the job orchestrator's worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Enable/disable the worker pool.
    /// When disabled, jobs are only processed through explicit `process` calls.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Number of concurrent worker loops.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long an idle worker waits before polling for pending jobs again
    /// (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Pending jobs fetched per poll. Workers try to claim them in order.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How often an in-flight job re-reads its row to notice a cancel or
    /// timeout written by another process (milliseconds).
    #[serde(default = "default_cancel_check_interval")]
    pub cancel_check_interval_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    2000 // 2 seconds
}

fn default_batch_size() -> usize {
    8
}

fn default_cancel_check_interval() -> u64 {
    1000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            workers: default_workers(),
            poll_interval_ms: default_poll_interval(),
            batch_size: default_batch_size(),
            cancel_check_interval_ms: default_cancel_check_interval(),
        }
    }
}
