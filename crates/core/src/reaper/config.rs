//! Reaper configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the stuck-job and temp-file reaper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Active jobs older than this are failed with TIMEOUT. Temp files are
    /// removed once they are twice this old.
    #[serde(default = "default_max_job_age")]
    pub max_job_age_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}

fn default_max_job_age() -> u64 {
    900 // 15 minutes
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval(),
            max_job_age_secs: default_max_job_age(),
        }
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_job_age(&self) -> Duration {
        Duration::from_secs(self.max_job_age_secs)
    }

    /// Age after which an orphaned temp file is deleted.
    pub fn max_file_age(&self) -> Duration {
        self.max_job_age().saturating_mul(2)
    }
}
