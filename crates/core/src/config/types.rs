use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::extractor::ExtractorConfig;
use crate::fetcher::FetcherConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::reaper::ReaperConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("ladle.db")
}

/// Config safe to log (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub database: DatabaseConfig,
    pub fetcher: SanitizedFetcherConfig,
    pub extractor: SanitizedExtractorConfig,
    pub orchestrator: OrchestratorConfig,
    pub reaper: ReaperConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedFetcherConfig {
    pub tool: Vec<String>,
    pub temp_dir: PathBuf,
    pub file_prefix: String,
    pub timeout_secs: u64,
    pub instagram_cookies_configured: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedExtractorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub api_key: &'static str,
    pub timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            database: config.database.clone(),
            fetcher: SanitizedFetcherConfig {
                tool: config.fetcher.tool.clone(),
                temp_dir: config.fetcher.temp_dir.clone(),
                file_prefix: config.fetcher.file_prefix.clone(),
                timeout_secs: config.fetcher.timeout_secs,
                instagram_cookies_configured: config.fetcher.instagram.cookies_path.is_some(),
            },
            extractor: SanitizedExtractorConfig {
                endpoint: config.extractor.endpoint.clone(),
                api_key: if config.extractor.api_key.is_some() {
                    "[REDACTED]"
                } else {
                    "[NOT SET]"
                },
                timeout_secs: config.extractor.timeout_secs,
            },
            orchestrator: config.orchestrator.clone(),
            reaper: config.reaper.clone(),
        }
    }
}
