//! Configuration for the fetcher module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the retrieval-tool based fetchers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Command used to run the retrieval tool, e.g. `["yt-dlp"]` or
    /// `["python3", "-m", "yt_dlp"]`.
    #[serde(default = "default_tool")]
    pub tool: Vec<String>,

    /// Shared directory for downloaded artifacts.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Prefix of every file this system writes into `temp_dir`.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Format selector passed with `-f`.
    #[serde(default = "default_format")]
    pub format: String,

    /// Resolution cap passed with `-S res:<n>`.
    #[serde(default = "default_max_resolution")]
    pub max_resolution: u32,

    /// Timeout for a download in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Timeout for thumbnail and metadata lookups in seconds.
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout_secs: u64,

    /// Session credentials for Instagram.
    #[serde(default)]
    pub instagram: InstagramConfig,
}

/// Credentials for the authenticated Instagram fetcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstagramConfig {
    /// Netscape-format cookie file exported from a logged-in session.
    #[serde(default)]
    pub cookies_path: Option<PathBuf>,
}

fn default_tool() -> Vec<String> {
    vec!["yt-dlp".to_string()]
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("ladle")
}

fn default_file_prefix() -> String {
    "ladle-".to_string()
}

fn default_format() -> String {
    "bv*+ba/b".to_string()
}

fn default_max_resolution() -> u32 {
    720
}

fn default_timeout() -> u64 {
    300 // 5 minutes
}

fn default_metadata_timeout() -> u64 {
    30
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            tool: default_tool(),
            temp_dir: default_temp_dir(),
            file_prefix: default_file_prefix(),
            format: default_format(),
            max_resolution: default_max_resolution(),
            timeout_secs: default_timeout(),
            metadata_timeout_secs: default_metadata_timeout(),
            instagram: InstagramConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FetcherConfig::default();
        assert_eq!(config.tool, vec!["yt-dlp".to_string()]);
        assert_eq!(config.file_prefix, "ladle-");
        assert_eq!(config.max_resolution, 720);
        assert_eq!(config.timeout_secs, 300);
        assert!(config.instagram.cookies_path.is_none());
    }

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
            tool = ["python3", "-m", "yt_dlp"]
            temp_dir = "/var/tmp/ladle"

            [instagram]
            cookies_path = "/etc/ladle/instagram.txt"
        "#;
        let config: FetcherConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.tool.len(), 3);
        assert_eq!(config.temp_dir, PathBuf::from("/var/tmp/ladle"));
        assert_eq!(config.format, "bv*+ba/b");
        assert_eq!(
            config.instagram.cookies_path,
            Some(PathBuf::from("/etc/ladle/instagram.txt"))
        );
    }
}
