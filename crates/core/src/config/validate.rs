use url::Url;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - The retrieval tool command and temp file prefix are not empty
/// - Worker count, reaper timings and the fetch timeout are not 0
/// - The extraction endpoint, when set, is an http(s) URL
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Fetcher validation
    if config.fetcher.tool.iter().all(|part| part.trim().is_empty()) {
        return Err(ConfigError::ValidationError(
            "fetcher.tool cannot be empty".to_string(),
        ));
    }
    if config.fetcher.file_prefix.is_empty() {
        return Err(ConfigError::ValidationError(
            "fetcher.file_prefix cannot be empty".to_string(),
        ));
    }
    if config.fetcher.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "fetcher.timeout_secs cannot be 0".to_string(),
        ));
    }

    // Orchestrator validation
    if config.orchestrator.workers == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.workers cannot be 0".to_string(),
        ));
    }
    if config.orchestrator.cancel_check_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.cancel_check_interval_ms cannot be 0".to_string(),
        ));
    }

    // Reaper validation
    if config.reaper.interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "reaper.interval_secs cannot be 0".to_string(),
        ));
    }
    if config.reaper.max_job_age_secs == 0 {
        return Err(ConfigError::ValidationError(
            "reaper.max_job_age_secs cannot be 0".to_string(),
        ));
    }

    // Extractor validation
    if let Some(endpoint) = &config.extractor.endpoint {
        let valid = Url::parse(endpoint)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !valid {
            return Err(ConfigError::ValidationError(format!(
                "extractor.endpoint must be an http(s) URL, got {:?}",
                endpoint
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_empty_tool_fails() {
        let mut config = Config::default();
        config.fetcher.tool = vec![];
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(msg) if msg.contains("fetcher.tool")));

        config.fetcher.tool = vec!["  ".to_string()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_values_fail() {
        let mut config = Config::default();
        config.orchestrator.workers = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.orchestrator.cancel_check_interval_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.reaper.max_job_age_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.fetcher.timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.fetcher.file_prefix = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_extractor_endpoint() {
        let mut config = Config::default();
        config.extractor.endpoint = Some("https://ai.internal/v1/extract".to_string());
        assert!(validate_config(&config).is_ok());

        config.extractor.endpoint = Some("ftp://ai.internal/extract".to_string());
        assert!(validate_config(&config).is_err());

        config.extractor.endpoint = Some("not a url".to_string());
        assert!(validate_config(&config).is_err());
    }
}
