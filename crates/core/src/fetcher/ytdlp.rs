//! yt-dlp based fetcher implementation.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::FetcherConfig;
use super::error::FetchError;
use super::output::{find_artifacts, mime_for_path, remove_artifacts, select_media};
use super::process::run_tool;
use super::traits::{FetchedMedia, SourceFetcher, SourceMetadata};
use super::validate::validate_source_url;
use crate::metrics;

/// Fetcher that shells out to yt-dlp (or a compatible tool).
pub struct YtDlpFetcher {
    config: FetcherConfig,
    cookies: Option<PathBuf>,
}

impl YtDlpFetcher {
    /// Creates a new fetcher with the given configuration.
    pub fn new(config: FetcherConfig) -> Self {
        Self {
            config,
            cookies: None,
        }
    }

    /// Creates a fetcher with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(FetcherConfig::default())
    }

    /// Pass a Netscape cookie file to every invocation.
    pub fn with_cookies(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookies = Some(path.into());
        self
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Unique base name for one fetch: `<prefix><job>-<random>`.
    fn base_name(&self, job_id: &str) -> String {
        let job: String = job_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .take(64)
            .collect();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        format!("{}{}-{}", self.config.file_prefix, job, &nonce[..12])
    }

    fn cookie_args(&self) -> Vec<String> {
        match &self.cookies {
            Some(path) => vec![
                "--cookies".to_string(),
                path.to_string_lossy().to_string(),
            ],
            None => Vec::new(),
        }
    }

    /// Arguments for the download invocation.
    pub(crate) fn build_download_args(&self, url: &str, output_template: &Path) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            self.config.format.clone(),
            "-S".to_string(),
            format!("res:{}", self.config.max_resolution),
            "--force-overwrites".to_string(),
            "--no-playlist".to_string(),
        ];
        args.extend(self.cookie_args());
        args.extend([
            "-o".to_string(),
            output_template.to_string_lossy().to_string(),
            url.to_string(),
        ]);
        args
    }

    /// Arguments for the thumbnail lookup.
    pub(crate) fn build_thumbnail_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--get-thumbnail".to_string(),
            "--no-playlist".to_string(),
            "--skip-download".to_string(),
        ];
        args.extend(self.cookie_args());
        args.push(url.to_string());
        args
    }

    /// Arguments for the metadata lookup.
    pub(crate) fn build_probe_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--skip-download".to_string(),
        ];
        args.extend(self.cookie_args());
        args.push(url.to_string());
        args
    }

    fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.config.metadata_timeout_secs)
    }

    /// Best-effort thumbnail lookup. Never fails the fetch.
    async fn thumbnail(&self, url: &str, cancel: &CancellationToken) -> Option<String> {
        let args = self.build_thumbnail_args(url);
        match run_tool(&self.config.tool, &args, self.metadata_timeout(), cancel).await {
            Ok(output) if output.status.success() => output
                .stdout
                .lines()
                .map(str::trim)
                .find(|line| line.starts_with("https://") || line.starts_with("http://"))
                .map(str::to_string),
            Ok(output) => {
                debug!(
                    "Thumbnail lookup exited with {:?}: {}",
                    output.status.code(),
                    output.diagnostic().trim()
                );
                None
            }
            Err(e) => {
                debug!("Thumbnail lookup failed: {}", e);
                None
            }
        }
    }

    /// Parses `--dump-json` output into SourceMetadata.
    fn parse_probe_output(output: &str) -> Result<SourceMetadata, FetchError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            title: Option<String>,
            description: Option<String>,
            uploader: Option<String>,
            duration: Option<f64>,
            thumbnail: Option<String>,
            webpage_url: Option<String>,
        }

        // One JSON document per line; --no-playlist means there is only one.
        let line = output
            .lines()
            .find(|l| l.trim_start().starts_with('{'))
            .ok_or_else(|| FetchError::ParseError {
                reason: "no JSON document in tool output".to_string(),
            })?;

        let probe: ProbeOutput =
            serde_json::from_str(line).map_err(|e| FetchError::ParseError {
                reason: format!("failed to parse metadata: {}", e),
            })?;

        Ok(SourceMetadata {
            title: probe.title,
            description: probe.description.filter(|d| !d.trim().is_empty()),
            uploader: probe.uploader,
            duration_secs: probe.duration,
            thumbnail: probe.thumbnail,
            webpage_url: probe.webpage_url,
        })
    }

    async fn run_download(
        &self,
        url: &str,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedMedia, FetchError> {
        let temp_dir = &self.config.temp_dir;
        tokio::fs::create_dir_all(temp_dir).await?;

        let base_name = self.base_name(job_id);
        let template = temp_dir.join(format!("{}.%(ext)s", base_name));
        let args = self.build_download_args(url, &template);
        let timeout = Duration::from_secs(self.config.timeout_secs);

        info!("Fetching {} for job {} into {}", url, job_id, base_name);

        let output = match run_tool(&self.config.tool, &args, timeout, cancel).await {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                let removed = remove_artifacts(temp_dir, &base_name, None).await;
                warn!(
                    "Retrieval tool failed for job {} (exit {:?}), removed {} partial files",
                    job_id,
                    output.status.code(),
                    removed
                );
                return Err(FetchError::tool_failed(
                    output.status.code(),
                    output.diagnostic(),
                ));
            }
            Err(e) => {
                let removed = remove_artifacts(temp_dir, &base_name, None).await;
                warn!(
                    "Fetch for job {} aborted: {} (removed {} partial files)",
                    job_id, e, removed
                );
                return Err(e);
            }
        };
        debug!("Retrieval tool output for job {}: {}", job_id, output.stdout.trim());

        let artifacts = find_artifacts(temp_dir, &base_name);
        let Some(media_path) = select_media(&artifacts) else {
            remove_artifacts(temp_dir, &base_name, None).await;
            return Err(FetchError::OutputMissing { base_name });
        };
        // Co-downloaded thumbnails and leftovers are not needed past this point.
        remove_artifacts(temp_dir, &base_name, Some(&media_path)).await;

        let mime_type = mime_for_path(&media_path)
            .unwrap_or("application/octet-stream")
            .to_string();

        Ok(FetchedMedia {
            media_path,
            mime_type,
            thumbnail_url: None,
        })
    }
}

#[async_trait]
impl SourceFetcher for YtDlpFetcher {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn fetch(
        &self,
        url: &str,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedMedia, FetchError> {
        let validated = validate_source_url(url)?;
        let start = Instant::now();

        let result = self.run_download(validated.as_str(), job_id, cancel).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(FetchError::Cancelled) => "cancelled",
            Err(_) => "failure",
        };
        metrics::FETCH_DURATION
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());

        let mut media = result?;
        media.thumbnail_url = self.thumbnail(validated.as_str(), cancel).await;

        if cancel.is_cancelled() {
            let _ = tokio::fs::remove_file(&media.media_path).await;
            return Err(FetchError::Cancelled);
        }

        info!(
            "Fetched {:?} ({}) for job {}",
            media.media_path, media.mime_type, job_id
        );
        Ok(media)
    }

    async fn probe(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<SourceMetadata, FetchError> {
        let validated = validate_source_url(url)?;
        let args = self.build_probe_args(validated.as_str());
        let output = run_tool(&self.config.tool, &args, self.metadata_timeout(), cancel).await?;
        if !output.status.success() {
            return Err(FetchError::tool_failed(
                output.status.code(),
                output.diagnostic(),
            ));
        }
        Self::parse_probe_output(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> YtDlpFetcher {
        YtDlpFetcher::new(FetcherConfig {
            temp_dir: PathBuf::from("/tmp/ladle-test"),
            ..Default::default()
        })
    }

    #[test]
    fn test_download_args_exact_flags() {
        let args = fetcher().build_download_args(
            "https://youtu.be/abc",
            Path::new("/tmp/ladle-test/ladle-j-1.%(ext)s"),
        );
        assert_eq!(
            args,
            vec![
                "-f",
                "bv*+ba/b",
                "-S",
                "res:720",
                "--force-overwrites",
                "--no-playlist",
                "-o",
                "/tmp/ladle-test/ladle-j-1.%(ext)s",
                "https://youtu.be/abc",
            ]
        );
    }

    #[test]
    fn test_cookie_args_precede_output() {
        let args = fetcher()
            .with_cookies("/etc/cookies.txt")
            .build_download_args("https://instagram.com/reel/x/", Path::new("/t/o.%(ext)s"));
        let cookies = args.iter().position(|a| a == "--cookies").unwrap();
        let output = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[cookies + 1], "/etc/cookies.txt");
        assert!(cookies < output);
        assert_eq!(args.last().unwrap(), "https://instagram.com/reel/x/");
    }

    #[test]
    fn test_metadata_args() {
        let f = fetcher();
        assert_eq!(
            f.build_thumbnail_args("https://youtu.be/abc"),
            vec!["--get-thumbnail", "--no-playlist", "--skip-download", "https://youtu.be/abc"]
        );
        assert_eq!(
            f.build_probe_args("https://youtu.be/abc")[0],
            "--dump-json".to_string()
        );
    }

    #[test]
    fn test_base_name_is_unique_and_sanitized() {
        let f = fetcher();
        let a = f.base_name("job/../1");
        let b = f.base_name("job/../1");
        assert_ne!(a, b);
        assert!(a.starts_with("ladle-job1-"));
        assert!(!a.contains('/'));
        assert!(!a.contains('.'));
    }

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{"title": "Crispy Tofu", "description": "1 block tofu\n2 tbsp cornstarch", "uploader": "chef", "duration": 61.5, "thumbnail": "https://i.ytimg.com/vi/abc/hq.jpg", "webpage_url": "https://www.youtube.com/watch?v=abc"}"#;
        let output = format!("WARNING: something\n{}\n", json);
        let meta = YtDlpFetcher::parse_probe_output(&output).unwrap();
        assert_eq!(meta.title.as_deref(), Some("Crispy Tofu"));
        assert_eq!(meta.duration_secs, Some(61.5));
        assert!(meta.description.unwrap().contains("cornstarch"));
    }

    #[test]
    fn test_parse_probe_output_without_json() {
        assert!(matches!(
            YtDlpFetcher::parse_probe_output("ERROR: nope"),
            Err(FetchError::ParseError { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_rejects_invalid_url_without_spawning() {
        let f = YtDlpFetcher::new(FetcherConfig {
            tool: vec!["/nonexistent/tool".to_string()],
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let err = f
            .fetch("https://youtube.com/;rm -rf /", "job-1", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }
}
