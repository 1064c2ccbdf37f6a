//! Cookie-authenticated fetcher for platforms that gate content behind a login.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::FetcherConfig;
use super::error::{truncate_diagnostic, FetchError};
use super::traits::{FetchedMedia, SourceFetcher, SourceMetadata};
use super::validate::validate_source_url;
use super::ytdlp::YtDlpFetcher;

/// Phrases the tool prints when the session is no longer accepted.
const CREDENTIAL_MARKERS: &[&str] = &[
    "login required",
    "please log in",
    "need to log in",
    "must be logged in",
    "cookies are no longer valid",
    "session expired",
    "checkpoint required",
];

/// Throttling. The session is fine; a later retry can succeed.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate-limit reached",
    "rate limit",
    "too many requests",
    "please wait a few minutes",
];

/// Phrases the tool prints when the content itself cannot be served.
const CONTENT_MARKERS: &[&str] = &[
    "private",
    "not available",
    "unavailable",
    "has been removed",
    "does not exist",
    "no video formats found",
    "restricted",
];

static HTTP_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"HTTP Error (\d{3})").unwrap());

/// Does the file look like a non-empty Netscape cookie jar?
async fn cookie_file_usable(path: &Path) -> Result<(), String> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("cannot read cookie file {:?}: {}", path, e))?;

    let has_cookie = contents
        .lines()
        .map(|l| l.strip_prefix("#HttpOnly_").unwrap_or(l))
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .any(|l| l.split('\t').count() == 7);

    if has_cookie {
        Ok(())
    } else {
        Err(format!("cookie file {:?} holds no Netscape cookies", path))
    }
}

/// Map a tool failure onto the credential or content taxonomy.
///
/// Rate limiting stays a plain tool failure. Credential markers win over
/// content markers: a login wall often also says the content is
/// "not available".
pub(crate) fn classify_failure(err: FetchError) -> FetchError {
    let FetchError::ToolFailed { diagnostic, .. } = &err else {
        return err;
    };
    let lower = diagnostic.to_lowercase();

    if let Some(status) = HTTP_STATUS
        .captures(diagnostic)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
    {
        match status {
            401 | 403 => {
                return FetchError::CredentialsExpired {
                    diagnostic: truncate_diagnostic(diagnostic),
                }
            }
            404 | 410 => {
                return FetchError::ContentUnavailable {
                    diagnostic: truncate_diagnostic(diagnostic),
                }
            }
            429 => return err,
            _ => {}
        }
    }

    if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        debug!("Fetch throttled by the platform: {}", diagnostic);
        err
    } else if CREDENTIAL_MARKERS.iter().any(|m| lower.contains(m)) {
        FetchError::CredentialsExpired {
            diagnostic: truncate_diagnostic(diagnostic),
        }
    } else if CONTENT_MARKERS.iter().any(|m| lower.contains(m)) {
        FetchError::ContentUnavailable {
            diagnostic: truncate_diagnostic(diagnostic),
        }
    } else {
        err
    }
}

/// Fetcher that runs the retrieval tool with a session cookie file.
pub struct AuthenticatedFetcher {
    inner: YtDlpFetcher,
    cookies_path: Option<PathBuf>,
}

impl AuthenticatedFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        let cookies_path = config.instagram.cookies_path.clone();
        let inner = match &cookies_path {
            Some(path) => YtDlpFetcher::new(config).with_cookies(path),
            None => YtDlpFetcher::new(config),
        };
        Self {
            inner,
            cookies_path,
        }
    }

    /// Fails with `NotConfigured` unless the cookie file is usable right now.
    async fn ensure_configured(&self) -> Result<(), FetchError> {
        let Some(path) = &self.cookies_path else {
            return Err(FetchError::NotConfigured(
                "no cookie file configured".to_string(),
            ));
        };
        cookie_file_usable(path)
            .await
            .map_err(FetchError::NotConfigured)
    }
}

#[async_trait]
impl SourceFetcher for AuthenticatedFetcher {
    fn name(&self) -> &str {
        "yt-dlp-authenticated"
    }

    async fn is_configured(&self) -> bool {
        match self.ensure_configured().await {
            Ok(()) => true,
            Err(e) => {
                debug!("Authenticated fetcher unavailable: {}", e);
                false
            }
        }
    }

    async fn fetch(
        &self,
        url: &str,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedMedia, FetchError> {
        validate_source_url(url)?;
        self.ensure_configured().await?;

        self.inner.fetch(url, job_id, cancel).await.map_err(|e| {
            let classified = classify_failure(e);
            if matches!(classified, FetchError::CredentialsExpired { .. }) {
                warn!(
                    "Session cookies for {} rejected while fetching job {}",
                    url, job_id
                );
            }
            classified
        })
    }

    async fn probe(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<SourceMetadata, FetchError> {
        validate_source_url(url)?;
        self.ensure_configured().await?;
        self.inner.probe(url, cancel).await.map_err(classify_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use crate::job::ErrorCode;

    const COOKIES: &str = "# Netscape HTTP Cookie File\n\
        .instagram.com\tTRUE\t/\tTRUE\t1999999999\tsessionid\tabc123\n";

    fn config_with(path: Option<PathBuf>) -> FetcherConfig {
        let mut config = FetcherConfig::default();
        config.instagram.cookies_path = path;
        config
    }

    #[tokio::test]
    async fn test_unconfigured_without_path() {
        let fetcher = AuthenticatedFetcher::new(config_with(None));
        assert!(!fetcher.is_configured().await);
    }

    #[tokio::test]
    async fn test_configured_with_valid_cookie_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(COOKIES.as_bytes()).unwrap();
        let fetcher = AuthenticatedFetcher::new(config_with(Some(file.path().to_path_buf())));
        assert!(fetcher.is_configured().await);
    }

    #[tokio::test]
    async fn test_cookie_file_added_after_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        let fetcher = AuthenticatedFetcher::new(config_with(Some(path.clone())));
        assert!(!fetcher.is_configured().await);

        tokio::fs::write(&path, COOKIES).await.unwrap();
        assert!(fetcher.is_configured().await);
    }

    #[tokio::test]
    async fn test_empty_or_malformed_cookie_file() {
        let empty = tempfile::NamedTempFile::new().unwrap();
        assert!(cookie_file_usable(empty.path()).await.is_err());

        let mut junk = tempfile::NamedTempFile::new().unwrap();
        junk.write_all(b"# comment only\nsessionid=abc\n").unwrap();
        assert!(cookie_file_usable(junk.path()).await.is_err());

        assert!(cookie_file_usable(Path::new("/nonexistent/cookies.txt"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_http_only_prefix_is_a_cookie() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"#HttpOnly_.instagram.com\tTRUE\t/\tTRUE\t0\tsessionid\tx\n")
            .unwrap();
        assert!(cookie_file_usable(file.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_without_cookies_is_not_configured() {
        let fetcher = AuthenticatedFetcher::new(config_with(None));
        let cancel = CancellationToken::new();
        let err = fetcher
            .fetch("https://www.instagram.com/reel/abc/", "job-1", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_invalid_url_checked_before_credentials() {
        let fetcher = AuthenticatedFetcher::new(config_with(None));
        let cancel = CancellationToken::new();
        let err = fetcher
            .fetch("https://evil.example/reel", "job-1", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }

    #[test]
    fn test_classify_credentials_before_content() {
        let err = classify_failure(FetchError::tool_failed(
            Some(1),
            "ERROR: [Instagram] abc: Requested content is not available, login required",
        ));
        assert!(matches!(err, FetchError::CredentialsExpired { .. }));
    }

    #[test]
    fn test_classify_content_unavailable() {
        let err = classify_failure(FetchError::tool_failed(
            Some(1),
            "ERROR: [Instagram] abc: This content is private",
        ));
        assert!(matches!(err, FetchError::ContentUnavailable { .. }));
    }

    #[test]
    fn test_classify_by_http_status() {
        let err = classify_failure(FetchError::tool_failed(
            Some(1),
            "ERROR: Unable to download webpage: HTTP Error 401: Unauthorized",
        ));
        assert!(matches!(err, FetchError::CredentialsExpired { .. }));

        let err = classify_failure(FetchError::tool_failed(
            Some(1),
            "ERROR: Unable to download webpage: HTTP Error 404: Not Found",
        ));
        assert!(matches!(err, FetchError::ContentUnavailable { .. }));
    }

    #[test]
    fn test_classify_rate_limit_as_tool_failure() {
        let err = classify_failure(FetchError::tool_failed(
            Some(1),
            "ERROR: [Instagram] abc: Please wait a few minutes before you try again",
        ));
        assert!(matches!(err, FetchError::ToolFailed { .. }));
        assert_eq!(err.error_code(), ErrorCode::FetchFailed);

        let err = classify_failure(FetchError::tool_failed(
            Some(1),
            "ERROR: Unable to download webpage: HTTP Error 429: Too Many Requests",
        ));
        assert!(matches!(err, FetchError::ToolFailed { .. }));
    }

    #[test]
    fn test_classify_ignores_incidental_log_in_text() {
        let err = classify_failure(FetchError::tool_failed(
            Some(1),
            "ERROR: failed to write log in /tmp: disk full",
        ));
        assert!(matches!(err, FetchError::ToolFailed { .. }));
    }

    #[test]
    fn test_classify_leaves_other_errors() {
        let err = classify_failure(FetchError::tool_failed(Some(1), "ERROR: network down"));
        assert!(matches!(err, FetchError::ToolFailed { .. }));

        let err = classify_failure(FetchError::Timeout { timeout_secs: 1 });
        assert!(matches!(err, FetchError::Timeout { .. }));
    }
}
