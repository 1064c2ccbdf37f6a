//! Mock source fetcher for testing.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::fetcher::{FetchError, FetchedMedia, SourceFetcher, SourceMetadata};

/// A recorded fetch call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedFetch {
    pub url: String,
    pub job_id: String,
    pub cancelled: bool,
}

/// Mock implementation of the SourceFetcher trait.
///
/// Writes a small file named `ladle-<job_id>.mp4` into its directory on
/// success. Can be told to fail once, or to block until cancelled.
#[derive(Debug)]
pub struct MockFetcher {
    dir: PathBuf,
    fetches: Arc<RwLock<Vec<RecordedFetch>>>,
    next_error: Arc<RwLock<Option<FetchError>>>,
    fetch_duration_ms: Arc<RwLock<u64>>,
    hang: Arc<AtomicBool>,
    configured: Arc<AtomicBool>,
    metadata: Arc<RwLock<Option<SourceMetadata>>>,
}

impl MockFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fetches: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            fetch_duration_ms: Arc::new(RwLock::new(0)),
            hang: Arc::new(AtomicBool::new(false)),
            configured: Arc::new(AtomicBool::new(true)),
            metadata: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn recorded_fetches(&self) -> Vec<RecordedFetch> {
        self.fetches.read().await.clone()
    }

    pub async fn fetch_count(&self) -> usize {
        self.fetches.read().await.len()
    }

    /// Configure the next fetch to fail with the given error.
    pub async fn set_next_error(&self, error: FetchError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn set_fetch_duration(&self, duration: Duration) {
        *self.fetch_duration_ms.write().await = duration.as_millis() as u64;
    }

    /// Block every fetch until its token is cancelled.
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn set_configured(&self, configured: bool) {
        self.configured.store(configured, Ordering::SeqCst);
    }

    pub async fn set_metadata(&self, metadata: SourceMetadata) {
        *self.metadata.write().await = Some(metadata);
    }

    async fn record(&self, url: &str, job_id: &str, cancelled: bool) {
        self.fetches.write().await.push(RecordedFetch {
            url: url.to_string(),
            job_id: job_id.to_string(),
            cancelled,
        });
    }
}

#[async_trait]
impl SourceFetcher for MockFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    async fn fetch(
        &self,
        url: &str,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedMedia, FetchError> {
        if let Some(err) = self.next_error.write().await.take() {
            self.record(url, job_id, false).await;
            return Err(err);
        }

        if self.hang.load(Ordering::SeqCst) {
            cancel.cancelled().await;
            self.record(url, job_id, true).await;
            return Err(FetchError::Cancelled);
        }

        let duration_ms = *self.fetch_duration_ms.read().await;
        if duration_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(duration_ms)) => {}
                _ = cancel.cancelled() => {
                    self.record(url, job_id, true).await;
                    return Err(FetchError::Cancelled);
                }
            }
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let media_path = self.dir.join(format!("ladle-{}.mp4", job_id));
        tokio::fs::write(&media_path, b"mock video").await?;
        self.record(url, job_id, false).await;

        Ok(FetchedMedia {
            media_path,
            mime_type: "video/mp4".to_string(),
            thumbnail_url: Some("https://example.com/thumb.jpg".to_string()),
        })
    }

    async fn probe(
        &self,
        _url: &str,
        _cancel: &CancellationToken,
    ) -> Result<SourceMetadata, FetchError> {
        match self.metadata.read().await.clone() {
            Some(metadata) => Ok(metadata),
            None => Err(FetchError::tool_failed(Some(1), "no metadata configured")),
        }
    }
}
