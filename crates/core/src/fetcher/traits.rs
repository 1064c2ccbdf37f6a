//! Trait definitions for the fetcher module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use super::error::FetchError;

/// A locally staged media artifact produced by a fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedMedia {
    pub media_path: PathBuf,
    pub mime_type: String,
    /// Remote thumbnail reference, when one could be obtained.
    pub thumbnail_url: Option<String>,
}

/// Descriptive metadata reported by the retrieval tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub title: Option<String>,
    /// Caption or description text; often carries the ingredient list.
    pub description: Option<String>,
    pub uploader: Option<String>,
    pub duration_secs: Option<f64>,
    pub thumbnail: Option<String>,
    pub webpage_url: Option<String>,
}

/// Retrieves remote media into the local temp directory.
///
/// Implementations must terminate any subprocess they started when `cancel`
/// fires, and must validate the URL before spawning anything.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Returns the name of this fetcher implementation.
    fn name(&self) -> &str;

    /// Whether the fetcher has everything it needs to run.
    async fn is_configured(&self) -> bool {
        true
    }

    /// Download the media behind `url` for the given job.
    async fn fetch(
        &self,
        url: &str,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedMedia, FetchError>;

    /// Look up metadata without downloading the media.
    async fn probe(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<SourceMetadata, FetchError>;
}
