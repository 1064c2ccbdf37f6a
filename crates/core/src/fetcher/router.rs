//! Platform-based selection of a fetcher.

use std::collections::HashMap;
use std::sync::Arc;

use super::authenticated::AuthenticatedFetcher;
use super::config::FetcherConfig;
use super::traits::SourceFetcher;
use super::validate::Platform;
use super::ytdlp::YtDlpFetcher;

/// Routes each platform to the fetcher that can serve it.
#[derive(Clone)]
pub struct Fetchers {
    default: Arc<dyn SourceFetcher>,
    by_platform: HashMap<Platform, Arc<dyn SourceFetcher>>,
}

impl Fetchers {
    /// Every platform goes to `default` until overridden.
    pub fn new(default: Arc<dyn SourceFetcher>) -> Self {
        Self {
            default,
            by_platform: HashMap::new(),
        }
    }

    pub fn with_platform(mut self, platform: Platform, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.by_platform.insert(platform, fetcher);
        self
    }

    /// Generic fetcher for everything, cookie-authenticated fetcher for
    /// platforms that require a login.
    pub fn from_config(config: &FetcherConfig) -> Self {
        let authenticated: Arc<dyn SourceFetcher> =
            Arc::new(AuthenticatedFetcher::new(config.clone()));
        Self::new(Arc::new(YtDlpFetcher::new(config.clone())))
            .with_platform(Platform::Instagram, authenticated)
    }

    pub fn for_platform(&self, platform: Platform) -> &Arc<dyn SourceFetcher> {
        self.by_platform.get(&platform).unwrap_or(&self.default)
    }

    /// Platforms whose fetcher reports itself unconfigured.
    pub async fn unconfigured_platforms(&self) -> Vec<Platform> {
        let mut platforms = Vec::new();
        for (platform, fetcher) in &self.by_platform {
            if !fetcher.is_configured().await {
                platforms.push(*platform);
            }
        }
        platforms.sort_by_key(|p| p.as_str());
        platforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instagram_routes_to_authenticated() {
        let fetchers = Fetchers::from_config(&FetcherConfig::default());
        assert_eq!(
            fetchers.for_platform(Platform::Instagram).name(),
            "yt-dlp-authenticated"
        );
        assert_eq!(fetchers.for_platform(Platform::YouTube).name(), "yt-dlp");
        assert_eq!(fetchers.for_platform(Platform::TikTok).name(), "yt-dlp");
    }

    #[tokio::test]
    async fn test_unconfigured_platforms() {
        let fetchers = Fetchers::from_config(&FetcherConfig::default());
        assert_eq!(
            fetchers.unconfigured_platforms().await,
            vec![Platform::Instagram]
        );
    }
}
