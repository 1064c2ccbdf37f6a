pub mod config;
pub mod extractor;
pub mod fetcher;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod reaper;
pub mod recipe;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use extractor::{ExtractedRecipe, ExtractorError, HttpRecipeExtractor, RecipeExtractor};
pub use fetcher::{
    validate_source_url, AuthenticatedFetcher, FetchError, Fetchers, SourceFetcher, UrlRejection,
    YtDlpFetcher,
};
pub use job::{
    ClaimOutcome, CreateJobRequest, ErrorCode, ExtractionJob, JobError, JobStatus, JobStore,
    JobType, SqliteJobStore, TransitionOutcome,
};
pub use orchestrator::{
    EnqueueOutcome, JobOrchestrator, OrchestratorConfig, OrchestratorError, ProcessOutcome,
};
pub use reaper::{ReapReport, Reaper, ReaperConfig};
pub use recipe::{RecipeStore, SqliteRecipeStore, StoredRecipe};
