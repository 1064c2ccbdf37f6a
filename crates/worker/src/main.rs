mod metrics;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ladle_core::{
    load_config, validate_config, Fetchers, HttpRecipeExtractor, JobOrchestrator, JobStore,
    Reaper, RecipeExtractor, RecipeStore, SanitizedConfig, SqliteJobStore, SqliteRecipeStore,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often job gauges are refreshed.
const METRICS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let json = std::env::var("LADLE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run() -> Result<()> {
    init_logging();
    info!("ladle {} starting", VERSION);

    // Determine config path
    let config_path = std::env::var("LADLE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("ladle.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    if let Ok(json) = serde_json::to_string(&SanitizedConfig::from(&config)) {
        debug!("Effective configuration: {}", json);
    }

    // Create SQLite job store
    let job_store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
    );
    info!("Job store initialized");

    // Create SQLite recipe store
    let recipe_store: Arc<dyn RecipeStore> = Arc::new(
        SqliteRecipeStore::new(&config.database.path).context("Failed to create recipe store")?,
    );
    info!("Recipe store initialized");

    // Make sure the shared temp directory exists
    tokio::fs::create_dir_all(&config.fetcher.temp_dir)
        .await
        .with_context(|| format!("Failed to create temp dir {:?}", config.fetcher.temp_dir))?;

    // Create fetchers
    let fetchers = Fetchers::from_config(&config.fetcher);
    for platform in fetchers.unconfigured_platforms().await {
        warn!(
            "No session credentials for {}; its jobs will fail with CREDENTIALS_NOT_CONFIGURED",
            platform
        );
    }

    // Create orchestrator if enabled
    let orchestrator = if config.orchestrator.enabled {
        if !config.extractor.is_configured() {
            anyhow::bail!("Orchestrator enabled but extractor.endpoint is not configured");
        }
        let extractor: Arc<dyn RecipeExtractor> = Arc::new(
            HttpRecipeExtractor::new(&config.extractor)
                .context("Failed to create recipe extractor")?,
        );
        info!(
            "Using extraction service at {}",
            config.extractor.endpoint.as_deref().unwrap_or_default()
        );

        let orch = JobOrchestrator::new(
            config.orchestrator.clone(),
            Arc::clone(&job_store),
            fetchers,
            extractor,
            recipe_store,
        );
        orch.start().await;
        info!(
            "Job orchestrator started with {} workers",
            config.orchestrator.workers
        );
        Some(orch)
    } else {
        info!("Orchestrator disabled in config");
        None
    };

    // Background tasks share one shutdown token
    let shutdown = CancellationToken::new();

    // Start reaper if enabled
    let reaper_handle = if config.reaper.enabled {
        let reaper = Reaper::new(
            config.reaper.clone(),
            Arc::clone(&job_store),
            config.fetcher.temp_dir.clone(),
            config.fetcher.file_prefix.clone(),
        );
        let token = shutdown.clone();
        Some(tokio::spawn(async move { reaper.run(token).await }))
    } else {
        info!("Reaper disabled in config");
        None
    };

    // Refresh job gauges until shutdown
    let metrics_handle = {
        let token = shutdown.clone();
        let store = Arc::clone(&job_store);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(METRICS_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => metrics::collect_job_metrics(store.as_ref()),
                }
            }
        })
    };

    shutdown_signal().await;
    info!("Shutting down...");

    shutdown.cancel();
    if let Some(handle) = reaper_handle {
        if let Err(e) = handle.await {
            error!("Reaper task ended abnormally: {}", e);
        }
    }
    if let Err(e) = metrics_handle.await {
        error!("Metrics task ended abnormally: {}", e);
    }

    // Stop orchestrator if running
    if let Some(ref orch) = orchestrator {
        info!("Stopping orchestrator...");
        orch.stop().await;
    }

    metrics::collect_job_metrics(job_store.as_ref());
    info!("Final metrics:\n{}", metrics::encode_metrics());
    info!("ladle stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
