//! sage-research - Learning Session Service
//!
//! Runs staged learning sessions (collection, pre-filter, deep analysis,
//! integration) and exposes them over HTTP REST + SSE.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sage_common::config::{
    default_config_path, load_toml_config, RootFolderInitializer, RootFolderResolver, StoreBackend,
    TomlConfig,
};
use sage_common::events::EventBus;

use sage_research::config::{log_collaborators, ResearchSettings};
use sage_research::services::{
    HttpScoringService, HttpSearchProvider, PreFilterEngine, ScoreCache, ScoringService,
    SearchProvider, SessionOrchestrator, UnconfiguredScoringService, UnconfiguredSearchProvider,
};
use sage_research::store::{FileSessionStore, SessionStore, SqliteSessionStore};
use sage_research::AppState;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreArg {
    File,
    Sqlite,
}

/// Learning session service
#[derive(Debug, Parser)]
#[command(name = "sage-research", version)]
struct Cli {
    /// Bootstrap TOML file (default: <config_dir>/sage/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root folder for session files and the database
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// HTTP port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Session store backend (overrides the config file)
    #[arg(long, value_enum)]
    store: Option<StoreArg>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(default_config_path);
    let config = match &config_path {
        Some(path) => load_toml_config(path)?,
        None => TomlConfig::default(),
    };

    // RUST_LOG wins over the config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting sage-research (Learning Sessions)");
    info!(
        "Version: {} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let settings = match &config_path {
        Some(path) => ResearchSettings::load(path)?,
        None => ResearchSettings::default(),
    };

    // Root folder: CLI → ENV → TOML → compiled default
    let root_folder = RootFolderResolver::new("research")
        .with_cli_arg(cli.root_folder.clone())
        .with_toml_config(&config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let backend = match cli.store {
        Some(StoreArg::File) => StoreBackend::File,
        Some(StoreArg::Sqlite) => StoreBackend::Sqlite,
        None => config.store,
    };
    let store: Arc<dyn SessionStore> = match backend {
        StoreBackend::File => {
            let dir = initializer.sessions_dir();
            info!("Session store: {}", dir.display());
            Arc::new(FileSessionStore::new(dir).await?)
        }
        StoreBackend::Sqlite => {
            let db_path = initializer.database_path();
            info!("Session store: {}", db_path.display());
            Arc::new(SqliteSessionStore::connect(&db_path).await?)
        }
    };

    log_collaborators(&config);
    let search: Arc<dyn SearchProvider> = match HttpSearchProvider::from_config(&config.search)? {
        Some(provider) => Arc::new(provider),
        None => Arc::new(UnconfiguredSearchProvider),
    };
    let scoring: Arc<dyn ScoringService> = match HttpScoringService::from_config(&config.scoring)? {
        Some(service) => Arc::new(service),
        None => Arc::new(UnconfiguredScoringService),
    };

    // One cache for every session
    let cache = Arc::new(ScoreCache::new(settings.prefilter.cache_ttl()));
    let prefilter = Arc::new(PreFilterEngine::new(scoring.clone(), cache.clone(), settings.prefilter));

    let event_bus = EventBus::new(100);
    let orchestrator = Arc::new(SessionOrchestrator::new(
        store,
        search,
        scoring,
        prefilter,
        settings.pipeline,
        event_bus,
    ));

    let report = orchestrator.recover_sessions().await?;
    if !report.interrupted.is_empty() {
        warn!(
            count = report.interrupted.len(),
            "Sessions were interrupted by the previous shutdown"
        );
    }

    let purge_interval = cache.ttl().max(std::time::Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Purged expired pre-filter cache entries");
            }
        }
    });

    let app = sage_research::build_router(AppState::new(orchestrator.clone()));

    let port = cli.port.unwrap_or(config.port);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Listening on http://127.0.0.1:{}", port);
    info!("Health check: http://127.0.0.1:{}/health", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        })
        .await?;

    orchestrator.shutdown().await;
    info!("sage-research stopped");
    Ok(())
}
