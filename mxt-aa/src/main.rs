//! mxt-aa - Audio Analysis Microservice
//!
//! Drains the track catalog: acquires audio per track (streaming with
//! download fallbacks), extracts rhythm/tonal/spectral features, and
//! persists the results. Driven over HTTP (batch + single-track
//! endpoints, status, SSE progress).

use anyhow::Result;
use mxt_common::events::EventBus;
use mxt_aa::analysis::consensus::TempoConsensus;
use mxt_aa::analysis::sidecar::SidecarExtractor;
use mxt_aa::analysis::AnalysisEngine;
use mxt_aa::batch::{BatchScheduler, SchedulerConfig};
use mxt_aa::config::AnalyzerConfig;
use mxt_aa::transfer::SourceFallbackChain;
use mxt_aa::AppState;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting mxt-aa (Audio Analysis) microservice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = AnalyzerConfig::load()?;
    info!("Database: {}", config.database_path.display());

    let db_pool = mxt_aa::db::init_database_pool(&config.database_path).await?;
    info!("Database connection established");

    let event_bus = EventBus::new(100);

    let extractor = SidecarExtractor::new(config.sidecar_path.clone(), config.temp_dir.clone());
    if extractor.is_available() {
        info!("DSP sidecar available: {}", config.sidecar_path);
    } else {
        warn!(
            "DSP sidecar '{}' not found in PATH - analyses will degrade to low confidence",
            config.sidecar_path
        );
    }

    let engine = AnalysisEngine::new(
        extractor,
        config.segment_duration_seconds,
        TempoConsensus::with_weights(config.tempo_weights.clone()),
    );

    let chain = SourceFallbackChain::new(&config)
        .map_err(|e| anyhow::anyhow!("Transfer setup failed: {}", e))?;

    let scheduler = Arc::new(BatchScheduler::new(
        db_pool.clone(),
        Arc::new(chain),
        Arc::new(engine),
        event_bus.clone(),
        SchedulerConfig::from(&config),
    ));

    let state = AppState::new(db_pool, event_bus, scheduler);
    let app = mxt_aa::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
