//! mxt-aa library interface
//!
//! Exposes the service internals for integration testing and the binary.

pub mod analysis;
pub mod api;
pub mod audio;
pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod transfer;

pub use crate::error::{ApiError, ApiResult};

use crate::analysis::sidecar::SidecarExtractor;
use crate::analysis::AnalysisEngine;
use crate::batch::BatchScheduler;
use crate::transfer::SourceFallbackChain;
use axum::Router;
use chrono::{DateTime, Utc};
use mxt_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;

/// The scheduler as wired in production: fallback-chain transfers feeding
/// the sidecar-backed analysis engine
pub type ProductionScheduler = BatchScheduler<SourceFallbackChain, AnalysisEngine<SidecarExtractor>>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Catalog connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Batch scheduler, single instance per process
    pub scheduler: Arc<ProductionScheduler>,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, scheduler: Arc<ProductionScheduler>) -> Self {
        Self {
            db,
            event_bus,
            scheduler,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::batch_routes())
        .merge(api::analyze_routes())
        .merge(api::health_routes())
        .merge(api::sse_routes())
        .with_state(state)
}
