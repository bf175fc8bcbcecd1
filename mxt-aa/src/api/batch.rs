//! Batch analysis API handlers
//!
//! POST /analyze/batch, POST /analyze/batch/full-reanalysis,
//! GET /analyze/batch/status

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::batch::{BatchSnapshot, SchedulerError};
use crate::error::ApiResult;
use crate::models::TrackSelection;
use crate::AppState;

/// POST /analyze/batch request
#[derive(Debug, Default, Deserialize)]
pub struct BatchAnalysisRequest {
    /// Also retry failed tracks
    #[serde(default)]
    pub include_failed: bool,
}

/// Batch start response
#[derive(Debug, Serialize)]
pub struct BatchAnalysisResponse {
    pub status: String,
    pub total_tracks: usize,
    pub message: String,
}

/// POST /analyze/batch
///
/// Start batch analysis of all matching tracks. 409 when a batch is
/// already in progress.
pub async fn start_batch(
    State(state): State<AppState>,
    request: Option<Json<BatchAnalysisRequest>>,
) -> ApiResult<Json<BatchAnalysisResponse>> {
    let include_failed = request.map(|Json(r)| r.include_failed).unwrap_or(false);
    let selection = if include_failed {
        TrackSelection::PendingAndFailed
    } else {
        TrackSelection::Pending
    };

    start_with_selection(&state, selection).await
}

/// POST /analyze/batch/full-reanalysis
///
/// Re-run analysis over every completed track; used after algorithm
/// changes to refresh persisted values.
pub async fn start_full_reanalysis(
    State(state): State<AppState>,
) -> ApiResult<Json<BatchAnalysisResponse>> {
    start_with_selection(&state, TrackSelection::Completed).await
}

async fn start_with_selection(
    state: &AppState,
    selection: TrackSelection,
) -> ApiResult<Json<BatchAnalysisResponse>> {
    tracing::info!(mode = selection.describe(), "Batch start requested");

    match state.scheduler.start(selection).await {
        Ok(0) => Ok(Json(BatchAnalysisResponse {
            status: "no_tracks".to_string(),
            total_tracks: 0,
            message: format!("No {} tracks to analyze", selection.describe()),
        })),
        Ok(total) => Ok(Json(BatchAnalysisResponse {
            status: "started".to_string(),
            total_tracks: total,
            message: format!(
                "Started batch analysis of {} tracks ({})",
                total,
                selection.describe()
            ),
        })),
        Err(e @ SchedulerError::AlreadyRunning) => {
            tracing::warn!("Batch already running");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /analyze/batch/status
pub async fn batch_status(State(state): State<AppState>) -> Json<BatchSnapshot> {
    Json(state.scheduler.snapshot())
}

/// Build batch routes
pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/analyze/batch", post(start_batch))
        .route("/analyze/batch/full-reanalysis", post(start_full_reanalysis))
        .route("/analyze/batch/status", get(batch_status))
}
