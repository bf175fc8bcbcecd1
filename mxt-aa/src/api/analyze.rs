//! Single-track analysis handler
//!
//! POST /analyze: analyze one track immediately, or hand it to the
//! running batch through the submit queue.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::AppState;
use mxt_common::events::AnalyzerEvent;

/// POST /analyze request
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub track_id: i64,
}

/// POST /analyze response
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub status: String,
    pub track_id: i64,
}

/// POST /analyze
pub async fn analyze_track(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Json<AnalyzeResponse>> {
    let track_id = request.track_id;

    let track = db::tracks::load_track(&state.db, track_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("Track {} not in catalog", track_id)))?;

    // A running batch will pick the track up on its next catalog pass;
    // otherwise run it on the spot
    if state.scheduler.snapshot().is_running {
        db::tracks::mark_pending(&state.db, track_id)
            .await
            .map_err(ApiError::from)?;
        state.scheduler.queue().push(track_id);
        state.event_bus.emit_lossy(AnalyzerEvent::TrackQueued {
            track_id,
            timestamp: chrono::Utc::now(),
        });

        tracing::info!(track_id, title = ?track.title, "Track queued for running batch");
        return Ok(Json(AnalyzeResponse {
            status: "queued".to_string(),
            track_id,
        }));
    }

    state.scheduler.start_single(track_id).await?;

    tracing::info!(track_id, title = ?track.title, "Single-track analysis started");
    Ok(Json(AnalyzeResponse {
        status: "analyzing".to_string(),
        track_id,
    }))
}

/// Build analyze routes
pub fn analyze_routes() -> Router<AppState> {
    Router::new().route("/analyze", post(analyze_track))
}
