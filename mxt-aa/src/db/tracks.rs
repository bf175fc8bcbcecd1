//! Track catalog operations
//!
//! The selection predicate treats a "processing" row with no completion
//! timestamp whose last update is older than the stale threshold as
//! abandoned by a dead run. The same predicate backs the claim UPDATE, so
//! a row selected by one scheduler instance cannot be claimed by another:
//! claiming flips it to a freshly-updated "processing" row, which no
//! longer matches.

use crate::models::{AnalysisResult, AnalysisStatus, TrackRef, TrackSelection};
use anyhow::Result;
use sqlx::{Row, SqlitePool};

fn selection_clause(selection: TrackSelection) -> &'static str {
    match selection {
        TrackSelection::Pending => {
            "analysis_status = 'pending' \
             OR (analysis_status = 'processing' AND analyzed_at IS NULL \
                 AND updated_at <= datetime('now', '-' || ? || ' seconds'))"
        }
        TrackSelection::PendingAndFailed => {
            "analysis_status IN ('pending', 'failed') \
             OR (analysis_status = 'processing' AND analyzed_at IS NULL \
                 AND updated_at <= datetime('now', '-' || ? || ' seconds'))"
        }
        // The trailing test keeps the bind arity uniform across selections
        TrackSelection::Completed => "analysis_status = 'completed' AND (? >= 0)",
    }
}

/// Load all tracks matching the selection predicate
pub async fn load_for_analysis(
    pool: &SqlitePool,
    selection: TrackSelection,
    stale_after_seconds: i64,
) -> Result<Vec<TrackRef>> {
    let sql = format!(
        "SELECT track_id, source_url, title, artist, duration_ms FROM tracks WHERE {}",
        selection_clause(selection)
    );

    let rows = sqlx::query(&sql)
        .bind(stale_after_seconds)
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|row| track_from_row(&row)).collect())
}

/// Count tracks matching the selection predicate
pub async fn count_for_analysis(
    pool: &SqlitePool,
    selection: TrackSelection,
    stale_after_seconds: i64,
) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) AS n FROM tracks WHERE {}",
        selection_clause(selection)
    );

    let row = sqlx::query(&sql)
        .bind(stale_after_seconds)
        .fetch_one(pool)
        .await?;

    Ok(row.get("n"))
}

/// Load a single track by id
pub async fn load_track(pool: &SqlitePool, track_id: i64) -> Result<Option<TrackRef>> {
    let row = sqlx::query(
        "SELECT track_id, source_url, title, artist, duration_ms FROM tracks WHERE track_id = ?",
    )
    .bind(track_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| track_from_row(&row)))
}

/// Claim a track for processing
///
/// Conditional UPDATE: succeeds only while the row still matches the
/// selection predicate, so exactly one concurrent claimer wins. Returns
/// whether this caller got the row.
pub async fn claim_for_processing(
    pool: &SqlitePool,
    track_id: i64,
    selection: TrackSelection,
    stale_after_seconds: i64,
) -> Result<bool> {
    let sql = format!(
        "UPDATE tracks SET analysis_status = 'processing', analysis_error = NULL, \
         analyzed_at = NULL, updated_at = datetime('now') \
         WHERE track_id = ? AND ({})",
        selection_clause(selection)
    );

    let result = sqlx::query(&sql)
        .bind(track_id)
        .bind(stale_after_seconds)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Record a per-track failure with its human-readable reason
pub async fn mark_failed(pool: &SqlitePool, track_id: i64, reason: &str) -> Result<()> {
    sqlx::query(
        "UPDATE tracks SET analysis_status = ?, analysis_error = ?, \
         analyzed_at = datetime('now'), updated_at = datetime('now') WHERE track_id = ?",
    )
    .bind(AnalysisStatus::Failed.as_str())
    .bind(reason)
    .bind(track_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Reset a track to pending (used when re-queueing a single track)
pub async fn mark_pending(pool: &SqlitePool, track_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE tracks SET analysis_status = ?, analysis_error = NULL, \
         analyzed_at = NULL, updated_at = datetime('now') WHERE track_id = ?",
    )
    .bind(AnalysisStatus::Pending.as_str())
    .bind(track_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist a completed analysis
///
/// One UPDATE carries all result fields plus the status flip, so a track
/// is either fully analyzed or not at all.
pub async fn save_result(
    pool: &SqlitePool,
    track_id: i64,
    result: &AnalysisResult,
) -> Result<()> {
    let embedding_json = result
        .embedding
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"
        UPDATE tracks SET
            bpm = ?, bpm_confidence = ?, beat_offset = ?,
            key_detected = ?, key_confidence = ?,
            energy = ?, loudness = ?, dynamic_complexity = ?,
            spectral_centroid = ?, dissonance = ?,
            danceability = ?, speechiness = ?, instrumentalness = ?,
            acousticness = ?, valence = ?, liveness = ?,
            highlight_time = ?, embedding = ?,
            analysis_status = ?, analysis_error = NULL,
            analyzed_at = datetime('now'), updated_at = datetime('now')
        WHERE track_id = ?
        "#,
    )
    .bind(result.bpm)
    .bind(result.bpm_confidence)
    .bind(result.beat_offset)
    .bind(&result.key_detected)
    .bind(result.key_confidence)
    .bind(result.energy)
    .bind(result.loudness)
    .bind(result.dynamic_complexity)
    .bind(result.spectral_centroid)
    .bind(result.dissonance)
    .bind(result.danceability)
    .bind(result.speechiness)
    .bind(result.instrumentalness)
    .bind(result.acousticness)
    .bind(result.valence)
    .bind(result.liveness)
    .bind(result.highlight_time)
    .bind(embedding_json)
    .bind(AnalysisStatus::Completed.as_str())
    .bind(track_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert a track reference (catalog ingest side, and test seeding)
pub async fn insert_track(pool: &SqlitePool, track: &TrackRef) -> Result<()> {
    sqlx::query(
        "INSERT INTO tracks (track_id, source_url, title, artist, duration_ms) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(track_id) DO UPDATE SET \
             source_url = excluded.source_url, \
             title = excluded.title, \
             artist = excluded.artist, \
             duration_ms = excluded.duration_ms, \
             updated_at = datetime('now')",
    )
    .bind(track.track_id)
    .bind(&track.source_url)
    .bind(&track.title)
    .bind(&track.artist)
    .bind(track.duration_ms)
    .execute(pool)
    .await?;

    Ok(())
}

fn track_from_row(row: &sqlx::sqlite::SqliteRow) -> TrackRef {
    TrackRef {
        track_id: row.get("track_id"),
        source_url: row.get("source_url"),
        title: row.get("title"),
        artist: row.get("artist"),
        duration_ms: row.get("duration_ms"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        // One connection: every pooled connection to :memory: would be
        // its own empty database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");
        crate::db::init_tables(&pool).await.unwrap();
        pool
    }

    fn track(id: i64) -> TrackRef {
        TrackRef {
            track_id: id,
            source_url: format!("https://example.com/track/{}", id),
            title: Some("Test Track".to_string()),
            artist: Some("Test Artist".to_string()),
            duration_ms: Some(210_000),
        }
    }

    fn result() -> AnalysisResult {
        AnalysisResult {
            bpm: 128.0,
            bpm_confidence: 0.9,
            beat_offset: Some(0.22),
            key_detected: "A minor".to_string(),
            key_confidence: 0.8,
            energy: 0.6,
            loudness: -7.0,
            dynamic_complexity: 0.4,
            spectral_centroid: 0.3,
            dissonance: 0.2,
            danceability: 0.7,
            speechiness: 0.1,
            instrumentalness: 0.9,
            acousticness: 0.2,
            valence: 0.5,
            liveness: 0.3,
            highlight_time: 64.5,
            embedding: Some(vec![0.1, 0.2, 0.3]),
        }
    }

    #[tokio::test]
    async fn pending_tracks_are_selected() {
        let pool = memory_pool().await;
        insert_track(&pool, &track(1)).await.unwrap();
        insert_track(&pool, &track(2)).await.unwrap();

        let tracks = load_for_analysis(&pool, TrackSelection::Pending, 600)
            .await
            .unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(
            count_for_analysis(&pool, TrackSelection::Pending, 600)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn claim_succeeds_exactly_once() {
        let pool = memory_pool().await;
        insert_track(&pool, &track(1)).await.unwrap();

        assert!(claim_for_processing(&pool, 1, TrackSelection::Pending, 600)
            .await
            .unwrap());
        // Second claim loses: the row is now freshly "processing"
        assert!(!claim_for_processing(&pool, 1, TrackSelection::Pending, 600)
            .await
            .unwrap());
        // And it no longer matches the selection
        assert_eq!(
            count_for_analysis(&pool, TrackSelection::Pending, 600)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn failed_tracks_need_the_wider_selection() {
        let pool = memory_pool().await;
        insert_track(&pool, &track(1)).await.unwrap();
        mark_failed(&pool, 1, "Timeout").await.unwrap();

        assert_eq!(
            count_for_analysis(&pool, TrackSelection::Pending, 600)
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            count_for_analysis(&pool, TrackSelection::PendingAndFailed, 600)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn save_result_completes_the_track() {
        let pool = memory_pool().await;
        insert_track(&pool, &track(1)).await.unwrap();
        claim_for_processing(&pool, 1, TrackSelection::Pending, 600)
            .await
            .unwrap();
        save_result(&pool, 1, &result()).await.unwrap();

        let row = sqlx::query(
            "SELECT analysis_status, bpm, embedding, analyzed_at FROM tracks WHERE track_id = 1",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        let status: String = row.get("analysis_status");
        let bpm: f64 = row.get("bpm");
        let embedding: String = row.get("embedding");
        let analyzed_at: Option<String> = row.get("analyzed_at");

        assert_eq!(status, "completed");
        assert_eq!(bpm, 128.0);
        assert_eq!(embedding, "[0.1,0.2,0.3]");
        assert!(analyzed_at.is_some());

        // Completed rows only show up for reanalysis
        assert_eq!(
            count_for_analysis(&pool, TrackSelection::Completed, 600)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn stale_processing_rows_are_reselected() {
        let pool = memory_pool().await;
        insert_track(&pool, &track(1)).await.unwrap();
        claim_for_processing(&pool, 1, TrackSelection::Pending, 600)
            .await
            .unwrap();

        // Fresh claim: invisible
        assert_eq!(
            count_for_analysis(&pool, TrackSelection::Pending, 600)
                .await
                .unwrap(),
            0
        );
        // With a zero stale threshold the same row counts as abandoned
        assert_eq!(
            count_for_analysis(&pool, TrackSelection::Pending, 0)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn load_track_returns_none_for_unknown_id() {
        let pool = memory_pool().await;
        assert!(load_track(&pool, 99).await.unwrap().is_none());
    }
}
