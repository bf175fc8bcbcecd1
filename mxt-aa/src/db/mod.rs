//! Database access for mxt-aa
//!
//! SQLite-backed track catalog shared with the ingest side. The analyzer
//! only reads track references and writes analysis fields and status.

pub mod tracks;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the catalog tables if missing
///
/// Idempotent; also used by tests against `sqlite::memory:` pools.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            track_id INTEGER PRIMARY KEY,
            source_url TEXT NOT NULL,
            title TEXT,
            artist TEXT,
            duration_ms INTEGER,
            analysis_status TEXT NOT NULL DEFAULT 'pending',
            analysis_error TEXT,
            analyzed_at TEXT,
            bpm REAL,
            bpm_confidence REAL,
            beat_offset REAL,
            key_detected TEXT,
            key_confidence REAL,
            energy REAL,
            loudness REAL,
            dynamic_complexity REAL,
            spectral_centroid REAL,
            dissonance REAL,
            danceability REAL,
            speechiness REAL,
            instrumentalness REAL,
            acousticness REAL,
            valence REAL,
            liveness REAL,
            highlight_time REAL,
            embedding TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tracks_status ON tracks(analysis_status)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (tracks)");

    Ok(())
}
