//! Batch scheduler integration tests
//!
//! Exercise the drain loop, single-flight guard, per-task timeout
//! isolation, and counter accounting against an in-memory catalog with
//! deterministic transfer/analysis stand-ins.

use mxt_aa::analysis::AnalysisError;
use mxt_aa::batch::{AudioSource, BatchScheduler, SchedulerConfig, TrackAnalysis};
use mxt_aa::db;
use mxt_aa::models::{AnalysisResult, TrackRef, TrackSelection};
use mxt_aa::transfer::{AudioPayload, TransferError};
use mxt_common::events::EventBus;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Transfer stand-in: fixed delay, configurable per-track failures and
/// stalls
struct StubSource {
    delay: Duration,
    fail_ids: HashSet<i64>,
    stall_ids: HashSet<i64>,
}

impl Default for StubSource {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(50),
            fail_ids: HashSet::new(),
            stall_ids: HashSet::new(),
        }
    }
}

impl AudioSource for StubSource {
    async fn acquire(&self, track: &TrackRef) -> Result<AudioPayload, TransferError> {
        if self.stall_ids.contains(&track.track_id) {
            // Far beyond any test's task timeout
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        tokio::time::sleep(self.delay).await;
        if self.fail_ids.contains(&track.track_id) {
            return Err(TransferError::NotFound);
        }
        Ok(AudioPayload::Memory(vec![0u8; 4096]))
    }
}

/// Analysis stand-in returning a canned result
struct StubAnalysis;

impl TrackAnalysis for StubAnalysis {
    async fn analyze(&self, payload: AudioPayload) -> Result<AnalysisResult, AnalysisError> {
        let bytes = payload
            .into_bytes()
            .await
            .map_err(|e| AnalysisError::PayloadRead(e.to_string()))?;
        if bytes.is_empty() {
            return Err(AnalysisError::EmptyAudio);
        }
        Ok(sample_result())
    }
}

fn sample_result() -> AnalysisResult {
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
        embedding: None,
    }
}

async fn memory_pool() -> SqlitePool {
    // One connection: every pooled connection to :memory: would be its
    // own empty database
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_tables(&pool).await.unwrap();
    pool
}

async fn seed_tracks(pool: &SqlitePool, ids: &[i64]) {
    for &id in ids {
        db::tracks::insert_track(
            pool,
            &TrackRef {
                track_id: id,
                source_url: format!("https://example.com/track/{}", id),
                title: Some(format!("Track {}", id)),
                artist: Some("Artist".to_string()),
                duration_ms: Some(200_000),
            },
        )
        .await
        .unwrap();
    }
}

fn test_config(timeout_ms: u64) -> SchedulerConfig {
    SchedulerConfig {
        analyze_slots: 2,
        transfer_multiplier: 3,
        task_timeout: Duration::from_millis(timeout_ms),
        poll_interval: Duration::from_millis(20),
        stale_after_seconds: 600,
    }
}

fn make_scheduler(
    pool: SqlitePool,
    source: StubSource,
    config: SchedulerConfig,
) -> Arc<BatchScheduler<StubSource, StubAnalysis>> {
    Arc::new(BatchScheduler::new(
        pool,
        Arc::new(source),
        Arc::new(StubAnalysis),
        EventBus::new(64),
        config,
    ))
}

async fn wait_until_idle(scheduler: &Arc<BatchScheduler<StubSource, StubAnalysis>>) {
    for _ in 0..400 {
        if !scheduler.snapshot().is_running {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("batch never finished");
}

async fn status_of(pool: &SqlitePool, id: i64) -> (String, Option<String>) {
    let row = sqlx::query("SELECT analysis_status, analysis_error FROM tracks WHERE track_id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap();
    (row.get("analysis_status"), row.get("analysis_error"))
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_drains_all_pending_tracks() {
    let pool = memory_pool().await;
    seed_tracks(&pool, &[1, 2, 3, 4, 5]).await;

    let scheduler = make_scheduler(pool.clone(), StubSource::default(), test_config(5_000));
    let total = scheduler.start(TrackSelection::Pending).await.unwrap();
    assert_eq!(total, 5);

    wait_until_idle(&scheduler).await;

    let snap = scheduler.snapshot();
    assert_eq!(snap.successful, 5);
    assert_eq!(snap.failed, 0);

    for id in 1..=5 {
        let (status, error) = status_of(&pool, id).await;
        assert_eq!(status, "completed");
        assert!(error.is_none());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn second_start_is_rejected_and_counters_are_untouched() {
    let pool = memory_pool().await;
    seed_tracks(&pool, &[1, 2, 3]).await;

    let source = StubSource {
        delay: Duration::from_millis(300),
        ..Default::default()
    };
    let scheduler = make_scheduler(pool.clone(), source, test_config(10_000));

    let total = scheduler.start(TrackSelection::Pending).await.unwrap();
    assert_eq!(total, 3);

    let err = scheduler.start(TrackSelection::Pending).await.unwrap_err();
    assert!(matches!(err, mxt_aa::batch::SchedulerError::AlreadyRunning));

    // The rejected call must not have disturbed the first run
    let snap = scheduler.snapshot();
    assert!(snap.is_running);
    assert_eq!(snap.total_tracks, 3);

    wait_until_idle(&scheduler).await;
    assert_eq!(scheduler.snapshot().successful, 3);

    // Once idle, a new run is accepted again (nothing left to do)
    let restarted = scheduler.start(TrackSelection::Pending).await.unwrap();
    assert_eq!(restarted, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn timed_out_task_fails_alone() {
    let pool = memory_pool().await;
    seed_tracks(&pool, &[1, 2, 3]).await;

    let source = StubSource {
        stall_ids: HashSet::from([2]),
        ..Default::default()
    };
    let scheduler = make_scheduler(pool.clone(), source, test_config(700));

    scheduler.start(TrackSelection::Pending).await.unwrap();
    wait_until_idle(&scheduler).await;

    let snap = scheduler.snapshot();
    assert_eq!(snap.successful, 2);
    assert_eq!(snap.failed, 1);

    let (status, error) = status_of(&pool, 2).await;
    assert_eq!(status, "failed");
    assert_eq!(error.as_deref(), Some("Timeout"));

    for id in [1, 3] {
        let (status, _) = status_of(&pool, id).await;
        assert_eq!(status, "completed");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn transfer_failures_are_isolated_per_track() {
    let pool = memory_pool().await;
    seed_tracks(&pool, &[1, 2, 3, 4]).await;

    let source = StubSource {
        fail_ids: HashSet::from([2, 4]),
        ..Default::default()
    };
    let scheduler = make_scheduler(pool.clone(), source, test_config(5_000));

    scheduler.start(TrackSelection::Pending).await.unwrap();
    wait_until_idle(&scheduler).await;

    let snap = scheduler.snapshot();
    assert_eq!(snap.successful, 2);
    assert_eq!(snap.failed, 2);

    let (status, error) = status_of(&pool, 2).await;
    assert_eq!(status, "failed");
    assert!(error.unwrap().contains("not found"));
}

#[tokio::test(flavor = "multi_thread")]
async fn tracks_inserted_mid_run_are_picked_up() {
    let pool = memory_pool().await;
    seed_tracks(&pool, &[1, 2]).await;

    let source = StubSource {
        delay: Duration::from_millis(300),
        ..Default::default()
    };
    let scheduler = make_scheduler(pool.clone(), source, test_config(10_000));

    scheduler.start(TrackSelection::Pending).await.unwrap();

    // Lands while round one is still transferring; the re-query between
    // rounds must find it
    tokio::time::sleep(Duration::from_millis(100)).await;
    seed_tracks(&pool, &[3]).await;

    wait_until_idle(&scheduler).await;

    for id in 1..=3 {
        let (status, _) = status_of(&pool, id).await;
        assert_eq!(status, "completed", "track {}", id);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_catalog_does_not_start_a_run() {
    let pool = memory_pool().await;
    let scheduler = make_scheduler(pool, StubSource::default(), test_config(5_000));

    let total = scheduler.start(TrackSelection::Pending).await.unwrap();
    assert_eq!(total, 0);
    assert!(!scheduler.snapshot().is_running);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_tracks_are_retried_with_the_wider_selection() {
    let pool = memory_pool().await;
    seed_tracks(&pool, &[1]).await;
    db::tracks::mark_failed(&pool, 1, "Timeout").await.unwrap();

    let scheduler = make_scheduler(pool.clone(), StubSource::default(), test_config(5_000));

    // Pending-only sees nothing
    assert_eq!(scheduler.start(TrackSelection::Pending).await.unwrap(), 0);

    let total = scheduler
        .start(TrackSelection::PendingAndFailed)
        .await
        .unwrap();
    assert_eq!(total, 1);
    wait_until_idle(&scheduler).await;

    let (status, _) = status_of(&pool, 1).await;
    assert_eq!(status, "completed");
}

#[tokio::test(flavor = "multi_thread")]
async fn single_track_analysis_runs_outside_a_batch() {
    let pool = memory_pool().await;
    seed_tracks(&pool, &[7]).await;

    let scheduler = make_scheduler(pool.clone(), StubSource::default(), test_config(5_000));
    scheduler.start_single(7).await.unwrap();

    for _ in 0..200 {
        let (status, _) = status_of(&pool, 7).await;
        if status == "completed" {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("single-track analysis never completed");
}
