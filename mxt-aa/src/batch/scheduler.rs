//! Concurrent batch scheduler
//!
//! Drives one pipeline per selected track under two independent
//! concurrency gates: transfers are I/O-bound and get `K x` the permits
//! of the CPU-bound analysis phase. The loop re-queries the catalog after
//! each round and keeps going until no matching rows remain, so tracks
//! inserted mid-run are picked up without restarting.

use crate::analysis::extractor::FeatureExtractor;
use crate::analysis::{AnalysisEngine, AnalysisError};
use crate::batch::state::{BatchSnapshot, BatchState, SubmitQueue};
use crate::db;
use crate::models::{AnalysisResult, TrackRef, TrackSelection};
use crate::transfer::{AudioPayload, SourceFallbackChain, TransferError};
use futures::stream::{FuturesUnordered, StreamExt};
use mxt_common::events::{AnalyzerEvent, EventBus};
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Give up waiting for queued tracks to land in the catalog after this
/// many consecutive empty polls
const MAX_EMPTY_POLLS: u32 = 60;

/// Acquires raw audio for a track
///
/// Seam for the scheduler: production uses [`SourceFallbackChain`], tests
/// substitute deterministic stubs.
pub trait AudioSource: Send + Sync + 'static {
    fn acquire(
        &self,
        track: &TrackRef,
    ) -> impl Future<Output = Result<AudioPayload, TransferError>> + Send;
}

impl AudioSource for SourceFallbackChain {
    async fn acquire(&self, track: &TrackRef) -> Result<AudioPayload, TransferError> {
        SourceFallbackChain::acquire(self, track).await
    }
}

/// Turns an acquired payload into an analysis result
pub trait TrackAnalysis: Send + Sync + 'static {
    fn analyze(
        &self,
        payload: AudioPayload,
    ) -> impl Future<Output = Result<AnalysisResult, AnalysisError>> + Send;
}

impl<E: FeatureExtractor + 'static> TrackAnalysis for AnalysisEngine<E> {
    async fn analyze(&self, payload: AudioPayload) -> Result<AnalysisResult, AnalysisError> {
        let bytes = payload
            .into_bytes()
            .await
            .map_err(|e| AnalysisError::PayloadRead(e.to_string()))?;
        self.analyze_bytes(bytes).await
    }
}

/// Scheduler tuning knobs, derived from [`crate::config::AnalyzerConfig`]
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub analyze_slots: usize,
    pub transfer_multiplier: usize,
    pub task_timeout: Duration,
    pub poll_interval: Duration,
    pub stale_after_seconds: i64,
}

impl From<&crate::config::AnalyzerConfig> for SchedulerConfig {
    fn from(config: &crate::config::AnalyzerConfig) -> Self {
        Self {
            analyze_slots: config.max_concurrent_analyses.max(1),
            transfer_multiplier: config.transfer_slots_multiplier.max(1),
            task_timeout: Duration::from_secs(config.task_timeout_seconds),
            poll_interval: Duration::from_millis(config.queue_poll_interval_ms),
            stale_after_seconds: config.task_timeout_seconds as i64,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Batch analysis is already in progress")]
    AlreadyRunning,

    #[error("Track {0} not found")]
    TrackNotFound(i64),

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

/// Outcome of one per-track pipeline, before counter accounting
enum TaskOutcome {
    Done(AnalysisResult),
    ClaimLost,
    Failed(String),
}

/// Two-gate concurrent batch driver
pub struct BatchScheduler<S, A> {
    db: SqlitePool,
    source: Arc<S>,
    analysis: Arc<A>,
    events: EventBus,
    state: Arc<BatchState>,
    queue: Arc<SubmitQueue>,
    config: SchedulerConfig,
}

impl<S: AudioSource, A: TrackAnalysis> BatchScheduler<S, A> {
    pub fn new(
        db: SqlitePool,
        source: Arc<S>,
        analysis: Arc<A>,
        events: EventBus,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            source,
            analysis,
            events,
            state: Arc::new(BatchState::new()),
            queue: Arc::new(SubmitQueue::new()),
            config,
        }
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        self.state.snapshot()
    }

    pub fn state(&self) -> Arc<BatchState> {
        Arc::clone(&self.state)
    }

    pub fn queue(&self) -> Arc<SubmitQueue> {
        Arc::clone(&self.queue)
    }

    /// Start a batch run over all tracks matching `selection`
    ///
    /// Single-flight: a second call while one is active gets
    /// `AlreadyRunning` and perturbs nothing. Returns the number of
    /// matching tracks at start time; 0 means there was nothing to do and
    /// no run was started.
    pub async fn start(
        self: &Arc<Self>,
        selection: TrackSelection,
    ) -> Result<usize, SchedulerError> {
        let total = db::tracks::count_for_analysis(
            &self.db,
            selection,
            self.config.stale_after_seconds,
        )
        .await? as usize;

        if total == 0 && self.queue.is_empty() {
            return Ok(0);
        }

        if !self.state.try_begin() {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.state.begin_round(total);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(selection).await;
        });

        Ok(total)
    }

    /// Analyze one track immediately, outside any batch run
    ///
    /// The track is reset to pending and pushed through the same pipeline
    /// with private single-permit gates.
    pub async fn start_single(self: &Arc<Self>, track_id: i64) -> Result<(), SchedulerError> {
        let track = db::tracks::load_track(&self.db, track_id)
            .await?
            .ok_or(SchedulerError::TrackNotFound(track_id))?;

        db::tracks::mark_pending(&self.db, track_id).await?;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let transfer = Arc::new(Semaphore::new(1));
            let analyze = Arc::new(Semaphore::new(1));
            this.process_track(track, TrackSelection::Pending, transfer, analyze, false)
                .await;
        });

        Ok(())
    }

    /// The drain loop; runs on its own task until the catalog is clean
    async fn run(self: Arc<Self>, selection: TrackSelection) {
        let analyze_slots = self.config.analyze_slots;
        let transfer_slots = analyze_slots * self.config.transfer_multiplier;
        let analyze_sem = Arc::new(Semaphore::new(analyze_slots));
        let transfer_sem = Arc::new(Semaphore::new(transfer_slots));

        info!(
            mode = selection.describe(),
            transfer_slots, analyze_slots, "Batch analysis started"
        );

        let started = std::time::Instant::now();
        let mut total_successful = 0usize;
        let mut total_failed = 0usize;
        let mut empty_polls = 0u32;

        loop {
            let tracks = match db::tracks::load_for_analysis(
                &self.db,
                selection,
                self.config.stale_after_seconds,
            )
            .await
            {
                Ok(tracks) => tracks,
                Err(e) => {
                    error!(error = %e, "Catalog query failed, stopping batch");
                    break;
                }
            };

            if tracks.is_empty() {
                if !self.queue.is_empty() && empty_polls < MAX_EMPTY_POLLS {
                    // Submitted tracks may still be mid-insert by another
                    // process; give the catalog a moment and re-check
                    empty_polls += 1;
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
                if !self.queue.is_empty() {
                    warn!(
                        queued = self.queue.len(),
                        "Queued tracks never appeared in the catalog, dropping them"
                    );
                    self.queue.clear();
                }
                break;
            }
            empty_polls = 0;

            let ids: Vec<i64> = tracks.iter().map(|t| t.track_id).collect();
            self.queue.remove_seen(&ids);

            self.state.begin_round(tracks.len());
            self.events.emit_lossy(AnalyzerEvent::BatchStarted {
                total_tracks: tracks.len(),
                mode: selection.describe().to_string(),
                timestamp: chrono::Utc::now(),
            });

            info!(tracks = tracks.len(), "Processing round");

            let mut tasks = FuturesUnordered::new();
            for track in tracks {
                let this = Arc::clone(&self);
                let transfer = Arc::clone(&transfer_sem);
                let analyze = Arc::clone(&analyze_sem);
                tasks.push(tokio::spawn(async move {
                    this.process_track(track, selection, transfer, analyze, true)
                        .await
                }));
            }

            while let Some(joined) = tasks.next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Track task panicked");
                    self.state.record_failure();
                }
            }

            let snap = self.state.snapshot();
            total_successful += snap.successful;
            total_failed += snap.failed;
            info!(
                successful = snap.successful,
                failed = snap.failed,
                elapsed_s = started.elapsed().as_secs(),
                "Round complete, re-checking catalog"
            );
        }

        self.state.finish();
        self.events.emit_lossy(AnalyzerEvent::BatchCompleted {
            successful: total_successful,
            failed: total_failed,
            elapsed_seconds: started.elapsed().as_secs(),
            timestamp: chrono::Utc::now(),
        });

        info!(
            successful = total_successful,
            failed = total_failed,
            elapsed_s = started.elapsed().as_secs(),
            "Batch analysis complete"
        );
    }

    /// One track's full pipeline with timeout and counter accounting
    async fn process_track(
        &self,
        track: TrackRef,
        selection: TrackSelection,
        transfer_sem: Arc<Semaphore>,
        analyze_sem: Arc<Semaphore>,
        count: bool,
    ) {
        let track_id = track.track_id;

        let outcome = match tokio::time::timeout(
            self.config.task_timeout,
            self.run_pipeline(&track, selection, transfer_sem, analyze_sem),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => TaskOutcome::Failed("Timeout".to_string()),
        };

        match outcome {
            TaskOutcome::Done(result) => {
                if count {
                    self.state.record_success();
                }
                info!(track_id, bpm = result.bpm, key = %result.key_detected, "Track analyzed");
                self.events.emit_lossy(AnalyzerEvent::TrackCompleted {
                    track_id,
                    bpm: result.bpm,
                    key: result.key_detected,
                    timestamp: chrono::Utc::now(),
                });
            }
            TaskOutcome::ClaimLost => {
                if count {
                    self.state.record_skipped();
                }
                debug!(track_id, "Claimed elsewhere, skipping");
            }
            TaskOutcome::Failed(reason) => {
                if let Err(e) = db::tracks::mark_failed(&self.db, track_id, &reason).await {
                    error!(track_id, error = %e, "Failed to record track failure");
                }
                if count {
                    self.state.record_failure();
                }
                warn!(track_id, reason, "Track failed");
                self.events.emit_lossy(AnalyzerEvent::TrackFailed {
                    track_id,
                    reason,
                    timestamp: chrono::Utc::now(),
                });
            }
        }
    }

    /// Claim -> transfer (gated) -> analyze (gated) -> persist
    async fn run_pipeline(
        &self,
        track: &TrackRef,
        selection: TrackSelection,
        transfer_sem: Arc<Semaphore>,
        analyze_sem: Arc<Semaphore>,
    ) -> TaskOutcome {
        let track_id = track.track_id;

        match db::tracks::claim_for_processing(
            &self.db,
            track_id,
            selection,
            self.config.stale_after_seconds,
        )
        .await
        {
            Ok(true) => {}
            Ok(false) => return TaskOutcome::ClaimLost,
            Err(e) => return TaskOutcome::Failed(e.to_string()),
        }

        // Transfer phase, bounded by the wide I/O gate. The permit is
        // released before analysis so a slow analyzer cannot starve
        // downloads.
        let payload = {
            let _permit = match transfer_sem.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return TaskOutcome::Failed("Scheduler shut down".to_string()),
            };
            debug!(track_id, "Transferring");
            match self.source.acquire(track).await {
                Ok(payload) => payload,
                Err(e) => return TaskOutcome::Failed(e.to_string()),
            }
        };

        // Analysis phase, bounded by the CPU gate
        let result = {
            let _permit = match analyze_sem.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return TaskOutcome::Failed("Scheduler shut down".to_string()),
            };
            debug!(track_id, size = ?payload.len(), "Analyzing");
            match self.analysis.analyze(payload).await {
                Ok(result) => result,
                Err(e) => return TaskOutcome::Failed(e.to_string()),
            }
        };

        // Persist outside both gates; one atomic UPDATE per track
        match db::tracks::save_result(&self.db, track_id, &result).await {
            Ok(()) => TaskOutcome::Done(result),
            Err(e) => TaskOutcome::Failed(format!("Failed to persist result: {}", e)),
        }
    }
}
