//! Batch run state
//!
//! One scheduler-owned state object replaces any global counters: created
//! with the scheduler, reset at batch start, read by status queries. The
//! mutex is held only around field updates, never across an await.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    running: bool,
    total: usize,
    completed: usize,
    successful: usize,
    failed: usize,
}

/// Point-in-time view of a batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchSnapshot {
    pub is_running: bool,
    pub total_tracks: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Counters for the current batch run, single-flight guarded
#[derive(Debug, Default)]
pub struct BatchState {
    inner: Mutex<Inner>,
}

impl BatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to take the single batch slot; false when one is running
    pub fn try_begin(&self) -> bool {
        let mut inner = self.inner.lock().expect("batch state poisoned");
        if inner.running {
            return false;
        }
        *inner = Inner {
            running: true,
            ..Inner::default()
        };
        true
    }

    /// Release the batch slot
    pub fn finish(&self) {
        self.inner.lock().expect("batch state poisoned").running = false;
    }

    /// Reset per-round counters when a new set of tracks is picked up
    pub fn begin_round(&self, total: usize) {
        let mut inner = self.inner.lock().expect("batch state poisoned");
        inner.total = total;
        inner.completed = 0;
        inner.successful = 0;
        inner.failed = 0;
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("batch state poisoned");
        inner.completed += 1;
        inner.successful += 1;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("batch state poisoned");
        inner.completed += 1;
        inner.failed += 1;
    }

    /// A task that lost its claim did no work; it only counts as done
    pub fn record_skipped(&self) {
        self.inner.lock().expect("batch state poisoned").completed += 1;
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        let inner = self.inner.lock().expect("batch state poisoned");
        BatchSnapshot {
            is_running: inner.running,
            total_tracks: inner.total,
            processed: inner.completed,
            successful: inner.successful,
            failed: inner.failed,
        }
    }
}

/// Side-channel queue of tracks submitted while a batch is running
///
/// The batch loop does not consume work from here; it only uses the queue
/// to decide whether to keep polling the catalog for rows that another
/// writer is still inserting.
#[derive(Debug, Default)]
pub struct SubmitQueue {
    ids: Mutex<VecDeque<i64>>,
}

impl SubmitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, track_id: i64) {
        self.ids.lock().expect("submit queue poisoned").push_back(track_id);
    }

    pub fn len(&self) -> usize {
        self.ids.lock().expect("submit queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop queued ids that the catalog query has picked up
    pub fn remove_seen(&self, seen: &[i64]) {
        let mut ids = self.ids.lock().expect("submit queue poisoned");
        ids.retain(|id| !seen.contains(id));
    }

    pub fn clear(&self) {
        self.ids.lock().expect("submit queue poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_flight_begin() {
        let state = BatchState::new();
        assert!(state.try_begin());
        assert!(!state.try_begin());
        state.finish();
        assert!(state.try_begin());
    }

    #[test]
    fn begin_resets_counters() {
        let state = BatchState::new();
        state.try_begin();
        state.begin_round(5);
        state.record_success();
        state.record_failure();
        state.finish();

        state.try_begin();
        let snap = state.snapshot();
        assert_eq!(snap.total_tracks, 0);
        assert_eq!(snap.processed, 0);
        assert!(snap.is_running);
    }

    #[test]
    fn counters_add_up() {
        let state = BatchState::new();
        state.try_begin();
        state.begin_round(3);
        state.record_success();
        state.record_failure();
        state.record_skipped();

        let snap = state.snapshot();
        assert_eq!(snap.processed, 3);
        assert_eq!(snap.successful, 1);
        assert_eq!(snap.failed, 1);
    }

    #[test]
    fn queue_removes_seen_ids() {
        let queue = SubmitQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        queue.remove_seen(&[1, 3]);
        assert_eq!(queue.len(), 1);
        queue.clear();
        assert!(queue.is_empty());
    }
}
