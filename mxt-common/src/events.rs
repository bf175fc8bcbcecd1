//! Event types and broadcast bus for Mixtide services
//!
//! Events are broadcast via [`EventBus`] and serialized for SSE
//! transmission to connected clients.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Analyzer event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnalyzerEvent {
    /// Batch run started
    BatchStarted {
        total_tracks: usize,
        mode: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track was analyzed and persisted
    TrackCompleted {
        track_id: i64,
        bpm: f64,
        key: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track failed (transfer, analysis, or timeout)
    TrackFailed {
        track_id: i64,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track was queued for the running batch to pick up
    TrackQueued {
        track_id: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Batch run drained the catalog and stopped
    BatchCompleted {
        successful: usize,
        failed: usize,
        elapsed_seconds: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl AnalyzerEvent {
    /// Event type name used as the SSE event field
    pub fn event_type(&self) -> &'static str {
        match self {
            AnalyzerEvent::BatchStarted { .. } => "BatchStarted",
            AnalyzerEvent::TrackCompleted { .. } => "TrackCompleted",
            AnalyzerEvent::TrackFailed { .. } => "TrackFailed",
            AnalyzerEvent::TrackQueued { .. } => "TrackQueued",
            AnalyzerEvent::BatchCompleted { .. } => "BatchCompleted",
        }
    }
}

/// Broadcast bus for analyzer events
///
/// Thin wrapper over `tokio::sync::broadcast`: subscribers that lag are
/// dropped rather than blocking emitters, and emitting with no subscribers
/// is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AnalyzerEvent>,
}

impl EventBus {
    /// Create a new bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<AnalyzerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: AnalyzerEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of currently connected subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
