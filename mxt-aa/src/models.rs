//! Core data model for the analyzer service

use serde::{Deserialize, Serialize};

/// Status of a track's analysis, owned by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }
}

/// Catalog row selection for a batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSelection {
    /// Pending rows plus stuck processing rows (no completion timestamp)
    Pending,
    /// Pending, failed, and stuck processing rows
    PendingAndFailed,
    /// Completed rows, for full reanalysis after algorithm changes
    Completed,
}

impl TrackSelection {
    pub fn describe(&self) -> &'static str {
        match self {
            TrackSelection::Pending => "pending",
            TrackSelection::PendingAndFailed => "pending + failed",
            TrackSelection::Completed => "completed (reanalysis)",
        }
    }
}

/// A track reference read from the catalog, immutable for the run
#[derive(Debug, Clone)]
pub struct TrackRef {
    /// Externally assigned platform track id
    pub track_id: i64,
    /// Permalink URL on the primary platform
    pub source_url: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    /// Expected duration in milliseconds, used for fallback matching
    pub duration_ms: Option<i64>,
}

/// Analysis results persisted back to the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    // Rhythm
    pub bpm: f64,
    pub bpm_confidence: f64,
    /// Downbeat phase in seconds within one beat period, when detectable
    pub beat_offset: Option<f64>,

    // Tonal
    pub key_detected: String,
    pub key_confidence: f64,

    // Dynamics
    pub energy: f64,
    pub loudness: f64,
    pub dynamic_complexity: f64,

    // Timbre
    pub spectral_centroid: f64,
    pub dissonance: f64,

    // High-level descriptors
    pub danceability: f64,
    pub speechiness: f64,
    pub instrumentalness: f64,
    pub acousticness: f64,
    pub valence: f64,
    pub liveness: f64,

    /// Timestamp of the most energetic moment (seconds)
    pub highlight_time: f64,

    /// Unit-normalized similarity embedding, when the model is available
    pub embedding: Option<Vec<f32>>,
}
