//! Audio feature analysis
//!
//! The extraction primitives live behind [`extractor::FeatureExtractor`];
//! everything else here is the orchestration and the algorithms built on
//! top of them: tempo consensus, highlight location, downbeat detection,
//! and the per-track engine that ties them together.

pub mod consensus;
pub mod downbeat;
pub mod engine;
pub mod extractor;
pub mod highlight;
pub mod sidecar;

pub use engine::AnalysisEngine;
pub use extractor::FeatureExtractor;

use thiserror::Error;

/// Analysis failures reported per track
///
/// These surface at the task boundary and become the track's failure
/// reason; individual estimator failures inside the algorithms never
/// reach this level.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Payload below the plausibility floor for compressed audio
    #[error("Audio data too small ({0} bytes) - stream may have failed")]
    PayloadTooSmall(usize),

    /// Could not read the downloaded artifact
    #[error("Failed to read audio payload: {0}")]
    PayloadRead(String),

    /// Container/codec decode failure
    #[error("Cannot decode audio: {0}")]
    Decode(String),

    /// Decoder produced no samples
    #[error("Audio data is empty")]
    EmptyAudio,

    /// Whole track shorter than the analysis minimum
    #[error("Audio too short ({0:.1}s), need at least 3 seconds")]
    TooShort(f64),

    /// Chosen segment too short to analyze
    #[error("Audio segment too short for analysis ({0:.1}s)")]
    SegmentTooShort(f64),

    /// Background task failure (join error etc.)
    #[error("Analysis task failed: {0}")]
    Internal(String),
}
