//! Feature extractor port
//!
//! Abstracts the native DSP capability behind a trait so the consensus,
//! highlight, and downbeat algorithms can be exercised with deterministic
//! stand-ins. Every method degrades to "no estimate" (empty vec, `None`,
//! zeroed descriptors) instead of failing; callers treat absence as a
//! normal control-flow value.

use crate::audio::AudioBuffer;
use serde::Deserialize;
use std::future::Future;

/// One tempo estimate from one estimation source
///
/// Produced by the extractor (and the beat-interval derivation), consumed
/// only by the tempo consensus. Never persisted.
#[derive(Debug, Clone)]
pub struct TempoCandidate {
    /// Estimated tempo, strictly positive
    pub bpm: f64,
    /// Estimator self-confidence in [0, 1]
    pub confidence: f64,
    /// Source tag, keys the per-source weight table ("cnn", "multi", ...)
    pub source: String,
}

impl TempoCandidate {
    pub fn new(bpm: f64, confidence: f64, source: impl Into<String>) -> Self {
        Self {
            bpm,
            confidence,
            source: source.into(),
        }
    }
}

/// A percussive onset with its detection strength
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct OnsetEvent {
    /// Seconds from the start of the analyzed buffer
    pub time: f64,
    /// Raw onset strength; callers normalize by the observed maximum
    pub strength: f64,
}

/// Detected musical key
#[derive(Debug, Clone)]
pub struct KeyEstimate {
    /// Key and scale, e.g. "C major"
    pub name: String,
    /// Detection confidence in [0, 1]
    pub confidence: f64,
}

/// Summary descriptors extracted from the analysis segment
///
/// All values already normalized by the extractor; `loudness` is in dB.
#[derive(Debug, Clone, Default)]
pub struct Descriptors {
    pub energy: f64,
    pub loudness: f64,
    pub dynamic_complexity: f64,
    pub spectral_centroid: f64,
    pub dissonance: f64,
    pub danceability: f64,
    pub speechiness: f64,
    pub instrumentalness: f64,
    pub acousticness: f64,
    /// Scaled frame-energy variance score in [0, 1], input to liveness
    pub energy_variance: f64,
}

/// Port to the black-box DSP capability
///
/// Implementations receive decoded mono audio at the analysis sample rate.
/// Methods are independently failable; none return errors.
pub trait FeatureExtractor: Send + Sync {
    /// Tempo estimates from the available estimation sources
    fn tempo_candidates(
        &self,
        audio: &AudioBuffer,
    ) -> impl Future<Output = Vec<TempoCandidate>> + Send;

    /// Beat timestamps (seconds from buffer start), ascending
    fn beat_positions(&self, audio: &AudioBuffer) -> impl Future<Output = Option<Vec<f64>>> + Send;

    /// High-frequency-content onset curve
    fn onset_events(&self, audio: &AudioBuffer) -> impl Future<Output = Vec<OnsetEvent>> + Send;

    /// Per-frame signal energy over `frame_s` windows at `hop_s` hop
    fn energy_profile(
        &self,
        audio: &AudioBuffer,
        frame_s: f64,
        hop_s: f64,
    ) -> impl Future<Output = Vec<f64>> + Send;

    /// Low-pass (bass band) energy over `window_s` windows at `hop_s` hop
    fn bass_profile(
        &self,
        audio: &AudioBuffer,
        window_s: f64,
        hop_s: f64,
    ) -> impl Future<Output = Vec<f64>> + Send;

    /// Low-pass energy in a `window_s` window centered on each timestamp
    ///
    /// The result is aligned with `centers`; windows that cannot be
    /// evaluated come back as 0.0.
    fn bass_energy_at(
        &self,
        audio: &AudioBuffer,
        centers: &[f64],
        window_s: f64,
    ) -> impl Future<Output = Vec<f64>> + Send;

    /// Musical key with confidence
    fn key_estimate(&self, audio: &AudioBuffer) -> impl Future<Output = Option<KeyEstimate>> + Send;

    /// Summary descriptor set for the analysis segment
    fn descriptors(&self, audio: &AudioBuffer) -> impl Future<Output = Descriptors> + Send;

    /// Fixed-length unit-normalized similarity embedding
    fn embedding(&self, audio: &AudioBuffer) -> impl Future<Output = Option<Vec<f32>>> + Send;
}
