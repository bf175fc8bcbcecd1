//! Per-track analysis engine
//!
//! Orchestrates one track's journey from compressed bytes to an
//! [`AnalysisResult`]: decode, highlight location, segment extraction,
//! tempo consensus, downbeat detection, key/descriptor extraction, and the
//! derived metrics. Decoding is CPU-bound and runs on the blocking pool.

use crate::analysis::consensus::{candidate_from_beats, TempoConsensus};
use crate::analysis::downbeat;
use crate::analysis::extractor::FeatureExtractor;
use crate::analysis::highlight::HighlightFinder;
use crate::analysis::AnalysisError;
use crate::audio;
use crate::models::AnalysisResult;
use tracing::debug;

/// Payloads smaller than this cannot be valid compressed audio
const MIN_PAYLOAD_BYTES: usize = 1000;

/// Minimum decoded duration (seconds); shorter input starves the FFT
const MIN_DURATION_S: f64 = 3.0;

/// Analysis FFT frame size; the segment must cover at least two frames
const FRAME_SIZE: usize = 4096;

/// Analyzes one track's audio end to end
pub struct AnalysisEngine<E> {
    extractor: E,
    consensus: TempoConsensus,
    highlight: HighlightFinder,
}

impl<E: FeatureExtractor> AnalysisEngine<E> {
    pub fn new(extractor: E, segment_duration: f64, consensus: TempoConsensus) -> Self {
        Self {
            extractor,
            consensus,
            highlight: HighlightFinder::new(segment_duration),
        }
    }

    /// Analyze a compressed audio payload
    pub async fn analyze_bytes(&self, bytes: Vec<u8>) -> Result<AnalysisResult, AnalysisError> {
        if bytes.len() < MIN_PAYLOAD_BYTES {
            return Err(AnalysisError::PayloadTooSmall(bytes.len()));
        }

        let full = tokio::task::spawn_blocking(move || audio::decode_bytes(&bytes))
            .await
            .map_err(|e| AnalysisError::Internal(e.to_string()))?
            .map_err(|e| AnalysisError::Decode(format!("{:#}", e)))?;

        if full.is_empty() {
            return Err(AnalysisError::EmptyAudio);
        }

        let duration = full.duration_seconds();
        if duration < MIN_DURATION_S {
            return Err(AnalysisError::TooShort(duration));
        }

        // Highlight + analysis segment
        let window = self.highlight.locate(&full, &self.extractor).await;
        let segment = full.slice_seconds(window.start, window.start + window.duration);
        if segment.samples.len() < FRAME_SIZE * 2 {
            return Err(AnalysisError::SegmentTooShort(segment.duration_seconds()));
        }

        // Rhythm: gather candidates (plus the beat-interval derivation)
        // and resolve the consensus
        let mut candidates = self.extractor.tempo_candidates(&segment).await;
        let beats = self.extractor.beat_positions(&segment).await;
        if let Some(beats) = &beats {
            if let Some(candidate) = candidate_from_beats(beats) {
                candidates.push(candidate);
            }
        }
        let (bpm, bpm_confidence) = self.consensus.resolve(&candidates, beats.as_deref());

        // Downbeat phase: at the drop, then from the segment start, then
        // from the consensus beat sequence
        let mut beat_offset =
            downbeat::detect(&full, window.center, bpm, &self.extractor).await;
        if beat_offset.is_none() {
            beat_offset = downbeat::detect(&segment, 0.0, bpm, &self.extractor).await;
        }
        if beat_offset.is_none() {
            if let Some(first) = beats.as_ref().and_then(|b| b.first()) {
                beat_offset = Some(downbeat::phase_of(*first, 60.0 / bpm));
            }
        }

        // Tonal: a missing estimate degrades, it does not fail the track
        let (key_detected, key_confidence) = match self.extractor.key_estimate(&segment).await {
            Some(key) => (key.name, round3(key.confidence.clamp(0.0, 1.0))),
            None => ("unknown".to_string(), 0.0),
        };

        let d = self.extractor.descriptors(&segment).await;
        let valence = derive_valence(&key_detected, bpm, d.spectral_centroid);
        let liveness = derive_liveness(d.dynamic_complexity, d.energy_variance);

        // Embedding runs on the full track for a whole-song representation
        let embedding = self.extractor.embedding(&full).await;

        debug!(
            bpm,
            key = %key_detected,
            highlight = window.center,
            has_offset = beat_offset.is_some(),
            "Track analysis complete"
        );

        Ok(AnalysisResult {
            bpm,
            bpm_confidence,
            beat_offset,
            key_detected,
            key_confidence,
            energy: d.energy,
            loudness: d.loudness,
            dynamic_complexity: d.dynamic_complexity,
            spectral_centroid: d.spectral_centroid,
            dissonance: d.dissonance,
            danceability: d.danceability,
            speechiness: d.speechiness,
            instrumentalness: d.instrumentalness,
            acousticness: d.acousticness,
            valence,
            liveness,
            highlight_time: window.center,
            embedding,
        })
    }
}

/// Musical positivity from key mode, tempo, and brightness
fn derive_valence(key: &str, bpm: f64, spectral_centroid: f64) -> f64 {
    let key_valence = if key.to_lowercase().contains("major") {
        0.7
    } else {
        0.3
    };
    let tempo_valence = ((bpm - 60.0) / 140.0).clamp(0.0, 1.0);
    round3(key_valence * 0.4 + tempo_valence * 0.35 + spectral_centroid * 0.25)
}

/// Live-recording probability from dynamics and energy variance
fn derive_liveness(dynamic_complexity: f64, energy_variance: f64) -> f64 {
    round3((dynamic_complexity * 0.5 + energy_variance * 0.5).clamp(0.0, 1.0))
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::extractor::{Descriptors, KeyEstimate, TempoCandidate};
    use crate::analysis::testing::StubExtractor;

    /// In-memory mono WAV of a 220 Hz tone
    fn wav_bytes(seconds: f64) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let n = (seconds * 44_100.0) as usize;
            for i in 0..n {
                let t = i as f64 / 44_100.0;
                let sample = (2.0 * std::f64::consts::PI * 220.0 * t).sin();
                writer.write_sample((sample * 20_000.0) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn engine_with(stub: StubExtractor) -> AnalysisEngine<StubExtractor> {
        AnalysisEngine::new(stub, 45.0, TempoConsensus::default())
    }

    #[tokio::test]
    async fn tiny_payload_is_rejected() {
        let engine = engine_with(StubExtractor::default());
        let err = engine.analyze_bytes(vec![0u8; 100]).await.unwrap_err();
        assert!(matches!(err, AnalysisError::PayloadTooSmall(100)));
    }

    #[tokio::test]
    async fn too_short_audio_is_rejected() {
        let engine = engine_with(StubExtractor::default());
        let err = engine.analyze_bytes(wav_bytes(1.0)).await.unwrap_err();
        assert!(matches!(err, AnalysisError::TooShort(_)));
    }

    #[tokio::test]
    async fn full_pipeline_produces_a_result() {
        let stub = StubExtractor {
            candidates: vec![
                TempoCandidate::new(128.0, 0.9, "cnn"),
                TempoCandidate::new(64.0, 0.6, "multi"),
            ],
            key: Some(KeyEstimate {
                name: "A minor".to_string(),
                confidence: 0.8,
            }),
            descriptors: Descriptors {
                energy: 0.6,
                loudness: -7.5,
                dynamic_complexity: 0.4,
                spectral_centroid: 0.3,
                dissonance: 0.2,
                danceability: 0.7,
                speechiness: 0.1,
                instrumentalness: 0.9,
                acousticness: 0.2,
                energy_variance: 0.2,
            },
            embedding: Some(vec![0.5, 0.5, 0.5, 0.5]),
            ..Default::default()
        };

        let engine = engine_with(stub);
        let result = engine.analyze_bytes(wav_bytes(30.0)).await.unwrap();

        assert_eq!(result.bpm, 128.0);
        assert!(result.bpm_confidence > 0.9);
        assert_eq!(result.key_detected, "A minor");
        assert_eq!(result.key_confidence, 0.8);
        // 30s track is shorter than the 45s segment: midpoint highlight
        assert_eq!(result.highlight_time, 15.0);
        assert!(result.beat_offset.is_none());
        assert_eq!(result.embedding.as_ref().unwrap().len(), 4);
        // minor key, 128 bpm, centroid 0.3
        assert!((result.valence - 0.365).abs() < 0.001);
        assert!((result.liveness - 0.3).abs() < 0.001);
    }

    #[tokio::test]
    async fn no_estimates_degrade_instead_of_failing() {
        let engine = engine_with(StubExtractor::default());
        let result = engine.analyze_bytes(wav_bytes(20.0)).await.unwrap();

        assert_eq!(result.bpm, 120.0);
        assert_eq!(result.bpm_confidence, 0.0);
        assert_eq!(result.key_detected, "unknown");
        assert_eq!(result.key_confidence, 0.0);
        assert!(result.beat_offset.is_none());
        assert!(result.embedding.is_none());
    }

    #[tokio::test]
    async fn beat_offset_falls_back_to_the_first_tracked_beat() {
        // Beat tracking succeeds on the segment but the downbeat vote has
        // nothing to measure (no bass energies): the engine still derives
        // a phase. 7 beats stays under the downbeat detector's minimum so
        // only the final first-beat fallback can produce it.
        let beats: Vec<f64> = (0..7).map(|k| 0.3 + k as f64 * 0.5).collect();
        let stub = StubExtractor {
            candidates: vec![TempoCandidate::new(120.0, 0.9, "cnn")],
            beats: Some(beats),
            ..Default::default()
        };

        let engine = engine_with(stub);
        let result = engine.analyze_bytes(wav_bytes(30.0)).await.unwrap();

        assert_eq!(result.bpm, 120.0);
        let offset = result.beat_offset.unwrap();
        assert!((offset - 0.3).abs() < 0.001);
    }

    #[test]
    fn valence_prefers_major_keys_and_brightness() {
        let major = derive_valence("C major", 120.0, 0.5);
        let minor = derive_valence("C minor", 120.0, 0.5);
        assert!(major > minor);

        let bright = derive_valence("C major", 120.0, 0.9);
        let dark = derive_valence("C major", 120.0, 0.1);
        assert!(bright > dark);
    }

    #[test]
    fn liveness_is_clamped() {
        assert_eq!(derive_liveness(2.0, 2.0), 1.0);
        assert_eq!(derive_liveness(0.0, 0.0), 0.0);
    }
}
