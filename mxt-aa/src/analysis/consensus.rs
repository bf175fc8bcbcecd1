//! Multi-estimator tempo consensus
//!
//! Tempo estimators disagree in characteristic ways: half/double-tempo
//! octave errors and method-specific noise. The consensus normalizes all
//! candidates into one octave band, rewards values that independent
//! estimators converge on, and optionally refines the winner against the
//! observed beat-to-beat intervals.

use crate::analysis::extractor::TempoCandidate;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// BPM returned when no estimator produced a candidate
pub const FALLBACK_BPM: f64 = 120.0;

/// Octave band all candidates are normalized into: [100, 200)
const BAND_LOW: f64 = 100.0;
const BAND_HIGH: f64 = 200.0;

/// Ratio tolerance for two candidates to count as agreeing (±4%)
const AGREEMENT_TOLERANCE: f64 = 0.04;

/// Share of an agreeing peer's confidence added to a candidate's score
const AGREEMENT_BONUS: f64 = 0.3;

/// Default per-source confidence multipliers
///
/// The neural-network estimator has empirically much better accuracy than
/// the classical methods, so its confidence counts triple; the
/// general-purpose heuristics count at 0.7.
pub static DEFAULT_SOURCE_WEIGHTS: Lazy<HashMap<String, f64>> = Lazy::new(|| {
    HashMap::from([
        ("cnn".to_string(), 3.0),
        ("multi".to_string(), 0.7),
        ("degara".to_string(), 0.7),
        ("loop".to_string(), 1.0),
        ("beats".to_string(), 1.0),
    ])
});

/// Combines independent tempo candidates into one BPM + confidence
#[derive(Debug, Clone)]
pub struct TempoConsensus {
    weights: HashMap<String, f64>,
}

impl Default for TempoConsensus {
    fn default() -> Self {
        Self::with_weights(DEFAULT_SOURCE_WEIGHTS.clone())
    }
}

impl TempoConsensus {
    pub fn with_weights(weights: HashMap<String, f64>) -> Self {
        Self { weights }
    }

    /// Resolve a set of candidates (and optional beat timestamps) into
    /// `(bpm, confidence)`
    ///
    /// Never fails: an empty candidate set yields the fallback BPM with
    /// confidence 0. The returned BPM is a whole number; fractional tempo
    /// would drift any fixed beat grid derived downstream.
    pub fn resolve(&self, candidates: &[TempoCandidate], beats: Option<&[f64]>) -> (f64, f64) {
        let normalized: Vec<(f64, f64)> = candidates
            .iter()
            .filter(|c| c.bpm > 0.0)
            .map(|c| {
                let weight = self.weights.get(&c.source).copied().unwrap_or(1.0);
                (normalize_octave(c.bpm), c.confidence * weight)
            })
            .collect();

        if normalized.is_empty() {
            return (FALLBACK_BPM, 0.0);
        }

        // Score each candidate: own weighted confidence plus a share of
        // every agreeing peer's.
        let mut best_bpm = 0.0;
        let mut best_score = f64::MIN;
        for (i, &(bpm_i, conf_i)) in normalized.iter().enumerate() {
            let mut score = conf_i;
            for (j, &(bpm_j, conf_j)) in normalized.iter().enumerate() {
                if i != j && octave_similar(bpm_i, bpm_j) {
                    score += conf_j * AGREEMENT_BONUS;
                }
            }
            if score > best_score {
                best_score = score;
                best_bpm = bpm_i;
            }
        }

        // Refine against beat intervals when a dense beat sequence exists.
        // Applied before rounding so interval evidence can still move the
        // integer tempo by one.
        if let Some(beats) = beats {
            if let Some(refined) = refine_from_intervals(best_bpm, beats) {
                best_bpm = refined;
            }
        }

        let confidence = (best_score / 3.0).min(1.0);
        (best_bpm.round(), round3(confidence))
    }
}

/// Fold a BPM into the [100, 200) octave band
fn normalize_octave(mut bpm: f64) -> f64 {
    while bpm < BAND_LOW {
        bpm *= 2.0;
    }
    while bpm >= BAND_HIGH {
        bpm /= 2.0;
    }
    bpm
}

/// Two tempi agree when their ratio, tested against {1, 2, 0.5} to catch
/// residual octave drift, lands within the tolerance of 1.0
fn octave_similar(a: f64, b: f64) -> bool {
    if b == 0.0 {
        return false;
    }
    let ratio = a / b;
    [1.0, 2.0, 0.5]
        .iter()
        .any(|m| (ratio * m - 1.0).abs() <= AGREEMENT_TOLERANCE)
}

/// Recompute BPM from beat intervals near the winner's implied interval
///
/// Only intervals within ±5% of 60/bpm participate, and the refinement is
/// accepted only when it moves the tempo by less than 1 BPM; a noisy
/// interval subset must not override the estimator consensus.
fn refine_from_intervals(bpm: f64, beats: &[f64]) -> Option<f64> {
    if beats.len() <= 10 || bpm <= 0.0 {
        return None;
    }

    let target = 60.0 / bpm;
    let matching: Vec<f64> = beats
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|&iv| iv > 0.0 && (iv - target).abs() <= target * 0.05)
        .collect();

    if matching.is_empty() {
        return None;
    }

    let mean = matching.iter().sum::<f64>() / matching.len() as f64;
    let refined = 60.0 / mean;
    ((refined - bpm).abs() < 1.0).then_some(refined)
}

/// Derive a tempo candidate from raw beat timestamps
///
/// Median of the plausible beat-to-beat intervals (0.25-2.0 s, i.e.
/// 30-240 BPM); needs more than two surviving intervals. Carries a fixed
/// confidence of 0.6 under the "beats" tag.
pub fn candidate_from_beats(beats: &[f64]) -> Option<TempoCandidate> {
    if beats.len() < 3 {
        return None;
    }

    let mut intervals: Vec<f64> = beats
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|&iv| iv > 0.25 && iv < 2.0)
        .collect();

    if intervals.len() <= 2 {
        return None;
    }

    intervals.sort_by(|a, b| a.total_cmp(b));
    let median = intervals[intervals.len() / 2];
    Some(TempoCandidate::new(60.0 / median, 0.6, "beats"))
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}
