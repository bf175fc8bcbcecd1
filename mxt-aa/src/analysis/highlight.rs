//! Highlight (drop) location
//!
//! Two stages: a coarse pass picks the window with the highest rolling
//! mean energy, then a refinement pass walks the bass-band energy gradient
//! to the point of steepest increase ("the impact") and snaps to the
//! nearest strong percussive onset - the first kick of the drop.

use crate::analysis::extractor::FeatureExtractor;
use crate::audio::AudioBuffer;
use tracing::debug;

/// Frame/hop used for the coarse energy profile (seconds)
const COARSE_FRAME_S: f64 = 1.0;
const COARSE_HOP_S: f64 = 0.5;

/// Search band around the coarse segment start (seconds)
const REFINE_BEFORE_S: f64 = 5.0;
const REFINE_AFTER_S: f64 = 10.0;

/// Bass-band scan resolution inside the refinement band (seconds)
const BASS_WINDOW_S: f64 = 0.1;
const BASS_HOP_S: f64 = 0.05;

/// Onset search band around the impact (seconds)
const ONSET_BEFORE_S: f64 = 1.0;
const ONSET_AFTER_S: f64 = 2.0;

/// Minimum normalized onset strength to count as "the kick"
const ONSET_STRENGTH_FLOOR: f64 = 0.7;

/// The chosen analysis segment and the refined highlight inside it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighlightWindow {
    /// Segment start (seconds)
    pub start: f64,
    /// Refined highlight timestamp (seconds)
    pub center: f64,
    /// Segment duration (seconds)
    pub duration: f64,
}

/// Locates the most energetic segment of a track
#[derive(Debug, Clone)]
pub struct HighlightFinder {
    segment_duration: f64,
}

impl HighlightFinder {
    pub fn new(segment_duration: f64) -> Self {
        Self { segment_duration }
    }

    /// Locate and refine the highlight
    ///
    /// Never fails; every refinement stage has a coarser fallback, ending
    /// at the coarse segment midpoint.
    pub async fn locate<E: FeatureExtractor>(
        &self,
        audio: &AudioBuffer,
        extractor: &E,
    ) -> HighlightWindow {
        let duration = audio.duration_seconds();

        // Short track: the whole thing is the segment
        if duration <= self.segment_duration {
            return HighlightWindow {
                start: 0.0,
                center: round2(duration / 2.0),
                duration,
            };
        }

        let energies = extractor
            .energy_profile(audio, COARSE_FRAME_S, COARSE_HOP_S)
            .await;

        let coarse_start = match coarse_window_start(&energies, COARSE_HOP_S, self.segment_duration)
        {
            Some(start) => start,
            None => {
                // No energy profile at all: first segment, midpoint highlight
                return self.clamped(self.segment_duration / 2.0, duration);
            }
        };

        let center = self
            .refine(audio, extractor, coarse_start, duration)
            .await
            .unwrap_or(coarse_start + self.segment_duration / 2.0);

        self.clamped(center, duration)
    }

    /// Refine the coarse start to an exact transient
    async fn refine<E: FeatureExtractor>(
        &self,
        audio: &AudioBuffer,
        extractor: &E,
        coarse_start: f64,
        duration: f64,
    ) -> Option<f64> {
        let band_start = (coarse_start - REFINE_BEFORE_S).max(0.0);
        let band_end = (coarse_start + REFINE_AFTER_S).min(duration);
        let band = audio.slice_seconds(band_start, band_end);

        let bass = extractor.bass_profile(&band, BASS_WINDOW_S, BASS_HOP_S).await;
        let impact = impact_time(&bass, BASS_HOP_S).map(|t| band_start + t)?;

        // Snap to the earliest strong onset near the impact
        let onset_start = (impact - ONSET_BEFORE_S).max(0.0);
        let onset_end = (impact + ONSET_AFTER_S).min(duration);
        let onset_band = audio.slice_seconds(onset_start, onset_end);
        let onsets = extractor.onset_events(&onset_band).await;

        if let Some(time) = first_strong_onset(&onsets) {
            debug!(impact, onset = onset_start + time, "Highlight refined to onset");
            return Some(onset_start + time);
        }

        Some(impact)
    }

    /// Clamp the highlight so the extracted segment stays inside the track
    fn clamped(&self, center: f64, duration: f64) -> HighlightWindow {
        let half = self.segment_duration / 2.0;
        let center = center.clamp(half, duration - half);
        HighlightWindow {
            start: center - half,
            center: round2(center),
            duration: self.segment_duration,
        }
    }
}

/// Start time of the window with the highest rolling mean energy
fn coarse_window_start(energies: &[f64], hop_s: f64, segment_duration: f64) -> Option<f64> {
    if energies.is_empty() {
        return None;
    }

    let max = energies.iter().cloned().fold(f64::MIN, f64::max);
    if max <= 0.0 {
        return None;
    }
    let normalized: Vec<f64> = energies.iter().map(|e| e / max).collect();

    let window = ((segment_duration / hop_s).round() as usize)
        .clamp(1, normalized.len());

    // Rolling sum instead of re-summing every window
    let mut sum: f64 = normalized[..window].iter().sum();
    let mut best_idx = 0;
    let mut best_mean = sum / window as f64;
    for i in 1..=(normalized.len() - window) {
        sum += normalized[i + window - 1] - normalized[i - 1];
        let mean = sum / window as f64;
        if mean > best_mean {
            best_mean = mean;
            best_idx = i;
        }
    }

    Some(best_idx as f64 * hop_s)
}

/// Point of steepest rise in the (normalized, smoothed) bass energy curve
fn impact_time(bass: &[f64], hop_s: f64) -> Option<f64> {
    if bass.len() < 3 {
        return None;
    }

    let max = bass.iter().cloned().fold(f64::MIN, f64::max);
    if max <= 0.0 {
        return None;
    }
    let curve: Vec<f64> = bass.iter().map(|e| e / max).collect();

    // Central-difference gradient
    let n = curve.len();
    let mut gradient = vec![0.0; n];
    gradient[0] = curve[1] - curve[0];
    gradient[n - 1] = curve[n - 1] - curve[n - 2];
    for i in 1..n - 1 {
        gradient[i] = (curve[i + 1] - curve[i - 1]) / 2.0;
    }

    // 5-sample moving average
    let smoothed: Vec<f64> = (0..n)
        .map(|i| {
            let lo = i.saturating_sub(2);
            let hi = (i + 3).min(n);
            gradient[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        })
        .collect();

    let best = smoothed
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?
        .0;

    Some(best as f64 * hop_s)
}

/// Earliest onset above the strength floor, else earliest onset at all
fn first_strong_onset(onsets: &[crate::analysis::extractor::OnsetEvent]) -> Option<f64> {
    if onsets.is_empty() {
        return None;
    }

    let max = onsets
        .iter()
        .map(|o| o.strength)
        .fold(f64::MIN, f64::max);
    if max > 0.0 {
        let strong = onsets
            .iter()
            .filter(|o| o.strength / max > ONSET_STRENGTH_FLOOR)
            .map(|o| o.time)
            .fold(f64::INFINITY, f64::min);
        if strong.is_finite() {
            return Some(strong);
        }
    }

    onsets
        .iter()
        .map(|o| o.time)
        .min_by(|a, b| a.total_cmp(b))
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
