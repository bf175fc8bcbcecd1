//! Downbeat (beat phase) detection
//!
//! In 4/4 material the downbeat carries more kick/bass energy than the
//! other three beats. Beats tracked near the highlight are grouped into
//! four metrical positions; the position with the highest average bass
//! energy is the downbeat, and the phase of its first beat within one beat
//! period is the offset.

use crate::analysis::extractor::FeatureExtractor;
use crate::audio::AudioBuffer;
use tracing::debug;

/// Seconds of audio taken before/after the highlight
const LEAD_IN_S: f64 = 1.0;
const LEAD_OUT_S: f64 = 20.0;

/// Minimum usable window length (seconds)
const MIN_WINDOW_S: f64 = 4.0;

/// Minimum tracked beats for a phase decision
const MIN_BEATS: usize = 8;

/// Beats analyzed for bass energy (8 bars of 4/4)
const MAX_BEATS: usize = 32;

/// Bass measurement window centered on each beat (seconds)
const BEAT_WINDOW_S: f64 = 0.03;

/// Required spread between the strongest and weakest position, as a
/// fraction of the strongest; below this the energy is too uniform to
/// discriminate and position 0 is assumed
const MIN_SPREAD: f64 = 0.1;

/// Detect the downbeat phase near `highlight_time`
///
/// Returns the offset in seconds within one beat period, or `None` when
/// the window is too short or too few beats are tracked. Failure is a
/// normal outcome here, not an error; callers persist the absence.
pub async fn detect<E: FeatureExtractor>(
    audio: &AudioBuffer,
    highlight_time: f64,
    bpm: f64,
    extractor: &E,
) -> Option<f64> {
    if bpm <= 0.0 {
        return None;
    }

    let duration = audio.duration_seconds();
    let window_start = (highlight_time - LEAD_IN_S).max(0.0);
    let window_end = (highlight_time + LEAD_OUT_S).min(duration);
    let window = audio.slice_seconds(window_start, window_end);

    if window.duration_seconds() < MIN_WINDOW_S {
        return None;
    }

    let beats = extractor.beat_positions(&window).await?;
    if beats.len() < MIN_BEATS {
        return None;
    }

    let beat_interval = 60.0 / bpm;

    let analyzed = &beats[..beats.len().min(MAX_BEATS)];
    let energies = extractor
        .bass_energy_at(&window, analyzed, BEAT_WINDOW_S)
        .await;

    // Keep beats whose measurement window fits inside the audio
    let half = BEAT_WINDOW_S / 2.0;
    let window_len = window.duration_seconds();
    let measured: Vec<(f64, f64)> = analyzed
        .iter()
        .zip(energies)
        .filter(|(&t, _)| t - half >= 0.0 && t + half <= window_len)
        .map(|(&t, e)| (t, e))
        .collect();

    if measured.len() < MIN_BEATS {
        // Not enough measurements to vote; phase of the first beat
        return Some(phase_of(beats[0] + window_start, beat_interval));
    }

    // Group by metrical position relative to the first measured beat
    let first_beat = measured[0].0;
    let mut groups: [Vec<(f64, f64)>; 4] = Default::default();
    for &(t, e) in &measured {
        let steps = (t - first_beat) / beat_interval;
        let position = (steps.round() as i64).rem_euclid(4) as usize;
        groups[position].push((t, e));
    }

    let averages: Vec<f64> = groups
        .iter()
        .map(|g| {
            if g.is_empty() {
                0.0
            } else {
                g.iter().map(|(_, e)| e).sum::<f64>() / g.len() as f64
            }
        })
        .collect();

    let max = averages.iter().cloned().fold(f64::MIN, f64::max);
    let min = averages.iter().cloned().fold(f64::MAX, f64::min);

    let downbeat_position = if max > 0.0 && (max - min) / max > MIN_SPREAD {
        averages
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0)
    } else {
        0
    };

    debug!(
        downbeat_position,
        spread = if max > 0.0 { (max - min) / max } else { 0.0 },
        "Downbeat vote"
    );

    let offset = match groups[downbeat_position].first() {
        Some(&(t, _)) => phase_of(t + window_start, beat_interval),
        None => phase_of(beats[0] + window_start, beat_interval),
    };

    Some(offset)
}

/// Absolute time folded into one beat period, millisecond precision
pub(crate) fn phase_of(time: f64, beat_interval: f64) -> f64 {
    let phase = time.rem_euclid(beat_interval);
    let rounded = (phase * 1000.0).round() / 1000.0;
    // Millisecond rounding can land exactly on the next beat; wrap to 0
    if rounded >= beat_interval {
        0.0
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testing::StubExtractor;
    use crate::audio::ANALYSIS_SAMPLE_RATE;

    fn silent_audio(seconds: f64) -> AudioBuffer {
        AudioBuffer {
            samples: vec![0.0; (seconds * ANALYSIS_SAMPLE_RATE as f64) as usize],
            sample_rate: ANALYSIS_SAMPLE_RATE,
        }
    }

    #[tokio::test]
    async fn too_little_audio_is_unavailable() {
        let stub = StubExtractor::default();
        let audio = silent_audio(3.0);
        assert!(detect(&audio, 1.0, 128.0, &stub).await.is_none());
    }

    #[tokio::test]
    async fn too_few_beats_is_unavailable() {
        let stub = StubExtractor {
            beats: Some(vec![0.5, 1.0, 1.5, 2.0, 2.5]),
            ..Default::default()
        };
        let audio = silent_audio(60.0);
        assert!(detect(&audio, 10.0, 120.0, &stub).await.is_none());
    }

    #[tokio::test]
    async fn no_beat_tracking_is_unavailable() {
        let stub = StubExtractor::default();
        let audio = silent_audio(60.0);
        assert!(detect(&audio, 10.0, 120.0, &stub).await.is_none());
    }

    /// Beats spaced slightly wider than the nominal interval, with bass
    /// accents every fourth beat starting at the third: the accented
    /// position must win and shift the reported phase.
    #[tokio::test]
    async fn accented_position_sets_the_phase() {
        let beats: Vec<f64> = (0..16).map(|k| 0.2 + k as f64 * 0.51).collect();
        let stub = StubExtractor {
            beats: Some(beats),
            bass_at_fn: Some(Box::new(|times: &[f64]| {
                times
                    .iter()
                    .map(|t| {
                        let k = ((t - 0.2) / 0.51).round() as i64;
                        if k.rem_euclid(4) == 2 {
                            1.0
                        } else {
                            0.1
                        }
                    })
                    .collect()
            })),
            ..Default::default()
        };

        let audio = silent_audio(60.0);
        // window starts at 9.0; first accented beat at 0.2 + 2*0.51 = 1.22
        let offset = detect(&audio, 10.0, 120.0, &stub).await.unwrap();
        assert!((offset - 0.22).abs() < 0.002, "offset = {}", offset);
    }

    #[tokio::test]
    async fn uniform_energy_defaults_to_position_zero() {
        let beats: Vec<f64> = (0..16).map(|k| 0.2 + k as f64 * 0.51).collect();
        let stub = StubExtractor {
            beats: Some(beats),
            bass_at_fn: Some(Box::new(|times: &[f64]| vec![0.5; times.len()])),
            ..Default::default()
        };

        let audio = silent_audio(60.0);
        // position 0 -> first beat at 0.2, absolute 9.2, phase 0.2
        let offset = detect(&audio, 10.0, 120.0, &stub).await.unwrap();
        assert!((offset - 0.2).abs() < 0.002, "offset = {}", offset);
    }

    #[tokio::test]
    async fn offset_is_always_inside_one_beat_period() {
        for bpm in [90.0, 120.0, 128.0, 174.0] {
            let beats: Vec<f64> = (0..24).map(|k| 0.37 + k as f64 * (60.0 / bpm)).collect();
            let stub = StubExtractor {
                beats: Some(beats),
                bass_at_fn: Some(Box::new(|times: &[f64]| {
                    times.iter().map(|t| (t * 7.0).sin().abs()).collect()
                })),
                ..Default::default()
            };

            let audio = silent_audio(120.0);
            let offset = detect(&audio, 30.0, bpm, &stub).await.unwrap();
            assert!(offset >= 0.0);
            assert!(offset < 60.0 / bpm, "offset {} at {} bpm", offset, bpm);
        }
    }

    #[test]
    fn phase_wraps_when_rounding_reaches_the_interval() {
        let interval = 0.46875;
        // 0.4686 rounds to 0.469, which would leave the [0, interval) range
        assert_eq!(phase_of(0.4686, interval), 0.0);
    }
}
