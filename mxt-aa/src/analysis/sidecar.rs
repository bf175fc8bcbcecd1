//! Sidecar DSP extractor
//!
//! The spectral/rhythm/key primitives come from a native analysis library
//! with no Rust equivalent, wrapped by a companion command-line tool. Each
//! capability is one invocation: temp WAV in, JSON out. The tool is
//! resolved from PATH (or configured explicitly); any invocation failure
//! degrades to "no estimate" per the port contract.

use crate::analysis::extractor::{
    Descriptors, FeatureExtractor, KeyEstimate, OnsetEvent, TempoCandidate,
};
use crate::audio::AudioBuffer;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

/// Hard ceiling on one sidecar invocation
const INVOKE_TIMEOUT: Duration = Duration::from_secs(120);

/// Feature extractor backed by the DSP sidecar tool
pub struct SidecarExtractor {
    command: String,
    temp_dir: PathBuf,
}

impl SidecarExtractor {
    pub fn new(command: impl Into<String>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            temp_dir: temp_dir.into(),
        }
    }

    /// Check whether the sidecar binary responds at all
    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.command)
            .arg("--version")
            .output()
            .is_ok()
    }

    /// Run one sidecar verb against an audio buffer, returning the parsed
    /// JSON output or `None` on any failure
    async fn invoke(
        &self,
        verb: &str,
        audio: &AudioBuffer,
        extra: &[String],
    ) -> Option<serde_json::Value> {
        if let Err(e) = std::fs::create_dir_all(&self.temp_dir) {
            warn!(verb, error = %e, "Cannot create sidecar temp dir");
            return None;
        }

        let dir = match tempfile::Builder::new()
            .prefix("mxt-dsp-")
            .tempdir_in(&self.temp_dir)
        {
            Ok(dir) => dir,
            Err(e) => {
                warn!(verb, error = %e, "Cannot create sidecar temp dir");
                return None;
            }
        };

        let wav_path = dir.path().join("input.wav");
        let json_path = dir.path().join("features.json");

        if let Err(e) = write_wav(&wav_path, audio).await {
            warn!(verb, error = %e, "Cannot write sidecar input");
            return None;
        }

        let output = tokio::time::timeout(
            INVOKE_TIMEOUT,
            Command::new(&self.command)
                .arg(verb)
                .arg(&wav_path)
                .arg(&json_path)
                .args(extra)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let result = match output {
            Err(_) => {
                warn!(verb, "Sidecar timed out");
                None
            }
            Ok(Err(e)) => {
                warn!(verb, error = %e, "Sidecar failed to launch");
                None
            }
            Ok(Ok(out)) if !out.status.success() => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                warn!(verb, code = ?out.status.code(), %stderr, "Sidecar exited with error");
                None
            }
            Ok(Ok(_)) => match tokio::fs::read_to_string(&json_path).await {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!(verb, error = %e, "Cannot parse sidecar output");
                        None
                    }
                },
                Err(e) => {
                    warn!(verb, error = %e, "Cannot read sidecar output");
                    None
                }
            },
        };

        if let Err(e) = dir.close() {
            warn!(error = %e, "Sidecar temp cleanup failed");
        }

        result
    }
}

/// Write mono f32 samples as 16-bit PCM WAV (blocking pool)
async fn write_wav(path: &Path, audio: &AudioBuffer) -> anyhow::Result<()> {
    let path = path.to_path_buf();
    let samples = audio.samples.clone();
    let sample_rate = audio.sample_rate;

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;
        for sample in samples {
            writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
        Ok(())
    })
    .await?
}

// ---------------------------------------------------------------------------
// Sidecar output shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TempoOutput {
    #[serde(default)]
    candidates: Vec<TempoCandidateOutput>,
}

#[derive(Debug, Deserialize)]
struct TempoCandidateOutput {
    bpm: f64,
    confidence: f64,
    source: String,
}

#[derive(Debug, Deserialize)]
struct BeatsOutput {
    beats: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct OnsetsOutput {
    #[serde(default)]
    onsets: Vec<OnsetEvent>,
}

#[derive(Debug, Deserialize)]
struct EnergiesOutput {
    #[serde(default)]
    energies: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct KeyOutput {
    key: String,
    scale: String,
    strength: f64,
}

/// Summary feature block; individual fields may be missing when the
/// corresponding extractor failed inside the sidecar
#[derive(Debug, Default, Deserialize)]
struct FeaturesOutput {
    #[serde(default)]
    energy: f64,
    #[serde(default)]
    loudness: f64,
    #[serde(default)]
    dynamic_complexity: f64,
    #[serde(default)]
    spectral_centroid: f64,
    #[serde(default)]
    dissonance: f64,
    #[serde(default)]
    danceability: f64,
    #[serde(default)]
    speechiness: f64,
    #[serde(default)]
    instrumentalness: f64,
    #[serde(default)]
    acousticness: f64,
    #[serde(default)]
    energy_variance: f64,
}

#[derive(Debug, Deserialize)]
struct EmbeddingOutput {
    embedding: Vec<f32>,
}

impl From<FeaturesOutput> for Descriptors {
    fn from(f: FeaturesOutput) -> Self {
        Descriptors {
            energy: f.energy,
            loudness: f.loudness,
            dynamic_complexity: f.dynamic_complexity,
            spectral_centroid: f.spectral_centroid,
            dissonance: f.dissonance,
            danceability: f.danceability,
            speechiness: f.speechiness,
            instrumentalness: f.instrumentalness,
            acousticness: f.acousticness,
            energy_variance: f.energy_variance,
        }
    }
}

impl FeatureExtractor for SidecarExtractor {
    async fn tempo_candidates(&self, audio: &AudioBuffer) -> Vec<TempoCandidate> {
        let Some(value) = self.invoke("tempo", audio, &[]).await else {
            return Vec::new();
        };
        match serde_json::from_value::<TempoOutput>(value) {
            Ok(out) => out
                .candidates
                .into_iter()
                .filter(|c| c.bpm > 0.0)
                .map(|c| TempoCandidate::new(c.bpm, c.confidence.clamp(0.0, 1.0), c.source))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Malformed tempo output");
                Vec::new()
            }
        }
    }

    async fn beat_positions(&self, audio: &AudioBuffer) -> Option<Vec<f64>> {
        let value = self.invoke("beats", audio, &[]).await?;
        match serde_json::from_value::<BeatsOutput>(value) {
            Ok(out) if !out.beats.is_empty() => Some(out.beats),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Malformed beats output");
                None
            }
        }
    }

    async fn onset_events(&self, audio: &AudioBuffer) -> Vec<OnsetEvent> {
        let Some(value) = self.invoke("onsets", audio, &[]).await else {
            return Vec::new();
        };
        serde_json::from_value::<OnsetsOutput>(value)
            .map(|o| o.onsets)
            .unwrap_or_default()
    }

    async fn energy_profile(&self, audio: &AudioBuffer, frame_s: f64, hop_s: f64) -> Vec<f64> {
        let args = vec![
            "--frame".to_string(),
            frame_s.to_string(),
            "--hop".to_string(),
            hop_s.to_string(),
        ];
        let Some(value) = self.invoke("energy", audio, &args).await else {
            return Vec::new();
        };
        serde_json::from_value::<EnergiesOutput>(value)
            .map(|o| o.energies)
            .unwrap_or_default()
    }

    async fn bass_profile(&self, audio: &AudioBuffer, window_s: f64, hop_s: f64) -> Vec<f64> {
        let args = vec![
            "--window".to_string(),
            window_s.to_string(),
            "--hop".to_string(),
            hop_s.to_string(),
        ];
        let Some(value) = self.invoke("bassband", audio, &args).await else {
            return Vec::new();
        };
        serde_json::from_value::<EnergiesOutput>(value)
            .map(|o| o.energies)
            .unwrap_or_default()
    }

    async fn bass_energy_at(
        &self,
        audio: &AudioBuffer,
        centers: &[f64],
        window_s: f64,
    ) -> Vec<f64> {
        let at = centers
            .iter()
            .map(|c| format!("{:.4}", c))
            .collect::<Vec<_>>()
            .join(",");
        let args = vec![
            "--window".to_string(),
            window_s.to_string(),
            "--at".to_string(),
            at,
        ];
        let energies = match self.invoke("bassband", audio, &args).await {
            Some(value) => serde_json::from_value::<EnergiesOutput>(value)
                .map(|o| o.energies)
                .unwrap_or_default(),
            None => Vec::new(),
        };

        // The contract aligns the result with `centers`
        if energies.len() == centers.len() {
            energies
        } else {
            vec![0.0; centers.len()]
        }
    }

    async fn key_estimate(&self, audio: &AudioBuffer) -> Option<KeyEstimate> {
        let value = self.invoke("key", audio, &[]).await?;
        match serde_json::from_value::<KeyOutput>(value) {
            Ok(out) => Some(KeyEstimate {
                name: format!("{} {}", out.key, out.scale),
                confidence: out.strength.clamp(0.0, 1.0),
            }),
            Err(e) => {
                warn!(error = %e, "Malformed key output");
                None
            }
        }
    }

    async fn descriptors(&self, audio: &AudioBuffer) -> Descriptors {
        let Some(value) = self.invoke("features", audio, &[]).await else {
            return Descriptors::default();
        };
        serde_json::from_value::<FeaturesOutput>(value)
            .map(Descriptors::from)
            .unwrap_or_default()
    }

    async fn embedding(&self, audio: &AudioBuffer) -> Option<Vec<f32>> {
        let value = self.invoke("embedding", audio, &[]).await?;
        match serde_json::from_value::<EmbeddingOutput>(value) {
            Ok(out) if !out.embedding.is_empty() => Some(out.embedding),
            _ => None,
        }
    }
}
