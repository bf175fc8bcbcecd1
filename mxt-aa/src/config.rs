//! Configuration for mxt-aa
//!
//! TOML file (located via `MIXTIDE_AA_CONFIG` or the platform config
//! directory) with compiled-in defaults for everything non-secret;
//! secrets can be supplied through environment variables instead.

use crate::analysis::consensus::DEFAULT_SOURCE_WEIGHTS;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

const CONFIG_ENV_VAR: &str = "MIXTIDE_AA_CONFIG";
const CONFIG_MODULE: &str = "mxt-aa";

/// Primary platform API access
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Base URL of the platform's v2 API
    pub api_base_url: String,
    /// Client id for API resolution and streaming
    pub client_id: Option<String>,
    /// OAuth token, preferred over client_id by the extractor tool
    pub oauth_token: Option<String>,
    /// Optional proxy for bypassing IP blocks
    pub proxy_url: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api-v2.soundcloud.com".to_string(),
            client_id: None,
            oauth_token: None,
            proxy_url: None,
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub host: String,
    pub port: u16,

    /// SQLite catalog location
    pub database_path: PathBuf,

    /// Scratch space for downloads and sidecar exchanges
    pub temp_dir: PathBuf,

    pub platform: PlatformConfig,

    /// Generic extractor tool command
    pub ytdlp_path: String,

    /// DSP sidecar command
    pub sidecar_path: String,

    /// Length of the analyzed segment (seconds); 45 s is enough for
    /// stable tempo/key accuracy
    pub segment_duration_seconds: f64,

    /// Ceiling on one track's transfer + analysis (seconds)
    pub task_timeout_seconds: u64,

    /// CPU-bound analysis concurrency cap
    pub max_concurrent_analyses: usize,

    /// Transfer permits per analysis permit; transfers are I/O-bound and
    /// tolerate far higher parallelism
    pub transfer_slots_multiplier: usize,

    /// Payloads below this are treated as disguised error pages
    pub min_audio_bytes: usize,

    /// Wait between catalog polls while queued tracks land (milliseconds)
    pub queue_poll_interval_ms: u64,

    /// Per-source tempo confidence multipliers
    pub tempo_weights: HashMap<String, f64>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5731,
            database_path: default_database_path(),
            temp_dir: std::env::temp_dir().join("mixtide"),
            platform: PlatformConfig::default(),
            ytdlp_path: "yt-dlp".to_string(),
            sidecar_path: "mixtide-dsp".to_string(),
            segment_duration_seconds: 45.0,
            task_timeout_seconds: 600,
            max_concurrent_analyses: default_analysis_slots(),
            transfer_slots_multiplier: 3,
            min_audio_bytes: 100 * 1024,
            queue_poll_interval_ms: 1000,
            tempo_weights: DEFAULT_SOURCE_WEIGHTS.clone(),
        }
    }
}

impl AnalyzerConfig {
    /// Load configuration: TOML file if present, then env overrides
    pub fn load() -> mxt_common::Result<Self> {
        let mut config = match mxt_common::config::resolve_config_path(CONFIG_ENV_VAR, CONFIG_MODULE)
        {
            Some(path) => {
                info!("Loading config from {}", path.display());
                mxt_common::config::read_toml(&path)?
            }
            None => {
                info!("No config file found, using defaults");
                Self::default()
            }
        };

        // Secrets may live in the environment instead of the file
        if let Ok(client_id) = std::env::var("MIXTIDE_CLIENT_ID") {
            config.platform.client_id = Some(client_id);
        }
        if let Ok(token) = std::env::var("MIXTIDE_OAUTH_TOKEN") {
            config.platform.oauth_token = Some(token);
        }
        if let Ok(proxy) = std::env::var("MIXTIDE_PROXY_URL") {
            config.platform.proxy_url = Some(proxy);
        }

        Ok(config)
    }
}

/// Cap analysis parallelism at the core count, bounded to keep decoded
/// audio buffers from exhausting RAM
fn default_analysis_slots() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(16)
}

fn default_database_path() -> PathBuf {
    mxt_common::config::default_data_dir().join("mixtide.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.segment_duration_seconds, 45.0);
        assert_eq!(config.min_audio_bytes, 102_400);
        assert!(config.max_concurrent_analyses >= 1);
        assert!(config.max_concurrent_analyses <= 16);
        assert_eq!(config.tempo_weights.get("cnn"), Some(&3.0));
    }

    #[test]
    fn partial_toml_keeps_defaults_for_the_rest() {
        let toml = r#"
            port = 9000
            [platform]
            client_id = "abc"
        "#;
        let config: AnalyzerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.platform.client_id.as_deref(), Some("abc"));
        assert_eq!(config.ytdlp_path, "yt-dlp");
        assert_eq!(config.task_timeout_seconds, 600);
    }
}
