//! Generic extractor downloads via yt-dlp
//!
//! Fallback when direct streaming is rejected: yt-dlp handles the
//! platform-specific extraction, we handle temp placement, timeout,
//! output validation, and the alternate-platform duration-matched search.

use crate::config::AnalyzerConfig;
use crate::transfer::{DownloadedFile, TransferError};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Whole-download ceiling; full tracks at best quality stay well under it
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Search queries resolve quickly or not at all
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum deviation between a search hit's duration and the expected one
const DURATION_TOLERANCE_S: f64 = 30.0;

/// yt-dlp-backed downloader
pub struct YtDlpDownloader {
    binary: String,
    temp_root: PathBuf,
    oauth_token: Option<String>,
    client_id: Option<String>,
    proxy_url: Option<String>,
    min_bytes: usize,
}

impl YtDlpDownloader {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            binary: config.ytdlp_path.clone(),
            temp_root: config.temp_dir.clone(),
            oauth_token: config.platform.oauth_token.clone(),
            client_id: config.platform.client_id.clone(),
            proxy_url: config.platform.proxy_url.clone(),
            min_bytes: config.min_audio_bytes,
        }
    }

    /// Download a primary-platform track as MP3
    pub async fn download(&self, url: &str) -> Result<DownloadedFile, TransferError> {
        let mut args = vec![
            url.to_string(),
            "-x".to_string(),
            "--audio-format".to_string(),
            "mp3".to_string(),
            "--audio-quality".to_string(),
            "0".to_string(),
            "--quiet".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            "--retries".to_string(),
            "3".to_string(),
            "--concurrent-fragments".to_string(),
            "4".to_string(),
        ];

        if let Some(token) = &self.oauth_token {
            args.push("--extractor-args".to_string());
            args.push(format!("soundcloud:oauth_token={}", token));
        } else if let Some(client_id) = &self.client_id {
            args.push("--extractor-args".to_string());
            args.push(format!("soundcloud:client_id={}", client_id));
        }

        self.run_download(args).await
    }

    /// Download an alternate-platform URL; m4a avoids a lossy re-encode
    pub async fn download_alternate(&self, url: &str) -> Result<DownloadedFile, TransferError> {
        let args = vec![
            url.to_string(),
            "-x".to_string(),
            "--audio-format".to_string(),
            "m4a".to_string(),
            "--no-playlist".to_string(),
            "--retries".to_string(),
            "3".to_string(),
            "--no-warnings".to_string(),
        ];
        self.run_download(args).await
    }

    /// Search the alternate platform for a duration-matched upload
    ///
    /// Returns the URL of the result whose duration is within the
    /// tolerance of `expected_duration_ms` and closest to it.
    pub async fn search_alternate(
        &self,
        query: &str,
        expected_duration_ms: i64,
    ) -> Option<String> {
        let output = tokio::time::timeout(
            SEARCH_TIMEOUT,
            Command::new(&self.binary)
                .arg(format!("ytsearch5:{}", query))
                .arg("--dump-json")
                .arg("--no-download")
                .arg("--quiet")
                .arg("--no-warnings")
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match output {
            Ok(Ok(out)) if out.status.success() => out,
            Ok(Ok(out)) => {
                debug!(code = ?out.status.code(), "Search returned non-zero");
                return None;
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Search failed to launch");
                return None;
            }
            Err(_) => {
                debug!("Search timed out");
                return None;
            }
        };

        let expected_s = expected_duration_ms as f64 / 1000.0;
        let mut best: Option<(f64, String)> = None;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let Ok(video) = serde_json::from_str::<serde_json::Value>(line) else {
                continue;
            };
            let duration = video.get("duration").and_then(|d| d.as_f64()).unwrap_or(0.0);
            if duration == 0.0 {
                continue;
            }

            let diff = (duration - expected_s).abs();
            if diff <= DURATION_TOLERANCE_S
                && best.as_ref().map(|(d, _)| diff < *d).unwrap_or(true)
            {
                if let Some(id) = video.get("id").and_then(|i| i.as_str()) {
                    best = Some((diff, format!("https://www.youtube.com/watch?v={}", id)));
                }
            }
        }

        best.map(|(_, url)| url)
    }

    async fn run_download(&self, mut args: Vec<String>) -> Result<DownloadedFile, TransferError> {
        std::fs::create_dir_all(&self.temp_root)
            .map_err(|e| TransferError::Transport(e.to_string()))?;
        let dir = tempfile::Builder::new()
            .prefix("mxt-dl-")
            .tempdir_in(&self.temp_root)
            .map_err(|e| TransferError::Transport(e.to_string()))?;

        let template = dir.path().join("audio.%(ext)s");
        args.push("-o".to_string());
        args.push(template.to_string_lossy().into_owned());

        if let Some(proxy) = &self.proxy_url {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        let output = tokio::time::timeout(
            DOWNLOAD_TIMEOUT,
            Command::new(&self.binary)
                .args(&args)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match output {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(TransferError::Tool(e.to_string())),
            Err(_) => return Err(TransferError::Timeout(DOWNLOAD_TIMEOUT.as_secs())),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let truncated: String = stderr.chars().take(500).collect();
            return Err(TransferError::Tool(truncated));
        }

        // The extension depends on the source; take whatever "audio.*"
        // landed in the temp dir
        let audio_file = std::fs::read_dir(dir.path())
            .map_err(|e| TransferError::Transport(e.to_string()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|path| {
                path.file_stem()
                    .map(|stem| stem == "audio")
                    .unwrap_or(false)
            })
            .ok_or_else(|| TransferError::Tool("no audio file was created".to_string()))?;

        let size = std::fs::metadata(&audio_file)
            .map_err(|e| TransferError::Transport(e.to_string()))?
            .len() as usize;
        if size < self.min_bytes {
            return Err(TransferError::TooSmall(size));
        }

        debug!(file = %audio_file.display(), size, "Downloaded track audio");
        Ok(DownloadedFile::new(audio_file, dir))
    }
}
