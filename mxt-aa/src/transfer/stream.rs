//! Direct platform streaming
//!
//! Resolves a track's permalink through the platform API to a progressive
//! stream URL and pulls the bytes straight into memory. Fastest path by a
//! wide margin, but many tracks are label- or geo-restricted and reject it
//! with a typed reason the fallback chain acts on.

use crate::config::PlatformConfig;
use crate::transfer::TransferError;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Resolved track metadata, reduced to the fields the streamer checks
#[derive(Debug, Deserialize)]
struct ResolvedTrack {
    /// Whether the rights holder allows streaming at all
    streamable: Option<bool>,
    /// "ALLOW", "SNIP", or "BLOCK"
    policy: Option<String>,
    media: Option<ResolvedMedia>,
}

#[derive(Debug, Deserialize)]
struct ResolvedMedia {
    #[serde(default)]
    transcodings: Vec<Transcoding>,
}

#[derive(Debug, Deserialize)]
struct Transcoding {
    url: Option<String>,
    #[serde(default)]
    preset: String,
    format: Option<TranscodingFormat>,
}

#[derive(Debug, Deserialize)]
struct TranscodingFormat {
    #[serde(default)]
    protocol: String,
}

#[derive(Debug, Deserialize)]
struct StreamLocation {
    url: Option<String>,
}

/// Streams track audio through the platform API
pub struct StreamClient {
    http: reqwest::Client,
    api_base: String,
    client_id: Option<String>,
}

impl StreamClient {
    pub fn new(platform: &PlatformConfig) -> Result<Self, TransferError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300));

        if let Some(proxy_url) = &platform.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| TransferError::Transport(format!("Invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|e| TransferError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_base: platform.api_base_url.trim_end_matches('/').to_string(),
            client_id: platform.client_id.clone(),
        })
    }

    /// Fetch a track's audio into memory, enforcing the size floor
    pub async fn fetch(&self, url: &str, min_bytes: usize) -> Result<Vec<u8>, TransferError> {
        let stream_url = self.resolve_stream_url(url).await?;

        let response = self
            .http
            .get(&stream_url)
            .send()
            .await
            .map_err(|e| TransferError::Transport(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(TransferError::Transport(format!(
                "Stream failed with status {}",
                response.status().as_u16()
            )));
        }

        let mut bytes = Vec::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| TransferError::Transport(e.to_string()))?;
            bytes.extend_from_slice(&chunk);
        }

        // A tiny payload is an error page in disguise, not audio
        if bytes.len() < min_bytes {
            return Err(TransferError::TooSmall(bytes.len()));
        }

        debug!(url, size = bytes.len(), "Streamed track audio");
        Ok(bytes)
    }

    /// Resolve a permalink URL to the final signed stream URL
    async fn resolve_stream_url(&self, url: &str) -> Result<String, TransferError> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or(TransferError::NotConfigured)?;

        let resolve_url = format!(
            "{}/resolve?url={}&client_id={}",
            self.api_base, url, client_id
        );
        let response = self
            .http
            .get(&resolve_url)
            .send()
            .await
            .map_err(|e| TransferError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            200 => {}
            404 => return Err(TransferError::NotFound),
            403 => return Err(TransferError::Forbidden),
            status => return Err(TransferError::ApiStatus(status)),
        }

        let track: ResolvedTrack = response
            .json()
            .await
            .map_err(|e| TransferError::Transport(format!("Invalid resolve response: {}", e)))?;

        if !track.streamable.unwrap_or(true) {
            return Err(TransferError::NotStreamable);
        }
        if track.policy.as_deref() == Some("BLOCK") {
            return Err(TransferError::PolicyBlocked);
        }

        let transcodings = track
            .media
            .map(|m| m.transcodings)
            .unwrap_or_default();
        if transcodings.is_empty() {
            return Err(TransferError::NoCompatibleStream(
                "no transcodings available (label restriction)".to_string(),
            ));
        }

        // Progressive MP3 first (direct byte range), then any MP3 preset
        let transcoding_url = transcodings
            .iter()
            .find(|t| {
                t.format
                    .as_ref()
                    .map(|f| f.protocol == "progressive")
                    .unwrap_or(false)
            })
            .and_then(|t| t.url.clone())
            .or_else(|| {
                transcodings
                    .iter()
                    .find(|t| t.preset.contains("mp3"))
                    .and_then(|t| t.url.clone())
            })
            .ok_or_else(|| {
                let available: Vec<String> = transcodings
                    .iter()
                    .map(|t| {
                        format!(
                            "{}({})",
                            t.preset,
                            t.format.as_ref().map(|f| f.protocol.as_str()).unwrap_or("?")
                        )
                    })
                    .collect();
                TransferError::NoCompatibleStream(format!("available: {}", available.join(", ")))
            })?;

        let location_response = self
            .http
            .get(format!("{}?client_id={}", transcoding_url, client_id))
            .send()
            .await
            .map_err(|e| TransferError::Transport(e.to_string()))?;

        if location_response.status() != reqwest::StatusCode::OK {
            return Err(TransferError::ApiStatus(
                location_response.status().as_u16(),
            ));
        }

        let location: StreamLocation = location_response
            .json()
            .await
            .map_err(|e| TransferError::Transport(format!("Invalid stream response: {}", e)))?;

        location.url.filter(|u| !u.is_empty()).ok_or_else(|| {
            TransferError::NoCompatibleStream("empty stream URL in response".to_string())
        })
    }
}
