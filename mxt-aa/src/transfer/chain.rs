//! Cascading source fallback
//!
//! Sources in cost order: direct platform streaming (seconds), yt-dlp
//! against the same URL (tens of seconds), and a duration-matched search
//! on the alternate platform (last resort, needs track metadata). Each
//! stage's failure is logged and the next stage tried; only exhaustion
//! fails the transfer.

use crate::config::AnalyzerConfig;
use crate::models::TrackRef;
use crate::transfer::stream::StreamClient;
use crate::transfer::ytdlp::YtDlpDownloader;
use crate::transfer::{AudioPayload, TransferError};
use tracing::{info, warn};

/// Multi-source audio acquisition for one track
pub struct SourceFallbackChain {
    stream: StreamClient,
    ytdlp: YtDlpDownloader,
    min_bytes: usize,
}

impl SourceFallbackChain {
    pub fn new(config: &AnalyzerConfig) -> Result<Self, TransferError> {
        Ok(Self {
            stream: StreamClient::new(&config.platform)?,
            ytdlp: YtDlpDownloader::new(config),
            min_bytes: config.min_audio_bytes,
        })
    }

    /// Acquire raw audio for a track, short-circuiting on first success
    pub async fn acquire(&self, track: &TrackRef) -> Result<AudioPayload, TransferError> {
        let track_id = track.track_id;

        // Stage 1: direct stream into memory
        let stream_err = match self.stream.fetch(&track.source_url, self.min_bytes).await {
            Ok(bytes) => return Ok(AudioPayload::Memory(bytes)),
            Err(e) => {
                warn!(track_id, error = %e, unavailable = e.is_unavailable(), "Streaming failed, trying extractor fallback");
                e
            }
        };

        // Stage 2: yt-dlp against the same URL
        let ytdlp_err = match self.ytdlp.download(&track.source_url).await {
            Ok(file) => return Ok(AudioPayload::File(file)),
            Err(e) => {
                warn!(track_id, error = %e, "Extractor fallback failed");
                e
            }
        };

        // Stage 3: alternate platform, only with enough metadata to match
        if let (Some(title), Some(artist), Some(duration_ms)) =
            (&track.title, &track.artist, track.duration_ms)
        {
            let query = format!("{} {}", artist, title);
            info!(track_id, query, "Trying alternate platform search");

            if let Some(url) = self.ytdlp.search_alternate(&query, duration_ms).await {
                info!(track_id, url, "Found alternate upload");
                match self.ytdlp.download_alternate(&url).await {
                    Ok(file) => return Ok(AudioPayload::File(file)),
                    Err(e) => {
                        warn!(track_id, error = %e, "Alternate download failed");
                    }
                }
            }
        }

        Err(TransferError::Exhausted(format!(
            "stream: {}; extractor: {}",
            stream_err, ytdlp_err
        )))
    }
}
