//! Audio acquisition
//!
//! Resolves a track reference to raw audio bytes, trying ordered sources:
//! direct platform streaming, a generic extractor tool, and an
//! alternate-platform search. See [`chain::SourceFallbackChain`].

pub mod chain;
pub mod stream;
pub mod ytdlp;

pub use chain::SourceFallbackChain;

use std::path::PathBuf;
use tempfile::TempDir;
use thiserror::Error;
use tracing::warn;

/// Transfer failures, split between source-side unavailability (the track
/// cannot be had from this source) and transport-side failure (the attempt
/// itself broke)
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Track not found (404)")]
    NotFound,

    #[error("Track access forbidden (403) - geo-blocked or private")]
    Forbidden,

    #[error("Track not streamable (label restriction)")]
    NotStreamable,

    #[error("Track blocked by policy (label/geo restriction)")]
    PolicyBlocked,

    #[error("No compatible stream - {0}")]
    NoCompatibleStream(String),

    #[error("Platform API error ({0})")]
    ApiStatus(u16),

    #[error("Platform client_id not configured")]
    NotConfigured,

    #[error("Audio too small ({0} bytes) - likely geo-blocked")]
    TooSmall(usize),

    #[error("Download timed out after {0}s")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Downloader failed: {0}")]
    Tool(String),

    #[error("All download methods failed: {0}")]
    Exhausted(String),
}

impl TransferError {
    /// Source-side unavailability, as opposed to a failed attempt
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            TransferError::NotFound
                | TransferError::Forbidden
                | TransferError::NotStreamable
                | TransferError::PolicyBlocked
                | TransferError::NoCompatibleStream(_)
                | TransferError::ApiStatus(_)
        )
    }
}

/// A downloaded temp artifact; the backing directory is removed when the
/// payload is consumed
#[derive(Debug)]
pub struct DownloadedFile {
    pub path: PathBuf,
    dir: TempDir,
}

impl DownloadedFile {
    pub fn new(path: PathBuf, dir: TempDir) -> Self {
        Self { path, dir }
    }

    /// Remove the backing directory; failures are logged, never escalated
    fn cleanup(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(dir = %path.display(), error = %e, "Temp cleanup failed");
        }
    }
}

/// Acquired audio, either in memory (streamed) or on disk (downloaded)
#[derive(Debug)]
pub enum AudioPayload {
    Memory(Vec<u8>),
    File(DownloadedFile),
}

impl AudioPayload {
    /// Consume the payload into raw bytes, cleaning up any temp artifact
    pub async fn into_bytes(self) -> Result<Vec<u8>, TransferError> {
        match self {
            AudioPayload::Memory(bytes) => Ok(bytes),
            AudioPayload::File(file) => {
                let bytes = tokio::fs::read(&file.path)
                    .await
                    .map_err(|e| TransferError::Transport(e.to_string()))?;
                file.cleanup();
                Ok(bytes)
            }
        }
    }

    pub fn len(&self) -> Option<u64> {
        match self {
            AudioPayload::Memory(bytes) => Some(bytes.len() as u64),
            AudioPayload::File(file) => std::fs::metadata(&file.path).ok().map(|m| m.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailability_classification() {
        assert!(TransferError::NotFound.is_unavailable());
        assert!(TransferError::PolicyBlocked.is_unavailable());
        assert!(TransferError::ApiStatus(500).is_unavailable());
        assert!(!TransferError::TooSmall(500).is_unavailable());
        assert!(!TransferError::Timeout(300).is_unavailable());
        assert!(!TransferError::Exhausted("x".into()).is_unavailable());
    }

    #[tokio::test]
    async fn file_payload_reads_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.mp3");
        std::fs::write(&path, b"abc123").unwrap();
        let dir_path = dir.path().to_path_buf();

        let payload = AudioPayload::File(DownloadedFile::new(path, dir));
        assert_eq!(payload.len(), Some(6));

        let bytes = payload.into_bytes().await.unwrap();
        assert_eq!(bytes, b"abc123");
        assert!(!dir_path.exists());
    }

    #[tokio::test]
    async fn memory_payload_passes_through() {
        let payload = AudioPayload::Memory(vec![1, 2, 3]);
        assert_eq!(payload.into_bytes().await.unwrap(), vec![1, 2, 3]);
    }
}
