//! Encoder boundary
//!
//! The encoder consumes the final live stream, emits binary chunks while
//! recording and hands back the finalized recording on stop.

use crate::media::LiveStream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Webm,
    Mp4,
}

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Webm => "webm",
            Container::Mp4 => "mp4",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Container::Webm => "video/webm;codecs=vp9,opus",
            Container::Mp4 => "video/mp4;codecs=avc1,mp4a",
        }
    }
}

/// Encoding settings handed to the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingFormat {
    pub container: Container,
    pub video_bits_per_second: u32,
    /// Interval between emitted chunks
    pub timeslice_ms: u64,
}

impl Default for RecordingFormat {
    fn default() -> Self {
        Self {
            container: Container::default(),
            video_bits_per_second: 8_000_000,
            timeslice_ms: 1000,
        }
    }
}

/// A finalized recording
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedRecording {
    pub mime_type: String,
    #[serde(skip)]
    pub chunks: Vec<Vec<u8>>,
    pub duration_ms: u64,
}

impl EncodedRecording {
    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }
}

/// Encoder errors, propagated as-is to the session controller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncoderError {
    #[error("Encoder failed to start: {0}")]
    StartFailed(String),

    #[error("Encoder failed to stop: {0}")]
    StopFailed(String),

    #[error("Encoder is not running")]
    NotStarted,
}

/// Encoder and persistence collaborator
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Begin encoding `stream`. The stream is live when this is called.
    async fn start(&self, stream: LiveStream, format: &RecordingFormat) -> Result<(), EncoderError>;

    /// Finalize and return the recording
    async fn stop(&self) -> Result<EncodedRecording, EncoderError>;
}
