//! Capture trait definitions
//!
//! Platform-agnostic boundaries the core consumes: screen sources, device
//! enumeration, media acquisition and permissions.

use crate::media::LiveStream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by capture providers
///
/// Messages are passed through opaquely; the core only distinguishes
/// `SourceUnavailable`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Capture source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device busy: {0}")]
    DeviceBusy(String),

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("{0}")]
    Provider(String),
}

/// A screen or window that can be captured
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSource {
    /// Provider-assigned source ID (e.g. "screen:0")
    pub id: String,

    /// Display name
    pub name: String,

    /// PNG-encoded preview image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Vec<u8>>,
}

/// Kind of input device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[serde(rename = "videoinput")]
    VideoInput,
    #[serde(rename = "audioinput")]
    AudioInput,
}

/// Information about an input device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Opaque, non-empty device ID
    pub device_id: String,

    /// Human-readable label. Empty until permission is granted on some platforms.
    pub label: String,

    pub kind: DeviceKind,
}

/// Extra constraints passed along with an acquisition request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConstraints {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
}

impl MediaConstraints {
    /// Defaults requested for camera streams
    pub fn camera() -> Self {
        Self {
            width: Some(1280),
            height: Some(720),
            frame_rate: Some(30),
            ..Default::default()
        }
    }

    /// Defaults requested for microphone streams
    pub fn microphone() -> Self {
        Self {
            echo_cancellation: Some(true),
            noise_suppression: Some(true),
            ..Default::default()
        }
    }
}

/// Permission state for every capture class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionStatus {
    pub camera: bool,
    pub microphone: bool,
    pub screen_capture: bool,
}

/// Lists capture sources and opens screen streams
#[async_trait]
pub trait CaptureSourceProvider: Send + Sync {
    async fn enumerate_capture_sources(&self) -> Result<Vec<CaptureSource>, CaptureError>;

    /// Open a stream for `source_id`. Fails with `SourceUnavailable` when the
    /// source no longer exists.
    async fn acquire_screen_stream(&self, source_id: &str) -> Result<LiveStream, CaptureError>;
}

/// Lists camera and microphone devices
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, CaptureError>;
}

/// Opens live streams against a specific device
#[async_trait]
pub trait MediaAcquirer: Send + Sync {
    async fn acquire(
        &self,
        kind: DeviceKind,
        device_id: &str,
        constraints: &MediaConstraints,
    ) -> Result<LiveStream, CaptureError>;
}

/// Checks and requests OS permissions
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn check_permissions(&self) -> PermissionStatus;

    async fn request_permissions(&self) -> PermissionStatus;

    /// Request a single class. Defaults to a full request.
    async fn request_permission(&self, kind: DeviceKind) -> bool {
        let status = self.request_permissions().await;
        match kind {
            DeviceKind::VideoInput => status.camera,
            DeviceKind::AudioInput => status.microphone,
        }
    }
}
