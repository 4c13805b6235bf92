//! Device stream state
//!
//! One `DeviceStreamState` exists per device class. The main and preview
//! streams are separate leases against the same device and are released
//! independently.

use crate::capture::{DeviceKind, MediaConstraints};
use crate::media::LiveStream;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Camera or microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Camera,
    Microphone,
}

impl DeviceClass {
    pub const ALL: [DeviceClass; 2] = [DeviceClass::Camera, DeviceClass::Microphone];

    /// Device kind requested from the acquisition provider
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceClass::Camera => DeviceKind::VideoInput,
            DeviceClass::Microphone => DeviceKind::AudioInput,
        }
    }

    pub fn constraints(&self) -> MediaConstraints {
        match self {
            DeviceClass::Camera => MediaConstraints::camera(),
            DeviceClass::Microphone => MediaConstraints::microphone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceClass::Camera => "camera",
            DeviceClass::Microphone => "microphone",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a lease is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeasePurpose {
    /// Feeds the recording
    Main,
    /// UI preview only
    Preview,
}

/// One acquisition of a device stream
///
/// The lease owns its tracks: dropping it stops them.
pub struct StreamLease {
    device_id: String,
    purpose: LeasePurpose,
    stream: LiveStream,
    acquired_at: DateTime<Utc>,
}

impl StreamLease {
    pub fn new(device_id: impl Into<String>, purpose: LeasePurpose, stream: LiveStream) -> Self {
        Self {
            device_id: device_id.into(),
            purpose,
            stream,
            acquired_at: Utc::now(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn purpose(&self) -> LeasePurpose {
        self.purpose
    }

    pub fn stream(&self) -> &LiveStream {
        &self.stream
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn is_live(&self) -> bool {
        self.stream.is_live()
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.stream.stop();
    }
}

impl fmt::Debug for StreamLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamLease")
            .field("device_id", &self.device_id)
            .field("purpose", &self.purpose)
            .field("stream", &self.stream.id())
            .field("live", &self.is_live())
            .finish()
    }
}

/// Intent and held streams for one device class
#[derive(Debug, Default)]
pub struct DeviceStreamState {
    pub is_enabled: bool,
    pub selected_device_id: Option<String>,
    pub main_stream: Option<StreamLease>,
    pub preview_stream: Option<StreamLease>,
    /// An acquisition of the main stream is outstanding
    pub is_initializing: bool,
    pub is_preview_active: bool,
    pub error: Option<String>,
    pub(crate) preview_pending: bool,
}

impl DeviceStreamState {
    pub fn has_live_main_stream(&self) -> bool {
        self.main_stream.as_ref().map(|l| l.is_live()).unwrap_or(false)
    }

    /// Enabled, selected, no stream held and nothing in flight
    pub fn needs_initialization(&self) -> bool {
        self.is_enabled
            && self.selected_device_id.is_some()
            && self.main_stream.is_none()
            && !self.is_initializing
    }

    /// Enabled and holding a main stream whose tracks are no longer live
    pub fn has_stale_main_stream(&self) -> bool {
        self.is_enabled && self.main_stream.as_ref().map(|l| !l.is_live()).unwrap_or(false)
    }
}

/// Serializable snapshot of a device class for UI consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub class: DeviceClass,
    pub is_enabled: bool,
    pub selected_device_id: Option<String>,
    pub has_main_stream: bool,
    pub main_stream_live: bool,
    pub has_preview_stream: bool,
    pub is_initializing: bool,
    pub is_preview_active: bool,
    pub error: Option<String>,
}

impl DeviceStatus {
    pub(crate) fn from_state(class: DeviceClass, state: &DeviceStreamState) -> Self {
        Self {
            class,
            is_enabled: state.is_enabled,
            selected_device_id: state.selected_device_id.clone(),
            has_main_stream: state.main_stream.is_some(),
            main_stream_live: state.has_live_main_stream(),
            has_preview_stream: state.preview_stream.is_some(),
            is_initializing: state.is_initializing,
            is_preview_active: state.is_preview_active,
            error: state.error.clone(),
        }
    }
}

/// Result of a single initialization attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// Preconditions not met; nothing was attempted
    Skipped,
    /// A live stream is now held
    Ready,
    /// Acquisition failed with this message
    Failed(String),
}

impl InitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, InitOutcome::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaTrack, TrackKind};

    fn stream() -> LiveStream {
        LiveStream::new(vec![MediaTrack::new(TrackKind::Video, "cam", Some("cam-1".into()))])
    }

    #[test]
    fn test_dropping_lease_stops_tracks() {
        let stream = stream();
        let lease = StreamLease::new("cam-1", LeasePurpose::Main, stream.clone());
        assert!(lease.is_live());
        drop(lease);
        assert!(!stream.is_live());
    }

    #[test]
    fn test_leases_are_independent() {
        let main = StreamLease::new("cam-1", LeasePurpose::Main, stream());
        let preview = StreamLease::new("cam-1", LeasePurpose::Preview, stream());
        let main_stream = main.stream().clone();
        drop(preview);
        assert!(main_stream.is_live());
        drop(main);
    }

    #[test]
    fn test_needs_initialization() {
        let mut state = DeviceStreamState {
            is_enabled: true,
            selected_device_id: Some("cam-1".into()),
            ..Default::default()
        };
        assert!(state.needs_initialization());

        state.is_initializing = true;
        assert!(!state.needs_initialization());

        state.is_initializing = false;
        state.main_stream = Some(StreamLease::new("cam-1", LeasePurpose::Main, stream()));
        assert!(!state.needs_initialization());
        assert!(!state.has_stale_main_stream());

        if let Some(lease) = &state.main_stream {
            lease.stream().stop();
        }
        assert!(state.has_stale_main_stream());
    }

    #[test]
    fn test_class_maps_to_kind() {
        assert_eq!(DeviceClass::Camera.kind(), DeviceKind::VideoInput);
        assert_eq!(DeviceClass::Microphone.kind(), DeviceKind::AudioInput);
        assert_eq!(DeviceClass::Microphone.to_string(), "microphone");
    }
}
