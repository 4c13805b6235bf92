//! Recording session state
//!
//! Defines the session state machine, session tracking and the events
//! broadcast by the controller.

use crate::capture::CaptureError;
use crate::compose::ComposerError;
use crate::recorder::encoder::{EncodedRecording, EncoderError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Current state of the session controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Nothing selected, nothing held
    #[default]
    Idle,
    /// A capture source is chosen
    SourceSelected,
    /// Screen acquired and composition running
    Composing,
    /// The encoder is consuming the output stream
    Recording,
    /// A step failed; see `last_error`
    Error,
}

impl SessionState {
    /// Operations that may be requested from this state
    pub fn allows(&self, action: SessionAction) -> bool {
        use SessionAction::*;
        use SessionState::*;
        matches!(
            (self, action),
            (Idle | SourceSelected, SelectSource)
                | (SourceSelected, StartPreview)
                | (SourceSelected | Composing, StartRecording)
                | (Composing, StopPreview)
                | (Recording, StopRecording)
                | (_, Reset)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::SourceSelected => "source selected",
            SessionState::Composing => "composing",
            SessionState::Recording => "recording",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Requests accepted by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    SelectSource,
    StartPreview,
    StopPreview,
    StartRecording,
    StopRecording,
    Reset,
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionAction::SelectSource => "select source",
            SessionAction::StartPreview => "start preview",
            SessionAction::StopPreview => "stop preview",
            SessionAction::StartRecording => "start recording",
            SessionAction::StopRecording => "stop recording",
            SessionAction::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// One recording, from `start_recording` to `stop_recording`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub id: Uuid,
    pub source_id: String,
    pub is_active: bool,
    pub start_time: DateTime<Utc>,
    pub has_camera: bool,
    pub has_microphone: bool,
}

impl RecordingSession {
    pub fn new(source_id: impl Into<String>, has_camera: bool, has_microphone: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.into(),
            is_active: true,
            start_time: Utc::now(),
            has_camera,
            has_microphone,
        }
    }

    /// Milliseconds since the session started
    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.start_time).num_milliseconds().max(0) as u64
    }
}

/// Result of a completed recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOutcome {
    pub session: RecordingSession,
    pub recording: EncodedRecording,
    pub duration_ms: u64,
}

/// Events broadcast by the session controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// Recording started
    Started(Uuid),
    /// Recording stopped after this many milliseconds
    Stopped { session_id: Uuid, duration_ms: u64 },
    /// A new composer took over after a settings change
    CompositionRestarted(Uuid),
    Error(String),
}

/// Session controller errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Cannot {action} while {from}")]
    InvalidTransition {
        from: SessionState,
        action: SessionAction,
    },

    #[error("No capture source selected")]
    NoSourceSelected,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Output stream is not live")]
    StreamNotLive,

    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("Composition failed: {0}")]
    Composer(#[from] ComposerError),

    #[error("Encoder failed: {0}")]
    Encoder(#[from] EncoderError),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        assert!(SessionState::Idle.allows(SessionAction::SelectSource));
        assert!(!SessionState::Idle.allows(SessionAction::StartPreview));
        assert!(SessionState::SourceSelected.allows(SessionAction::StartRecording));
        assert!(SessionState::Composing.allows(SessionAction::StartRecording));
        assert!(!SessionState::Recording.allows(SessionAction::StartRecording));
        assert!(!SessionState::Recording.allows(SessionAction::SelectSource));
        assert!(SessionState::Error.allows(SessionAction::Reset));
        assert!(!SessionState::Error.allows(SessionAction::StopRecording));
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = SessionError::InvalidTransition {
            from: SessionState::Idle,
            action: SessionAction::StopRecording,
        };
        assert_eq!(err.to_string(), "Cannot stop recording while idle");
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::SourceSelected).unwrap();
        assert_eq!(json, "\"sourceselected\"");
    }
}
