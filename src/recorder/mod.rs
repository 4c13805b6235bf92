//! Recording session
//!
//! This module ties the capture, device and composition layers together:
//! - Encoder trait for the collaborator that consumes the final stream
//! - RecordingController to drive the session state machine
//! - Session state, events and errors

pub mod controller;
pub mod encoder;
pub mod state;

pub use controller::{RecorderDeps, RecordingController};
pub use encoder::{Container, EncodedRecording, Encoder, EncoderError, RecordingFormat};
pub use state::{
    RecordingOutcome, RecordingSession, SessionAction, SessionError, SessionEvent, SessionResult,
    SessionState,
};
