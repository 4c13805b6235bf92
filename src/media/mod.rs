//! Media primitives shared by capture, device and composition code
//!
//! Streams are handles over tracks. Each acquisition produces its own stream
//! whose tracks are stopped independently of any other stream.

pub mod stream;

pub use stream::{Frame, LiveStream, MediaTrack, TrackKind, TrackState};
