//! Live streams, tracks and RGBA frames

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// Readiness of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    /// Producing media
    Live,
    /// Stopped locally or ended by the device
    Ended,
}

/// A single RGBA8 video frame
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Arc<[u8]>,
}

impl Frame {
    /// Wrap raw RGBA pixels. Returns `None` if the buffer length does not
    /// match `width * height * 4`.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        let expected = (width as usize) * (height as usize) * 4;
        if width == 0 || height == 0 || data.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            data: data.into(),
        })
    }

    /// A frame filled with one colour
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = (width.max(1) as usize) * (height.max(1) as usize);
        let data: Vec<u8> = std::iter::repeat(rgba).take(pixels).flatten().collect();
        Self {
            width: width.max(1),
            height: height.max(1),
            data: data.into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Read one pixel, `None` when out of bounds
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 4) as usize;
        let px = self.data.get(idx..idx + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// One track of a live stream
pub struct MediaTrack {
    id: Uuid,
    kind: TrackKind,
    label: String,
    device_id: Option<String>,
    ended: AtomicBool,
    latest: RwLock<Option<Frame>>,
}

impl MediaTrack {
    /// Create a live track
    pub fn new(kind: TrackKind, label: impl Into<String>, device_id: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            kind,
            label: label.into(),
            device_id,
            ended: AtomicBool::new(false),
            latest: RwLock::new(None),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Device the track was opened against, if any
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn state(&self) -> TrackState {
        if self.ended.load(Ordering::Acquire) {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }

    pub fn is_live(&self) -> bool {
        self.state() == TrackState::Live
    }

    /// Stop the track. Returns `true` if this call ended it.
    pub fn stop(&self) -> bool {
        let was_live = !self.ended.swap(true, Ordering::AcqRel);
        if was_live {
            tracing::trace!("Stopped {:?} track '{}' ({})", self.kind, self.label, self.id);
        }
        was_live
    }

    /// Publish a new frame. Ignored once the track has ended.
    pub fn push_frame(&self, frame: Frame) {
        if self.is_live() {
            *self.latest.write() = Some(frame);
        }
    }

    /// Most recent frame published on this track
    pub fn latest_frame(&self) -> Option<Frame> {
        self.latest.read().clone()
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("device_id", &self.device_id)
            .field("state", &self.state())
            .finish()
    }
}

/// An active media stream made of one or more tracks
///
/// Clones refer to the same tracks.
#[derive(Clone)]
pub struct LiveStream {
    id: Uuid,
    tracks: Arc<[Arc<MediaTrack>]>,
}

impl LiveStream {
    pub fn new(tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks: tracks.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    /// First video track
    pub fn video_track(&self) -> Option<&Arc<MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<MediaTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn has_video(&self) -> bool {
        self.video_track().is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio_tracks().next().is_some()
    }

    /// `true` when the stream has tracks and all of them are live
    pub fn is_live(&self) -> bool {
        !self.tracks.is_empty() && self.tracks.iter().all(|t| t.is_live())
    }

    /// Device of the first track that has one
    pub fn device_id(&self) -> Option<&str> {
        self.tracks.iter().find_map(|t| t.device_id())
    }

    /// Stop every track
    pub fn stop(&self) {
        for track in self.tracks.iter() {
            track.stop();
        }
    }

    /// A new stream made of this stream's tracks followed by `extra`
    pub fn with_tracks<'a>(&self, extra: impl IntoIterator<Item = &'a Arc<MediaTrack>>) -> Self {
        let mut tracks: Vec<Arc<MediaTrack>> = self.tracks.to_vec();
        tracks.extend(extra.into_iter().cloned());
        Self::new(tracks)
    }
}

impl fmt::Debug for LiveStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rejects_wrong_length() {
        assert!(Frame::from_rgba(2, 2, vec![0; 15]).is_none());
        assert!(Frame::from_rgba(2, 2, vec![0; 16]).is_some());
    }

    #[test]
    fn test_solid_frame_pixels() {
        let frame = Frame::solid(4, 3, [10, 20, 30, 255]);
        assert_eq!(frame.data().len(), 4 * 3 * 4);
        assert_eq!(frame.pixel(3, 2), Some([10, 20, 30, 255]));
        assert_eq!(frame.pixel(4, 0), None);
    }

    #[test]
    fn test_track_stop_is_idempotent() {
        let track = MediaTrack::new(TrackKind::Video, "cam", Some("dev-1".into()));
        assert!(track.is_live());
        assert!(track.stop());
        assert!(!track.stop());
        assert_eq!(track.state(), TrackState::Ended);
    }

    #[test]
    fn test_frames_dropped_after_stop() {
        let track = MediaTrack::new(TrackKind::Video, "cam", None);
        track.stop();
        track.push_frame(Frame::solid(1, 1, [0, 0, 0, 255]));
        assert!(track.latest_frame().is_none());
    }

    #[test]
    fn test_stream_liveness_follows_tracks() {
        let video = MediaTrack::new(TrackKind::Video, "v", None);
        let audio = MediaTrack::new(TrackKind::Audio, "a", None);
        let stream = LiveStream::new(vec![video.clone(), audio]);
        assert!(stream.is_live());

        // One ended track makes the stream stale
        video.stop();
        assert!(!stream.is_live());

        assert!(!LiveStream::new(vec![]).is_live());
    }

    #[test]
    fn test_clones_share_tracks() {
        let stream = LiveStream::new(vec![MediaTrack::new(TrackKind::Audio, "mic", None)]);
        let clone = stream.clone();
        clone.stop();
        assert!(!stream.is_live());
        assert_eq!(stream.id(), clone.id());
    }

    #[test]
    fn test_with_tracks_combines() {
        let screen = LiveStream::new(vec![MediaTrack::new(TrackKind::Video, "screen", None)]);
        let mic = LiveStream::new(vec![MediaTrack::new(TrackKind::Audio, "mic", None)]);
        let combined = screen.with_tracks(mic.audio_tracks());
        assert!(combined.has_video());
        assert!(combined.has_audio());
        assert_ne!(combined.id(), screen.id());
    }
}
