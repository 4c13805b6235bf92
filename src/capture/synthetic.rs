//! Test-pattern providers
//!
//! In-process implementations of every capture boundary. They produce
//! solid-colour tracks, never touch hardware, and can be told to fail, which
//! makes them usable both for the demo binary and for tests.

use super::traits::{
    CaptureError, CaptureSource, CaptureSourceProvider, DeviceDescriptor, DeviceEnumerator,
    DeviceKind, MediaAcquirer, MediaConstraints, PermissionProvider, PermissionStatus,
};
use crate::media::{Frame, LiveStream, MediaTrack, TrackKind};
use crate::recorder::encoder::{EncodedRecording, Encoder, EncoderError, RecordingFormat};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Encode a frame as PNG bytes
pub fn encode_png(frame: &Frame) -> Result<Vec<u8>, png::EncodingError> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, frame.width(), frame.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(frame.data())?;
        writer.finish()?;
    }
    Ok(out)
}

struct PatternSource {
    source: CaptureSource,
    color: [u8; 4],
}

/// Screen provider exposing fixed sources filled with one colour each
pub struct TestPatternScreens {
    sources: Mutex<Vec<PatternSource>>,
    frame_size: (u32, u32),
    issued: Mutex<Vec<LiveStream>>,
}

impl TestPatternScreens {
    /// `screen:0` and `window:1`
    pub fn new() -> Self {
        let screens = Self {
            sources: Mutex::new(Vec::new()),
            frame_size: (640, 360),
            issued: Mutex::new(Vec::new()),
        };
        screens.add_source("screen:0", "Entire Screen", [40, 44, 52, 255]);
        screens.add_source("window:1", "Demo Window", [230, 230, 230, 255]);
        screens
    }

    pub fn add_source(&self, id: &str, name: &str, color: [u8; 4]) {
        let thumbnail = encode_png(&Frame::solid(32, 18, color))
            .map_err(|e| tracing::warn!("Failed to encode thumbnail for {}: {}", id, e))
            .ok();
        self.sources.lock().push(PatternSource {
            source: CaptureSource {
                id: id.to_string(),
                name: name.to_string(),
                thumbnail,
            },
            color,
        });
    }

    /// Make a source disappear, as when a window is closed
    pub fn remove_source(&self, id: &str) {
        self.sources.lock().retain(|s| s.source.id != id);
    }

    /// Every stream handed out so far
    pub fn issued(&self) -> Vec<LiveStream> {
        self.issued.lock().clone()
    }
}

impl Default for TestPatternScreens {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureSourceProvider for TestPatternScreens {
    async fn enumerate_capture_sources(&self) -> Result<Vec<CaptureSource>, CaptureError> {
        Ok(self.sources.lock().iter().map(|s| s.source.clone()).collect())
    }

    async fn acquire_screen_stream(&self, source_id: &str) -> Result<LiveStream, CaptureError> {
        let color = self
            .sources
            .lock()
            .iter()
            .find(|s| s.source.id == source_id)
            .map(|s| s.color)
            .ok_or_else(|| CaptureError::SourceUnavailable(source_id.to_string()))?;

        let track = MediaTrack::new(TrackKind::Video, source_id, None);
        track.push_frame(Frame::solid(self.frame_size.0, self.frame_size.1, color));
        let stream = LiveStream::new(vec![track]);
        self.issued.lock().push(stream.clone());
        Ok(stream)
    }
}

/// Acquirer creating solid-colour camera tracks and silent microphone tracks
pub struct TestPatternDevices {
    latency: Duration,
    failures_left: AtomicU32,
    failure_message: Mutex<String>,
    calls: AtomicUsize,
    issued: Mutex<Vec<LiveStream>>,
}

impl TestPatternDevices {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Every acquisition takes `latency` to complete
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            failures_left: AtomicU32::new(0),
            failure_message: Mutex::new("Device busy".to_string()),
            calls: AtomicUsize::new(0),
            issued: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `count` acquisitions with `message`
    pub fn fail_next(&self, count: u32, message: &str) {
        *self.failure_message.lock() = message.to_string();
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Number of acquisition calls received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn issued(&self) -> Vec<LiveStream> {
        self.issued.lock().clone()
    }

    /// Issued streams that are still live
    pub fn live_count(&self) -> usize {
        self.issued.lock().iter().filter(|s| s.is_live()).count()
    }
}

impl Default for TestPatternDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaAcquirer for TestPatternDevices {
    async fn acquire(
        &self,
        kind: DeviceKind,
        device_id: &str,
        constraints: &MediaConstraints,
    ) -> Result<LiveStream, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CaptureError::DeviceBusy(self.failure_message.lock().clone()));
        }

        let track = match kind {
            DeviceKind::VideoInput => {
                let track = MediaTrack::new(TrackKind::Video, device_id, Some(device_id.to_string()));
                let width = constraints.width.unwrap_or(1280);
                let height = constraints.height.unwrap_or(720);
                track.push_frame(Frame::solid(width, height, [220, 120, 40, 255]));
                track
            }
            DeviceKind::AudioInput => {
                MediaTrack::new(TrackKind::Audio, device_id, Some(device_id.to_string()))
            }
        };

        let stream = LiveStream::new(vec![track]);
        self.issued.lock().push(stream.clone());
        Ok(stream)
    }
}

/// Enumerator returning a fixed, replaceable device list
pub struct StaticDevices {
    devices: Mutex<Vec<DeviceDescriptor>>,
    calls: AtomicUsize,
}

impl StaticDevices {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            devices: Mutex::new(devices),
            calls: AtomicUsize::new(0),
        }
    }

    /// One camera and one microphone
    pub fn demo() -> Self {
        Self::new(vec![
            DeviceDescriptor {
                device_id: "pattern-camera-0".to_string(),
                label: "Test Pattern Camera".to_string(),
                kind: DeviceKind::VideoInput,
            },
            DeviceDescriptor {
                device_id: "pattern-microphone-0".to_string(),
                label: String::new(),
                kind: DeviceKind::AudioInput,
            },
        ])
    }

    pub fn set_devices(&self, devices: Vec<DeviceDescriptor>) {
        *self.devices.lock() = devices;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceEnumerator for StaticDevices {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.lock().clone())
    }
}

/// Permission provider with a settable answer
pub struct FixedPermissions {
    status: Mutex<PermissionStatus>,
    requests: AtomicUsize,
}

impl FixedPermissions {
    pub fn new(status: PermissionStatus) -> Self {
        Self {
            status: Mutex::new(status),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn granted() -> Self {
        Self::new(PermissionStatus {
            camera: true,
            microphone: true,
            screen_capture: true,
        })
    }

    pub fn set(&self, status: PermissionStatus) {
        *self.status.lock() = status;
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionProvider for FixedPermissions {
    async fn check_permissions(&self) -> PermissionStatus {
        *self.status.lock()
    }

    async fn request_permissions(&self) -> PermissionStatus {
        self.requests.fetch_add(1, Ordering::SeqCst);
        *self.status.lock()
    }
}

struct MemoryRun {
    stream: LiveStream,
    mime_type: String,
    started: tokio::time::Instant,
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    task: JoinHandle<()>,
}

/// Encoder that samples the stream's video frames into in-memory chunks
pub struct MemoryEncoder {
    run: Mutex<Option<MemoryRun>>,
    fail_start: AtomicBool,
}

impl MemoryEncoder {
    pub fn new() -> Self {
        Self {
            run: Mutex::new(None),
            fail_start: AtomicBool::new(false),
        }
    }

    /// Make the next `start` calls fail
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.run.lock().is_some()
    }

    /// Stream of the current run
    pub fn stream(&self) -> Option<LiveStream> {
        self.run.lock().as_ref().map(|r| r.stream.clone())
    }
}

impl Default for MemoryEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Encoder for MemoryEncoder {
    async fn start(&self, stream: LiveStream, format: &RecordingFormat) -> Result<(), EncoderError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(EncoderError::StartFailed("encoder unavailable".to_string()));
        }
        if !stream.is_live() {
            return Err(EncoderError::StartFailed("stream is not live".to_string()));
        }

        let mut run = self.run.lock();
        if run.is_some() {
            return Err(EncoderError::StartFailed("already encoding".to_string()));
        }

        let chunks = Arc::new(Mutex::new(Vec::new()));
        let timeslice = Duration::from_millis(format.timeslice_ms.max(1));
        let task = tokio::spawn(sample_chunks(stream.clone(), chunks.clone(), timeslice));

        *run = Some(MemoryRun {
            stream,
            mime_type: format.container.mime_type().to_string(),
            started: tokio::time::Instant::now(),
            chunks,
            task,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<EncodedRecording, EncoderError> {
        let run = self.run.lock().take().ok_or(EncoderError::NotStarted)?;
        run.task.abort();

        let chunks = std::mem::take(&mut *run.chunks.lock());
        Ok(EncodedRecording {
            mime_type: run.mime_type,
            chunks,
            duration_ms: run.started.elapsed().as_millis() as u64,
        })
    }
}

async fn sample_chunks(stream: LiveStream, chunks: Arc<Mutex<Vec<Vec<u8>>>>, timeslice: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + timeslice, timeslice);
    loop {
        ticker.tick().await;
        let Some(track) = stream.video_track() else {
            break;
        };
        if let Some(frame) = track.latest_frame() {
            // One byte per 64 pixels keeps chunks small but frame-dependent
            let chunk: Vec<u8> = frame.data().iter().step_by(256).copied().collect();
            chunks.lock().push(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_thumbnail_signature() {
        let bytes = encode_png(&Frame::solid(4, 4, [1, 2, 3, 255])).unwrap();
        assert_eq!(&bytes[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }

    #[tokio::test]
    async fn test_removed_source_is_unavailable() {
        let screens = TestPatternScreens::new();
        assert_eq!(screens.enumerate_capture_sources().await.unwrap().len(), 2);

        screens.remove_source("window:1");
        let err = screens.acquire_screen_stream("window:1").await.unwrap_err();
        assert!(matches!(err, CaptureError::SourceUnavailable(_)));

        let stream = screens.acquire_screen_stream("screen:0").await.unwrap();
        assert!(stream.video_track().unwrap().latest_frame().is_some());
    }

    #[tokio::test]
    async fn test_devices_fail_then_recover() {
        let devices = TestPatternDevices::new();
        devices.fail_next(1, "in use");

        let constraints = MediaConstraints::camera();
        let err = devices
            .acquire(DeviceKind::VideoInput, "cam", &constraints)
            .await
            .unwrap_err();
        assert_eq!(err, CaptureError::DeviceBusy("in use".to_string()));

        let stream = devices
            .acquire(DeviceKind::VideoInput, "cam", &constraints)
            .await
            .unwrap();
        assert_eq!(stream.device_id(), Some("cam"));
        assert_eq!(devices.calls(), 2);
        assert_eq!(devices.live_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_encoder_collects_chunks() {
        let encoder = MemoryEncoder::new();
        let track = MediaTrack::new(TrackKind::Video, "v", None);
        track.push_frame(Frame::solid(64, 64, [9, 9, 9, 255]));
        let stream = LiveStream::new(vec![track]);

        encoder.start(stream, &RecordingFormat::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        let recording = encoder.stop().await.unwrap();

        assert_eq!(recording.chunks.len(), 3);
        assert!(recording.total_bytes() > 0);
        assert_eq!(encoder.stop().await.unwrap_err(), EncoderError::NotStarted);
    }
}
