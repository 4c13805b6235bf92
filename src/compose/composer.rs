//! Video composer
//!
//! Merges a screen stream and an optional camera stream into one output
//! stream by redrawing an off-screen canvas at a fixed cadence.
//!
//! ```text
//! [screen track] ─┐
//!                 ├→ [Canvas @ output_frame_rate] → [composite track]
//! [camera track] ─┘
//! ```

use super::canvas::Canvas;
use super::layout::overlay_rect;
use super::types::{ComposerError, CompositionConfig, CompositionStats};
use crate::media::{LiveStream, MediaTrack, TrackKind};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Label given to the composite output track
pub const COMPOSITE_TRACK_LABEL: &str = "composite";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Stopped,
    Disposed,
}

/// State shared with the draw task
struct DrawShared {
    canvas: Mutex<Option<Canvas>>,
    stats: Mutex<CompositionStats>,
}

/// Single-use compositor for one screen and optional camera stream
///
/// Input streams are owned by the caller and never stopped here. The output
/// stream is owned by the composer and stopped by `stop_composition`. A relay
/// track, when attached, receives every frame as well but is left running.
pub struct VideoComposer {
    id: Uuid,
    config: CompositionConfig,
    screen_track: Option<Arc<MediaTrack>>,
    camera_track: Option<Arc<MediaTrack>>,
    phase: Phase,
    shared: Arc<DrawShared>,
    draw_task: Option<JoinHandle<()>>,
    output: Option<LiveStream>,
    relay: Option<Arc<MediaTrack>>,
}

impl VideoComposer {
    /// Create a composer. The screen stream must carry a live video track.
    pub fn new(
        screen: &LiveStream,
        camera: Option<&LiveStream>,
        config: CompositionConfig,
    ) -> Result<Self, ComposerError> {
        config.validate()?;

        let screen_track = screen
            .video_track()
            .cloned()
            .ok_or(ComposerError::MissingScreenStream)?;
        if !screen_track.is_live() {
            return Err(ComposerError::ScreenStreamNotLive);
        }

        let camera_track = camera.and_then(|c| c.video_track().cloned());
        if camera.is_some() && camera_track.is_none() {
            tracing::warn!("Camera stream has no video track, composing screen only");
        }

        Ok(Self {
            id: Uuid::new_v4(),
            config,
            screen_track: Some(screen_track),
            camera_track,
            phase: Phase::Created,
            shared: Arc::new(DrawShared {
                canvas: Mutex::new(Some(Canvas::new(config.output_width, config.output_height))),
                stats: Mutex::new(CompositionStats::default()),
            }),
            draw_task: None,
            output: None,
            relay: None,
        })
    }

    /// Also publish every composed frame to `track`, which outlives this composer
    pub fn with_relay(mut self, track: Arc<MediaTrack>) -> Self {
        self.relay = Some(track);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &CompositionConfig {
        &self.config
    }

    pub fn has_camera(&self) -> bool {
        self.camera_track.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn is_disposed(&self) -> bool {
        self.phase == Phase::Disposed
    }

    /// Output stream of the current run, if started
    pub fn output_stream(&self) -> Option<&LiveStream> {
        self.output.as_ref()
    }

    pub fn stats(&self) -> CompositionStats {
        *self.shared.stats.lock()
    }

    /// Begin the draw cycle and return the composite stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_composition(&mut self) -> Result<LiveStream, ComposerError> {
        match self.phase {
            Phase::Disposed => return Err(ComposerError::Disposed),
            Phase::Running => {
                tracing::error!("Composer {} started twice", self.id);
                return Err(ComposerError::AlreadyStarted);
            }
            Phase::Created | Phase::Stopped => {}
        }

        let handle = tokio::runtime::Handle::try_current().map_err(|_| ComposerError::NoRuntime)?;
        let screen = self.screen_track.clone().ok_or(ComposerError::Disposed)?;

        let output_track = MediaTrack::new(TrackKind::Video, COMPOSITE_TRACK_LABEL, None);
        let output = LiveStream::new(vec![output_track.clone()]);

        let task = handle.spawn(draw_loop(
            self.shared.clone(),
            screen,
            self.camera_track.clone(),
            self.config,
            output_track,
            self.relay.clone(),
        ));

        tracing::info!(
            "Composition {} started: {}x{} @ {}fps, camera={}",
            self.id,
            self.config.output_width,
            self.config.output_height,
            self.config.output_frame_rate,
            self.camera_track.is_some()
        );

        self.draw_task = Some(task);
        self.output = Some(output.clone());
        self.phase = Phase::Running;
        Ok(output)
    }

    /// Halt the draw cycle and stop the output stream's tracks
    pub fn stop_composition(&mut self) -> Result<(), ComposerError> {
        match self.phase {
            Phase::Disposed => return Err(ComposerError::Disposed),
            Phase::Created | Phase::Stopped => return Err(ComposerError::NotStarted),
            Phase::Running => {}
        }

        self.halt();
        self.phase = Phase::Stopped;

        let stats = self.stats();
        tracing::info!(
            "Composition {} stopped after {} frames ({} with camera)",
            self.id,
            stats.frames_drawn,
            stats.camera_draws
        );
        Ok(())
    }

    /// Release the canvas and detach the source streams. The instance cannot
    /// be used afterwards.
    pub fn dispose(&mut self) -> Result<(), ComposerError> {
        if self.phase == Phase::Disposed {
            return Err(ComposerError::Disposed);
        }
        if self.phase == Phase::Running {
            tracing::warn!("Composer {} disposed while running, stopping first", self.id);
            self.halt();
        }

        self.shared.canvas.lock().take();
        self.screen_track = None;
        self.camera_track = None;
        self.output = None;
        self.relay = None;
        self.phase = Phase::Disposed;

        tracing::debug!("Composer {} disposed", self.id);
        Ok(())
    }

    fn halt(&mut self) {
        if let Some(task) = self.draw_task.take() {
            task.abort();
        }
        if let Some(output) = &self.output {
            output.stop();
        }
    }
}

impl Drop for VideoComposer {
    fn drop(&mut self) {
        self.halt();
    }
}

async fn draw_loop(
    shared: Arc<DrawShared>,
    screen: Arc<MediaTrack>,
    camera: Option<Arc<MediaTrack>>,
    config: CompositionConfig,
    output: Arc<MediaTrack>,
    relay: Option<Arc<MediaTrack>>,
) {
    let mut ticker = tokio::time::interval(config.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if !output.is_live() {
            break;
        }
        if !draw_frame(&shared, &screen, camera.as_deref(), &config, &output, relay.as_deref()) {
            break;
        }
    }
}

/// Render one cycle. Returns `false` once the canvas has been released.
fn draw_frame(
    shared: &DrawShared,
    screen: &MediaTrack,
    camera: Option<&MediaTrack>,
    config: &CompositionConfig,
    output: &MediaTrack,
    relay: Option<&MediaTrack>,
) -> bool {
    let mut canvas_guard = shared.canvas.lock();
    let Some(canvas) = canvas_guard.as_mut() else {
        return false;
    };

    match screen.latest_frame() {
        Some(frame) => canvas.fill(&frame),
        None => canvas.clear(),
    }

    let mut camera_rect = None;
    if let Some(camera) = camera.filter(|c| c.is_live()) {
        if let Some(frame) = camera.latest_frame() {
            let rect = overlay_rect(
                config.camera_position,
                config.camera_size,
                (canvas.width(), canvas.height()),
                Some((frame.width(), frame.height())),
            );
            canvas.draw_scaled(&frame, rect);
            camera_rect = Some(rect);
        }
    }

    if let Some(snapshot) = canvas.snapshot() {
        if let Some(relay) = relay {
            relay.push_frame(snapshot.clone());
        }
        output.push_frame(snapshot);
    }
    drop(canvas_guard);

    let mut stats = shared.stats.lock();
    stats.frames_drawn += 1;
    if camera_rect.is_some() {
        stats.camera_draws += 1;
        stats.last_camera_rect = camera_rect;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::types::{CameraPosition, CameraSize};
    use crate::media::Frame;
    use std::time::Duration;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn video_stream(label: &str, frame: Option<Frame>) -> LiveStream {
        let track = MediaTrack::new(TrackKind::Video, label, Some(format!("{label}-device")));
        if let Some(frame) = frame {
            track.push_frame(frame);
        }
        LiveStream::new(vec![track])
    }

    fn small_config() -> CompositionConfig {
        CompositionConfig::default().with_output(320, 180, 30)
    }

    #[test]
    fn test_new_requires_video_track() {
        let audio_only = LiveStream::new(vec![MediaTrack::new(TrackKind::Audio, "mic", None)]);
        let result = VideoComposer::new(&audio_only, None, small_config());
        assert_eq!(result.err(), Some(ComposerError::MissingScreenStream));
    }

    #[test]
    fn test_new_rejects_ended_screen() {
        let screen = video_stream("screen", None);
        screen.stop();
        let result = VideoComposer::new(&screen, None, small_config());
        assert_eq!(result.err(), Some(ComposerError::ScreenStreamNotLive));
    }

    #[tokio::test(start_paused = true)]
    async fn test_screen_only_composition_skips_camera() {
        let screen = video_stream("screen", Some(Frame::solid(64, 36, RED)));
        let mut composer = VideoComposer::new(&screen, None, small_config()).unwrap();

        let output = composer.start_composition().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = composer.stats();
        assert!(stats.frames_drawn >= 3);
        assert_eq!(stats.camera_draws, 0);
        assert!(stats.last_camera_rect.is_none());

        let frame = output.video_track().unwrap().latest_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (320, 180));
        assert_eq!(frame.pixel(300, 170), Some(RED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_drawn_in_configured_corner() {
        let screen = video_stream("screen", Some(Frame::solid(64, 36, RED)));
        let camera = video_stream("camera", Some(Frame::solid(16, 9, BLUE)));
        let config = small_config()
            .with_position(CameraPosition::TopLeft)
            .with_size(CameraSize::Small);
        let mut composer = VideoComposer::new(&screen, Some(&camera), config).unwrap();

        let output = composer.start_composition().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let rect = composer.stats().last_camera_rect.unwrap();
        assert_eq!((rect.x, rect.y), (20, 20));
        assert_eq!(rect.width, 64);

        let frame = output.video_track().unwrap().latest_frame().unwrap();
        assert_eq!(frame.pixel(rect.x + 1, rect.y + 1), Some(BLUE));
        assert_eq!(frame.pixel(300, 170), Some(RED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_is_reported() {
        let screen = video_stream("screen", Some(Frame::solid(8, 8, RED)));
        let mut composer = VideoComposer::new(&screen, None, small_config()).unwrap();

        composer.start_composition().unwrap();
        assert_eq!(composer.start_composition().err(), Some(ComposerError::AlreadyStarted));

        // Only one draw loop: 0, 33, 66, 99 ms
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(composer.stats().frames_drawn <= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_leaves_inputs_running() {
        let screen = video_stream("screen", Some(Frame::solid(8, 8, RED)));
        let camera = video_stream("camera", Some(Frame::solid(8, 8, BLUE)));
        let mut composer = VideoComposer::new(&screen, Some(&camera), small_config()).unwrap();

        let output = composer.start_composition().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        composer.stop_composition().unwrap();

        assert!(!output.is_live());
        assert!(screen.is_live());
        assert!(camera.is_live());

        let drawn = composer.stats().frames_drawn;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(composer.stats().frames_drawn, drawn);
    }

    #[tokio::test(start_paused = true)]
    async fn test_use_after_dispose_fails() {
        let screen = video_stream("screen", Some(Frame::solid(8, 8, RED)));
        let mut composer = VideoComposer::new(&screen, None, small_config()).unwrap();

        composer.start_composition().unwrap();
        composer.stop_composition().unwrap();
        composer.dispose().unwrap();

        assert!(composer.is_disposed());
        assert_eq!(composer.start_composition().err(), Some(ComposerError::Disposed));
        assert_eq!(composer.stop_composition().err(), Some(ComposerError::Disposed));
        assert_eq!(composer.dispose().err(), Some(ComposerError::Disposed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_survives_stop() {
        let screen = video_stream("screen", Some(Frame::solid(8, 8, RED)));
        let relay = MediaTrack::new(TrackKind::Video, COMPOSITE_TRACK_LABEL, None);
        let mut composer = VideoComposer::new(&screen, None, small_config())
            .unwrap()
            .with_relay(relay.clone());

        let output = composer.start_composition().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(relay.latest_frame().unwrap().pixel(0, 0), Some(RED));

        composer.stop_composition().unwrap();
        composer.dispose().unwrap();
        assert!(!output.is_live());
        assert!(relay.is_live());
    }

    #[tokio::test]
    async fn test_stop_before_start_fails() {
        let screen = video_stream("screen", None);
        let mut composer = VideoComposer::new(&screen, None, small_config()).unwrap();
        assert_eq!(composer.stop_composition().err(), Some(ComposerError::NotStarted));
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let screen = video_stream("screen", None);
        let mut composer = VideoComposer::new(&screen, None, small_config()).unwrap();
        assert_eq!(composer.start_composition().err(), Some(ComposerError::NoRuntime));
    }
}
