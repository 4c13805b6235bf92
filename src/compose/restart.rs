//! Composer restart protocol
//!
//! A running composer cannot change its configuration, so a settings change
//! tears it down and builds a new one. `ComposerSlot` keeps at most one active
//! composer at a time and lets a newer restart supersede a pending one.
//!
//! Consumers read from the slot's relay stream, which stays live across
//! restarts. Each composer feeds it while running.

use super::composer::{VideoComposer, COMPOSITE_TRACK_LABEL};
use super::types::{ComposerError, CompositionConfig, CompositionStats};
use crate::media::{LiveStream, MediaTrack, TrackKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Result of a restart request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    /// A new composer is running and feeding the relay stream
    Restarted { composer_id: Uuid },
    /// The requested configuration is already running
    Unchanged,
    /// A later request took over before this one finished
    Superseded,
    /// No sources are attached; the configuration is kept for the next start
    Idle,
}

struct SlotInner {
    composer: Option<VideoComposer>,
    screen: Option<LiveStream>,
    camera: Option<LiveStream>,
    relay: Option<LiveStream>,
    config: CompositionConfig,
    restarts: u64,
}

impl SlotInner {
    fn teardown(&mut self) -> bool {
        let Some(mut old) = self.composer.take() else {
            return false;
        };
        if old.is_running() {
            if let Err(e) = old.stop_composition() {
                tracing::warn!("Failed to stop composer {}: {}", old.id(), e);
            }
        }
        if let Err(e) = old.dispose() {
            tracing::warn!("Failed to dispose composer {}: {}", old.id(), e);
        }
        true
    }

    fn build(&mut self) -> Result<Uuid, ComposerError> {
        let screen = self.screen.as_ref().ok_or(ComposerError::MissingScreenStream)?;
        let relay = self
            .relay
            .as_ref()
            .and_then(|r| r.video_track().cloned())
            .ok_or(ComposerError::NotStarted)?;

        let mut composer = VideoComposer::new(screen, self.camera.as_ref(), self.config)?.with_relay(relay);
        composer.start_composition()?;
        let id = composer.id();
        self.composer = Some(composer);
        Ok(id)
    }

    fn release_relay(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.stop();
        }
    }
}

/// Holder for the one active composer
pub struct ComposerSlot {
    inner: Arc<Mutex<SlotInner>>,
    generation: Arc<AtomicU64>,
    settle_delay: Duration,
}

impl ComposerSlot {
    /// `settle_delay` is waited between teardown and rebuild so the camera
    /// can be released by the platform.
    pub fn new(config: CompositionConfig, settle_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotInner {
                composer: None,
                screen: None,
                camera: None,
                relay: None,
                config,
                restarts: 0,
            })),
            generation: Arc::new(AtomicU64::new(0)),
            settle_delay,
        }
    }

    pub fn config(&self) -> CompositionConfig {
        self.inner.lock().config
    }

    pub fn is_active(&self) -> bool {
        self.inner
            .lock()
            .composer
            .as_ref()
            .map(|c| c.is_running())
            .unwrap_or(false)
    }

    pub fn has_camera(&self) -> bool {
        self.inner.lock().camera.is_some()
    }

    /// Completed restarts since creation
    pub fn restart_count(&self) -> u64 {
        self.inner.lock().restarts
    }

    /// ID of the running composer
    pub fn composer_id(&self) -> Option<Uuid> {
        self.inner.lock().composer.as_ref().map(|c| c.id())
    }

    /// The relay stream, live from `start` until `stop`
    pub fn output_stream(&self) -> Option<LiveStream> {
        self.inner.lock().relay.clone()
    }

    pub fn stats(&self) -> Option<CompositionStats> {
        self.inner.lock().composer.as_ref().map(|c| c.stats())
    }

    /// Attach sources, start a composer and return the relay stream. Any
    /// current composer and relay are replaced.
    pub fn start(
        &self,
        screen: LiveStream,
        camera: Option<LiveStream>,
    ) -> Result<LiveStream, ComposerError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        if inner.teardown() {
            tracing::warn!("Replacing an active composer on start");
        }
        inner.release_relay();

        let relay = LiveStream::new(vec![MediaTrack::new(TrackKind::Video, COMPOSITE_TRACK_LABEL, None)]);
        inner.relay = Some(relay.clone());
        inner.screen = Some(screen);
        inner.camera = camera;

        if let Err(e) = inner.build() {
            inner.release_relay();
            inner.screen = None;
            inner.camera = None;
            return Err(e);
        }
        Ok(relay)
    }

    /// Swap the sources used by the next (re)start
    pub fn replace_sources(&self, screen: LiveStream, camera: Option<LiveStream>) {
        let mut inner = self.inner.lock();
        inner.screen = Some(screen);
        inner.camera = camera;
    }

    /// Apply `config`, rebuilding the composer if one is attached.
    pub async fn restart(&self, config: CompositionConfig) -> Result<RestartOutcome, ComposerError> {
        self.restart_with(config, false).await
    }

    /// Rebuild with the current configuration, picking up replaced sources
    pub async fn rebuild(&self) -> Result<RestartOutcome, ComposerError> {
        let config = self.config();
        self.restart_with(config, true).await
    }

    async fn restart_with(
        &self,
        config: CompositionConfig,
        force: bool,
    ) -> Result<RestartOutcome, ComposerError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut inner = self.inner.lock();
            let running = inner.composer.as_ref().map(|c| c.is_running()).unwrap_or(false);
            if running && !force && inner.config == config {
                return Ok(RestartOutcome::Unchanged);
            }

            inner.config = config;
            inner.teardown();

            if inner.screen.is_none() || inner.relay.is_none() {
                tracing::debug!("No sources attached, storing composition config");
                return Ok(RestartOutcome::Idle);
            }
        }

        // The rebuild runs detached so that a caller dropping this future
        // mid-settle still ends with a composer or a superseded generation.
        let inner = self.inner.clone();
        let current = self.generation.clone();
        let settle_delay = self.settle_delay;
        let rebuild: JoinHandle<Result<RestartOutcome, ComposerError>> = tokio::spawn(async move {
            tokio::time::sleep(settle_delay).await;

            let mut inner = inner.lock();
            if current.load(Ordering::SeqCst) != generation {
                tracing::debug!("Composer restart {} superseded", generation);
                return Ok(RestartOutcome::Superseded);
            }

            let composer_id = inner.build()?;
            inner.restarts += 1;
            tracing::info!(
                "Composition restarted: position={:?}, size={:?}",
                inner.config.camera_position,
                inner.config.camera_size
            );
            Ok(RestartOutcome::Restarted { composer_id })
        });

        rebuild
            .await
            .map_err(|e| ComposerError::RestartFailed(e.to_string()))?
    }

    /// Stop and dispose the active composer, end the relay stream and forget
    /// the sources. Pending restarts are cancelled. Returns whether a composer
    /// was held.
    pub fn stop(&self) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        let had_composer = inner.teardown();
        inner.release_relay();
        inner.screen = None;
        inner.camera = None;
        had_composer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::types::{CameraPosition, CameraSize};
    use crate::media::Frame;

    fn stream(rgba: [u8; 4]) -> LiveStream {
        let track = MediaTrack::new(TrackKind::Video, "src", None);
        track.push_frame(Frame::solid(16, 9, rgba));
        LiveStream::new(vec![track])
    }

    fn base_config() -> CompositionConfig {
        CompositionConfig::default()
            .with_output(320, 180, 30)
            .with_position(CameraPosition::TopLeft)
            .with_size(CameraSize::Small)
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_change_restarts_once() {
        let slot = ComposerSlot::new(base_config(), Duration::from_millis(100));
        let relay = slot
            .start(stream([255, 0, 0, 255]), Some(stream([0, 0, 255, 255])))
            .unwrap();
        let first_id = slot.composer_id().unwrap();

        let moved = base_config().with_position(CameraPosition::BottomRight);
        let outcome = slot.restart(moved).await.unwrap();
        let RestartOutcome::Restarted { composer_id } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };

        assert_ne!(composer_id, first_id);
        assert_eq!(slot.restart_count(), 1);
        assert!(relay.is_live());
        assert_eq!(slot.output_stream().unwrap().id(), relay.id());

        tokio::time::sleep(Duration::from_millis(40)).await;
        let rect = slot.stats().unwrap().last_camera_rect.unwrap();
        assert_eq!(rect.right(), 320 - 20);
        assert_eq!(rect.bottom(), 180 - 20);

        let frame = relay.video_track().unwrap().latest_frame().unwrap();
        assert_eq!(frame.pixel(rect.right() - 2, rect.bottom() - 2), Some([0, 0, 255, 255]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_config_is_unchanged() {
        let slot = ComposerSlot::new(base_config(), Duration::from_millis(100));
        slot.start(stream([1, 1, 1, 255]), None).unwrap();
        let outcome = slot.restart(base_config()).await.unwrap();
        assert_eq!(outcome, RestartOutcome::Unchanged);
        assert_eq!(slot.restart_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_picks_up_new_camera() {
        let slot = ComposerSlot::new(base_config(), Duration::from_millis(100));
        slot.start(stream([1, 1, 1, 255]), None).unwrap();
        assert!(!slot.has_camera());

        slot.replace_sources(stream([1, 1, 1, 255]), Some(stream([9, 9, 9, 255])));
        let outcome = slot.rebuild().await.unwrap();
        assert!(matches!(outcome, RestartOutcome::Restarted { .. }));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(slot.stats().unwrap().camera_draws > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_changes_supersede() {
        let slot = Arc::new(ComposerSlot::new(base_config(), Duration::from_millis(100)));
        slot.start(stream([1, 1, 1, 255]), Some(stream([2, 2, 2, 255])))
            .unwrap();

        let a = {
            let slot = slot.clone();
            tokio::spawn(async move {
                slot.restart(base_config().with_position(CameraPosition::TopRight))
                    .await
            })
        };
        tokio::task::yield_now().await;
        let b = {
            let slot = slot.clone();
            tokio::spawn(async move {
                slot.restart(base_config().with_position(CameraPosition::BottomLeft))
                    .await
            })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a, RestartOutcome::Superseded);
        assert!(matches!(b, RestartOutcome::Restarted { .. }));
        assert_eq!(slot.restart_count(), 1);
        assert_eq!(slot.config().camera_position, CameraPosition::BottomLeft);
        assert!(slot.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_without_sources_is_idle() {
        let slot = ComposerSlot::new(base_config(), Duration::from_millis(100));
        let outcome = slot
            .restart(base_config().with_size(CameraSize::Large))
            .await
            .unwrap();
        assert_eq!(outcome, RestartOutcome::Idle);
        assert_eq!(slot.config().camera_size, CameraSize::Large);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_restart() {
        let slot = Arc::new(ComposerSlot::new(base_config(), Duration::from_millis(100)));
        let screen = stream([1, 1, 1, 255]);
        let relay = slot.start(screen.clone(), None).unwrap();

        let pending = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.restart(base_config().with_size(CameraSize::Large)).await })
        };
        tokio::task::yield_now().await;
        slot.stop();

        let outcome = pending.await.unwrap().unwrap();
        assert_eq!(outcome, RestartOutcome::Superseded);
        assert!(!slot.is_active());
        assert!(!relay.is_live());
        // Sources belong to the caller
        assert!(screen.is_live());
    }

    #[tokio::test]
    async fn test_failed_start_leaves_slot_empty() {
        let slot = ComposerSlot::new(base_config(), Duration::from_millis(100));
        let screen = stream([1, 1, 1, 255]);
        screen.stop();

        assert_eq!(slot.start(screen, None).err(), Some(ComposerError::ScreenStreamNotLive));
        assert!(slot.output_stream().is_none());
        assert_eq!(slot.rebuild().await.unwrap(), RestartOutcome::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_restart_still_rebuilds() {
        let slot = ComposerSlot::new(base_config(), Duration::from_millis(100));
        let relay = slot
            .start(stream([1, 1, 1, 255]), Some(stream([0, 0, 255, 255])))
            .unwrap();

        let moved = base_config().with_position(CameraPosition::BottomRight);
        let timed_out = tokio::time::timeout(Duration::from_millis(10), slot.restart(moved))
            .await
            .is_err();
        assert!(timed_out);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(slot.is_active());
        assert!(slot.composer_id().is_some());
        assert_eq!(slot.restart_count(), 1);
        assert!(relay.is_live());

        let frame = relay.video_track().unwrap().latest_frame().unwrap();
        assert_eq!(frame.pixel(320 - 22, 180 - 22), Some([0, 0, 255, 255]));
    }
}
