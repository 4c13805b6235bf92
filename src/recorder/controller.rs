//! Recording session controller
//!
//! Drives the session state machine:
//!
//! ```text
//! Idle → SourceSelected → Composing → Recording → Idle
//!          any non-idle state → Error → Idle
//! ```
//!
//! The controller owns the screen stream and the composer slot. Camera and
//! microphone streams belong to their device managers and are only borrowed.

use super::encoder::Encoder;
use super::state::{
    RecordingOutcome, RecordingSession, SessionAction, SessionError, SessionEvent, SessionResult,
    SessionState,
};
use crate::capture::{CaptureSource, CaptureSourceProvider, PermissionProvider};
use crate::compose::{ComposerSlot, CompositionConfig, RestartOutcome};
use crate::config::RecorderSettings;
use crate::device::{DeviceClass, DeviceCoordinator, DeviceEvent, PollingHandle};
use crate::media::LiveStream;
use crate::utils::Notifier;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Collaborators of the controller
pub struct RecorderDeps {
    pub capture: Arc<dyn CaptureSourceProvider>,
    pub permissions: Arc<dyn PermissionProvider>,
    pub encoder: Arc<dyn Encoder>,
    pub devices: Arc<DeviceCoordinator>,
    pub notifier: Notifier,
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    source_id: Option<String>,
    /// Screen stream acquired by this controller
    screen: Option<LiveStream>,
    /// Stream handed to the encoder
    recording_stream: Option<LiveStream>,
    encoder_running: bool,
    session: Option<RecordingSession>,
    recording_started: Option<Instant>,
    last_error: Option<String>,
}

pub struct RecordingController {
    deps: RecorderDeps,
    settings: RwLock<RecorderSettings>,
    slot: ComposerSlot,
    inner: Mutex<Inner>,
    /// Serializes state-changing operations
    op: tokio::sync::Mutex<()>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl RecordingController {
    pub fn new(deps: RecorderDeps, settings: RecorderSettings) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let slot = ComposerSlot::new(settings.composition, settings.timing.restart_settle());
        Self {
            deps,
            settings: RwLock::new(settings),
            slot,
            inner: Mutex::new(Inner::default()),
            op: tokio::sync::Mutex::new(()),
            event_tx,
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Follow device events and refresh the composition whenever the
    /// camera is reconnected or lost. The task ends with the controller, and
    /// dropping the handle stops it.
    pub fn watch_devices(self: &Arc<Self>) -> PollingHandle {
        let mut events = self.deps.devices.subscribe();
        let controller = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Missed {} device events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !matches!(
                    event,
                    DeviceEvent::Reconnected(DeviceClass::Camera) | DeviceEvent::Lost(DeviceClass::Camera)
                ) {
                    continue;
                }
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                tracing::info!("Device event {:?}, refreshing camera", event);
                if let Err(e) = controller.refresh_camera().await {
                    tracing::warn!("Camera refresh failed: {}", e);
                }
            }
        });
        PollingHandle::new(vec![task])
    }

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Get the active recording session, if any
    pub fn session(&self) -> Option<RecordingSession> {
        self.inner.lock().session.clone()
    }

    /// Get the selected capture source ID
    pub fn selected_source(&self) -> Option<String> {
        self.inner.lock().source_id.clone()
    }

    /// Cause of the last transition into `Error`
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    /// Current settings, including the latest composition config
    pub fn settings(&self) -> RecorderSettings {
        self.settings.read().clone()
    }

    /// Get the composition config used by the next (re)start
    pub fn composition_config(&self) -> CompositionConfig {
        self.slot.config()
    }

    /// Whether a composer is currently running
    pub fn is_composing(&self) -> bool {
        self.slot.is_active()
    }

    /// Completed composer restarts
    pub fn restart_count(&self) -> u64 {
        self.slot.restart_count()
    }

    /// Get the device coordinator
    pub fn devices(&self) -> &Arc<DeviceCoordinator> {
        &self.deps.devices
    }

    /// The stream being recorded, or the preview stream while composing
    pub fn output_stream(&self) -> Option<LiveStream> {
        let inner = self.inner.lock();
        if let Some(stream) = &inner.recording_stream {
            return Some(stream.clone());
        }
        if inner.state != SessionState::Composing {
            return None;
        }
        self.slot.output_stream().or_else(|| inner.screen.clone())
    }

    /// Milliseconds recorded so far
    pub fn duration_ms(&self) -> u64 {
        self.inner
            .lock()
            .recording_started
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    /// List the screens and windows that can be captured
    pub async fn list_sources(&self) -> SessionResult<Vec<CaptureSource>> {
        Ok(self.deps.capture.enumerate_capture_sources().await?)
    }

    /// Choose the capture source for the next preview
    pub async fn select_source(&self, source_id: &str) -> SessionResult<()> {
        let _op = self.op.lock().await;
        self.check(SessionAction::SelectSource)?;

        self.inner.lock().source_id = Some(source_id.to_string());
        tracing::info!("Selected capture source: {}", source_id);
        self.set_state(SessionState::SourceSelected);
        Ok(())
    }

    /// Acquire the screen, make sure the camera is ready and start composing
    pub async fn start_preview(&self) -> SessionResult<()> {
        let _op = self.op.lock().await;
        self.check(SessionAction::StartPreview)?;
        self.start_preview_locked().await
    }

    async fn start_preview_locked(&self) -> SessionResult<()> {
        let source_id = self
            .inner
            .lock()
            .source_id
            .clone()
            .ok_or(SessionError::NoSourceSelected)?;

        let mut permissions = self.deps.permissions.check_permissions().await;
        if !permissions.screen_capture {
            permissions = self.deps.permissions.request_permissions().await;
        }
        if !permissions.screen_capture {
            return Err(self
                .fail(SessionError::PermissionDenied("screen capture".to_string()))
                .await);
        }

        tracing::info!("Acquiring screen stream for {}", source_id);
        let screen = match self.deps.capture.acquire_screen_stream(&source_id).await {
            Ok(screen) => screen,
            Err(e) => return Err(self.fail(e.into()).await),
        };
        self.inner.lock().screen = Some(screen.clone());

        let camera = if permissions.camera {
            self.ensure_camera().await
        } else {
            tracing::debug!("Camera permission not granted, composing screen only");
            None
        };

        if let Some(camera) = camera {
            if let Err(e) = self.slot.start(screen, Some(camera)) {
                return Err(self.fail(e.into()).await);
            }
        } else {
            tracing::info!("No camera stream, using the screen stream directly");
        }

        self.set_state(SessionState::Composing);
        Ok(())
    }

    /// Tear down the preview and return to `SourceSelected`
    pub async fn stop_preview(&self) -> SessionResult<()> {
        let _op = self.op.lock().await;
        self.check(SessionAction::StopPreview)?;
        self.teardown().await;
        self.set_state(SessionState::SourceSelected);
        Ok(())
    }

    /// Hand the output stream to the encoder. Starts the preview first when
    /// only a source is selected.
    pub async fn start_recording(&self) -> SessionResult<RecordingSession> {
        let _op = self.op.lock().await;
        self.check(SessionAction::StartRecording)?;
        if self.state() == SessionState::SourceSelected {
            self.start_preview_locked().await?;
        }

        let (source_id, screen) = {
            let inner = self.inner.lock();
            (inner.source_id.clone().unwrap_or_default(), inner.screen.clone())
        };
        let has_camera = self.slot.output_stream().is_some();
        let Some(video) = self.slot.output_stream().or(screen) else {
            return Err(self.fail(SessionError::StreamNotLive).await);
        };
        if !video.is_live() {
            return Err(self.fail(SessionError::StreamNotLive).await);
        }

        let microphone = self.ensure_microphone().await;
        let stream = match &microphone {
            Some(mic) => video.with_tracks(mic.audio_tracks()),
            None => video,
        };

        let format = self.settings.read().format;
        tracing::info!(
            "Starting encoder ({}): camera={}, microphone={}",
            format.container.mime_type(),
            has_camera,
            microphone.is_some()
        );
        if let Err(e) = self.deps.encoder.start(stream.clone(), &format).await {
            return Err(self.fail(e.into()).await);
        }

        let session = RecordingSession::new(source_id, has_camera, microphone.is_some());
        {
            let mut inner = self.inner.lock();
            inner.encoder_running = true;
            inner.recording_stream = Some(stream);
            inner.recording_started = Some(Instant::now());
            inner.session = Some(session.clone());
        }

        self.set_state(SessionState::Recording);
        let _ = self.event_tx.send(SessionEvent::Started(session.id));
        self.deps.notifier.success("Recording started");
        Ok(session)
    }

    /// Finalize the recording and release everything the session acquired
    pub async fn stop_recording(&self) -> SessionResult<RecordingOutcome> {
        let _op = self.op.lock().await;
        self.check(SessionAction::StopRecording)?;

        let result = self.deps.encoder.stop().await;
        let (session, started) = {
            let mut inner = self.inner.lock();
            inner.encoder_running = false;
            (inner.session.take(), inner.recording_started.take())
        };
        let duration_ms = started.map(|t| t.elapsed().as_millis() as u64).unwrap_or(0);

        let recording = match result {
            Ok(recording) => recording,
            Err(e) => return Err(self.fail(e.into()).await),
        };
        self.teardown().await;

        let mut session = match session {
            Some(session) => session,
            None => RecordingSession::new(self.selected_source().unwrap_or_default(), false, false),
        };
        session.is_active = false;

        {
            let mut inner = self.inner.lock();
            inner.source_id = None;
        }
        self.set_state(SessionState::Idle);

        tracing::info!(
            "Recording {} stopped: {}ms, {} bytes",
            session.id,
            duration_ms,
            recording.total_bytes()
        );
        let _ = self.event_tx.send(SessionEvent::Stopped {
            session_id: session.id,
            duration_ms,
        });
        self.deps.notifier.success("Recording saved");

        Ok(RecordingOutcome {
            session,
            recording,
            duration_ms,
        })
    }

    /// Apply a new composition config. A running composer is restarted
    /// without leaving `Composing` or `Recording`.
    pub async fn update_composition(&self, config: CompositionConfig) -> SessionResult<RestartOutcome> {
        config.validate()?;
        self.settings.write().composition = config;

        match self.slot.restart(config).await {
            Ok(outcome) => {
                if let RestartOutcome::Restarted { composer_id } = &outcome {
                    let _ = self.event_tx.send(SessionEvent::CompositionRestarted(*composer_id));
                }
                Ok(outcome)
            }
            Err(e) => {
                let _op = self.op.lock().await;
                if matches!(self.state(), SessionState::Composing | SessionState::Recording) {
                    Err(self.fail(e.into()).await)
                } else {
                    tracing::debug!("Ignoring composer error after the session ended: {}", e);
                    Err(e.into())
                }
            }
        }
    }

    /// Pick up a new or reconnected camera stream while composing or
    /// recording. Returns whether the composition now uses it.
    pub async fn refresh_camera(&self) -> SessionResult<bool> {
        let _op = self.op.lock().await;
        let state = self.state();
        if !matches!(state, SessionState::Composing | SessionState::Recording) {
            return Ok(false);
        }
        let Some(screen) = self.inner.lock().screen.clone() else {
            return Ok(false);
        };
        let camera = self.ensure_camera().await;

        if self.slot.output_stream().is_some() {
            self.slot.replace_sources(screen, camera);
            let outcome = match self.slot.rebuild().await {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.fail(e.into()).await),
            };
            if let RestartOutcome::Restarted { composer_id } = outcome {
                let has_camera = self.slot.has_camera();
                if let Some(session) = self.inner.lock().session.as_mut() {
                    session.has_camera = has_camera;
                }
                let _ = self.event_tx.send(SessionEvent::CompositionRestarted(composer_id));
                return Ok(has_camera);
            }
            return Ok(false);
        }

        match (state, camera) {
            (SessionState::Composing, Some(camera)) => {
                if let Err(e) = self.slot.start(screen, Some(camera)) {
                    return Err(self.fail(e.into()).await);
                }
                tracing::info!("Camera attached to preview");
                Ok(true)
            }
            (SessionState::Recording, Some(_)) => {
                tracing::warn!("Camera became available mid-recording, it will be used next time");
                self.deps
                    .notifier
                    .warning("Camera will be included in the next recording");
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Release everything and return to `Idle`
    pub async fn reset(&self) {
        let _op = self.op.lock().await;
        self.teardown().await;
        {
            let mut inner = self.inner.lock();
            inner.source_id = None;
            inner.session = None;
            inner.last_error = None;
        }
        self.set_state(SessionState::Idle);
    }

    fn check(&self, action: SessionAction) -> SessionResult<()> {
        let from = self.state();
        if from.allows(action) {
            Ok(())
        } else {
            tracing::warn!("Rejected {} while {}", action, from);
            Err(SessionError::InvalidTransition { from, action })
        }
    }

    fn set_state(&self, to: SessionState) {
        let from = {
            let mut inner = self.inner.lock();
            std::mem::replace(&mut inner.state, to)
        };
        if from != to {
            tracing::info!("Session state: {} -> {}", from, to);
            let _ = self.event_tx.send(SessionEvent::StateChanged { from, to });
        }
    }

    /// Release whatever the session acquired, enter `Error` and report
    async fn fail(&self, error: SessionError) -> SessionError {
        tracing::error!("Session failed: {}", error);
        self.teardown().await;

        let message = error.to_string();
        self.inner.lock().last_error = Some(message.clone());
        self.set_state(SessionState::Error);
        let _ = self.event_tx.send(SessionEvent::Error(message.clone()));
        self.deps.notifier.error(&message);
        error
    }

    /// Stop the encoder if it runs, stop the composition and the owned screen
    /// stream. Device streams are left to their managers.
    async fn teardown(&self) {
        let encoder_running = std::mem::take(&mut self.inner.lock().encoder_running);
        if encoder_running {
            if let Err(e) = self.deps.encoder.stop().await {
                tracing::error!("Failed to stop encoder during teardown: {}", e);
            }
        }

        if self.slot.stop() {
            tracing::debug!("Composition stopped");
        }

        let screen = {
            let mut inner = self.inner.lock();
            inner.recording_stream = None;
            inner.recording_started = None;
            inner.screen.take()
        };
        if let Some(screen) = screen {
            screen.stop();
            tracing::debug!("Screen stream {} stopped", screen.id());
        }
    }

    /// The camera main stream when the camera is enabled, initializing it on
    /// demand. Failure is reported and yields `None`.
    async fn ensure_camera(&self) -> Option<LiveStream> {
        let manager = self.deps.devices.camera();
        if !manager.is_enabled() {
            return None;
        }
        if !manager.has_live_main_stream() {
            let result = self.deps.devices.initialize_camera().await;
            if !result.success {
                let reason = result.error.unwrap_or_default();
                tracing::warn!("Camera unavailable, recording screen only: {}", reason);
                self.deps.notifier.warning("Camera unavailable, recording screen only");
                return None;
            }
        }
        manager.main_stream().filter(|s| s.is_live())
    }

    async fn ensure_microphone(&self) -> Option<LiveStream> {
        let manager = self.deps.devices.microphone();
        if !manager.is_enabled() {
            return None;
        }
        if !manager.has_live_main_stream() {
            let result = self.deps.devices.initialize_microphone().await;
            if !result.success {
                tracing::warn!(
                    "Microphone unavailable, recording without audio: {}",
                    result.error.unwrap_or_default()
                );
                self.deps.notifier.warning("Microphone unavailable, recording without audio");
                return None;
            }
        }
        manager.main_stream().filter(|s| s.is_live() && s.has_audio())
    }
}
