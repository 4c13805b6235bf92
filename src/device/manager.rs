//! Device stream lifecycle
//!
//! Acquires and releases the streams of one device class so that the held
//! streams always match the user's intent (enabled, selected device, preview
//! on or off). Errors never escape as failures of the caller; they are
//! stored on the state and reported through the notifier.

use super::state::{DeviceClass, DeviceStatus, DeviceStreamState, InitOutcome, LeasePurpose, StreamLease};
use crate::capture::MediaAcquirer;
use crate::config::RetryPolicy;
use crate::media::LiveStream;
use crate::utils::Notifier;
use parking_lot::Mutex;
use std::sync::Arc;

/// Clears an in-flight flag when the acquisition ends, including when the
/// future is dropped mid-await.
struct InFlight<'a> {
    state: &'a Mutex<DeviceStreamState>,
    preview: bool,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(state: &'a Mutex<DeviceStreamState>, preview: bool) -> Self {
        Self {
            state,
            preview,
            armed: true,
        }
    }

    /// Clear the flag on an already locked state
    fn finish(&mut self, state: &mut DeviceStreamState) {
        self.armed = false;
        if self.preview {
            state.preview_pending = false;
        } else {
            state.is_initializing = false;
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock();
            if self.preview {
                state.preview_pending = false;
            } else {
                state.is_initializing = false;
            }
        }
    }
}

/// Lifecycle manager for one device class
pub struct DeviceStreamManager {
    class: DeviceClass,
    acquirer: Arc<dyn MediaAcquirer>,
    notifier: Notifier,
    state: Mutex<DeviceStreamState>,
}

impl DeviceStreamManager {
    pub fn new(class: DeviceClass, acquirer: Arc<dyn MediaAcquirer>, notifier: Notifier) -> Self {
        Self {
            class,
            acquirer,
            notifier,
            state: Mutex::new(DeviceStreamState::default()),
        }
    }

    /// Start with the given intent. No stream is acquired until initialization runs.
    pub fn with_intent(self, enabled: bool, device_id: Option<String>) -> Self {
        {
            let mut state = self.state.lock();
            state.is_enabled = enabled;
            state.selected_device_id = device_id;
        }
        self
    }

    /// Get the device class this manager owns
    pub fn class(&self) -> DeviceClass {
        self.class
    }

    /// Get a snapshot of the current state for display
    pub fn snapshot(&self) -> DeviceStatus {
        DeviceStatus::from_state(self.class, &self.state.lock())
    }

    /// Whether the user wants this device on
    pub fn is_enabled(&self) -> bool {
        self.state.lock().is_enabled
    }

    /// Whether a main stream acquisition is in flight
    pub fn is_initializing(&self) -> bool {
        self.state.lock().is_initializing
    }

    /// Get the selected device ID
    pub fn selected_device_id(&self) -> Option<String> {
        self.state.lock().selected_device_id.clone()
    }

    /// Get the last acquisition error
    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    /// Handle to the main stream, if held
    pub fn main_stream(&self) -> Option<LiveStream> {
        self.state.lock().main_stream.as_ref().map(|l| l.stream().clone())
    }

    /// Handle to the preview stream, if held
    pub fn preview_stream(&self) -> Option<LiveStream> {
        self.state.lock().preview_stream.as_ref().map(|l| l.stream().clone())
    }

    /// Whether the main stream is held and every track is live
    pub fn has_live_main_stream(&self) -> bool {
        self.state.lock().has_live_main_stream()
    }

    /// Enabled and selected, with no main stream and nothing in flight
    pub fn needs_initialization(&self) -> bool {
        self.state.lock().needs_initialization()
    }

    /// Enabled and holding a main stream with a dead track
    pub fn has_stale_main_stream(&self) -> bool {
        self.state.lock().has_stale_main_stream()
    }

    /// Acquire the main stream for the selected device.
    ///
    /// Skipped without error unless enabled, a device is selected and no
    /// acquisition is already in flight. Any previous main stream is stopped
    /// first.
    pub async fn initialize_main_stream(&self) -> InitOutcome {
        self.acquire_main(true).await
    }

    /// `initialize_main_stream` with bounded fixed-delay retries.
    /// Exhausting the attempts is a terminal failure for this call.
    pub async fn initialize_main_stream_with_retry(&self, policy: &RetryPolicy) -> InitOutcome {
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            let last = attempt == attempts;
            match self.acquire_main(last).await {
                InitOutcome::Failed(message) if !last => {
                    tracing::warn!(
                        "{} initialization attempt {}/{} failed: {}",
                        self.class,
                        attempt,
                        attempts,
                        message
                    );
                    self.notifier.info(&format!(
                        "Retrying {} ({}/{})",
                        self.class,
                        attempt + 1,
                        attempts
                    ));
                    tokio::time::sleep(policy.delay()).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    async fn acquire_main(&self, notify_error: bool) -> InitOutcome {
        let device_id = {
            let mut state = self.state.lock();
            if !state.is_enabled || state.is_initializing {
                tracing::debug!(
                    "Skipping {} init (enabled={}, initializing={})",
                    self.class,
                    state.is_enabled,
                    state.is_initializing
                );
                return InitOutcome::Skipped;
            }
            let Some(device_id) = state.selected_device_id.clone() else {
                tracing::debug!("Skipping {} init: no device selected", self.class);
                return InitOutcome::Skipped;
            };

            if state.main_stream.take().is_some() {
                tracing::debug!("Released previous {} main stream", self.class);
            }
            state.is_initializing = true;
            state.error = None;
            device_id
        };
        let mut in_flight = InFlight::new(&self.state, false);

        tracing::info!("Initializing {} main stream for device {}", self.class, device_id);
        let result = self
            .acquirer
            .acquire(self.class.kind(), &device_id, &self.class.constraints())
            .await;

        let mut state = self.state.lock();
        in_flight.finish(&mut state);
        match result {
            Ok(stream) => {
                if !state.is_enabled || state.selected_device_id.as_deref() != Some(device_id.as_str()) {
                    // Intent changed while acquiring
                    stream.stop();
                    tracing::debug!("Discarding stale {} stream for {}", self.class, device_id);
                    return InitOutcome::Skipped;
                }
                state.main_stream = Some(StreamLease::new(device_id, LeasePurpose::Main, stream));
                drop(state);

                tracing::info!("{} main stream ready", self.class);
                self.notifier.success(&format!("{} connected", capitalize(self.class.name())));
                InitOutcome::Ready
            }
            Err(e) => {
                let message = format!("Failed to access {}: {}", self.class, e);
                state.error = Some(message.clone());
                drop(state);

                tracing::warn!("{}", message);
                if notify_error {
                    self.notifier.error(&message);
                }
                InitOutcome::Failed(message)
            }
        }
    }

    /// Acquire an independent preview stream.
    ///
    /// Idempotent: skipped when preview is inactive, a preview stream is
    /// already held or being acquired, or the class is disabled. Failure
    /// sets `error` and leaves the main stream alone.
    pub async fn initialize_preview_stream(&self) -> InitOutcome {
        let device_id = {
            let mut state = self.state.lock();
            if !state.is_enabled
                || !state.is_preview_active
                || state.preview_stream.is_some()
                || state.preview_pending
            {
                return InitOutcome::Skipped;
            }
            let Some(device_id) = state.selected_device_id.clone() else {
                return InitOutcome::Skipped;
            };
            state.preview_pending = true;
            device_id
        };
        let mut in_flight = InFlight::new(&self.state, true);

        let result = self
            .acquirer
            .acquire(self.class.kind(), &device_id, &self.class.constraints())
            .await;

        let mut state = self.state.lock();
        in_flight.finish(&mut state);
        match result {
            Ok(stream) => {
                let still_wanted = state.is_enabled
                    && state.is_preview_active
                    && state.preview_stream.is_none()
                    && state.selected_device_id.as_deref() == Some(device_id.as_str());
                if !still_wanted {
                    stream.stop();
                    return InitOutcome::Skipped;
                }
                state.preview_stream = Some(StreamLease::new(device_id, LeasePurpose::Preview, stream));
                tracing::debug!("{} preview stream ready", self.class);
                InitOutcome::Ready
            }
            Err(e) => {
                let message = format!("Failed to start {} preview: {}", self.class, e);
                state.error = Some(message.clone());
                drop(state);
                tracing::warn!("{}", message);
                InitOutcome::Failed(message)
            }
        }
    }

    /// Turn the preview on (acquiring it) or off (releasing it)
    pub async fn set_preview_active(&self, active: bool) -> InitOutcome {
        self.state.lock().is_preview_active = active;
        if active {
            self.initialize_preview_stream().await
        } else {
            self.stop_preview_stream();
            InitOutcome::Skipped
        }
    }

    /// Stop the main stream. Returns whether one was held.
    pub fn stop_main_stream(&self) -> bool {
        let released = self.state.lock().main_stream.take().is_some();
        if released {
            tracing::debug!("Stopped {} main stream", self.class);
        }
        released
    }

    /// Stop the preview stream. Returns whether one was held.
    pub fn stop_preview_stream(&self) -> bool {
        let released = self.state.lock().preview_stream.take().is_some();
        if released {
            tracing::debug!("Stopped {} preview stream", self.class);
        }
        released
    }

    /// Stop the main and preview streams
    pub fn stop_all_streams(&self) {
        self.stop_main_stream();
        self.stop_preview_stream();
    }

    /// Flip the enabled flag. Returns the new value.
    pub async fn toggle_enabled(&self) -> bool {
        let enable = !self.is_enabled();
        self.set_enabled(enable).await;
        enable
    }

    /// Disabling releases every stream before the flag is observed false.
    /// Enabling triggers main stream initialization.
    pub async fn set_enabled(&self, enabled: bool) -> InitOutcome {
        if !enabled {
            let mut state = self.state.lock();
            let main = state.main_stream.take();
            let preview = state.preview_stream.take();
            drop(main);
            drop(preview);
            state.is_enabled = false;
            drop(state);

            tracing::info!("{} disabled", self.class);
            return InitOutcome::Skipped;
        }

        {
            let mut state = self.state.lock();
            if state.is_enabled {
                return InitOutcome::Skipped;
            }
            state.is_enabled = true;
        }
        tracing::info!("{} enabled", self.class);
        self.initialize_main_stream().await
    }

    /// Change the selected device. Streams opened against another device are
    /// released. Returns whether the selection changed.
    pub fn select_device(&self, device_id: Option<String>) -> bool {
        let mut state = self.state.lock();
        if state.selected_device_id == device_id {
            return false;
        }

        let matches = |lease: &Option<StreamLease>| {
            lease.as_ref().map(|l| Some(l.device_id()) == device_id.as_deref()).unwrap_or(true)
        };
        let main = if matches(&state.main_stream) { None } else { state.main_stream.take() };
        let preview = if matches(&state.preview_stream) { None } else { state.preview_stream.take() };

        tracing::info!("{} device selected: {:?}", self.class, device_id);
        state.selected_device_id = device_id;
        state.error = None;
        drop(state);
        drop(main);
        drop(preview);
        true
    }

    /// Health check: when enabled and the main stream has a track that is no
    /// longer live, release it and initialize again. Returns whether a
    /// reconnect was attempted.
    pub async fn check_and_reconnect(&self) -> bool {
        if !self.has_stale_main_stream() {
            return false;
        }

        tracing::warn!("{} stream is no longer live, reconnecting", self.class);
        self.notifier.warning(&format!("{} disconnected, reconnecting", capitalize(self.class.name())));
        self.stop_main_stream();
        self.initialize_main_stream().await;
        true
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
