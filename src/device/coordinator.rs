//! Device initialization coordinator
//!
//! Serializes initialization per device class across every caller, runs the
//! manager's bounded retry, and exposes an aggregate readiness signal. Two
//! independent polls recover from missed triggers and dead tracks.

use super::manager::DeviceStreamManager;
use super::state::{DeviceClass, InitOutcome};
use crate::capture::MediaAcquirer;
use crate::config::{RecorderSettings, RetryPolicy};
use crate::utils::Notifier;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Single-slot lock guarding the start of an initialization
#[derive(Debug, Default)]
pub struct InitLock {
    held: AtomicBool,
}

impl InitLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock if it is free. Never waits.
    pub fn try_acquire(&self) -> Option<InitGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InitGuard { lock: self })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases its `InitLock` when dropped
#[derive(Debug)]
pub struct InitGuard<'a> {
    lock: &'a InitLock,
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}

/// Device stream changes observed by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "class", rename_all = "camelCase")]
pub enum DeviceEvent {
    /// A coordinated initialization produced a live main stream
    Ready(DeviceClass),
    /// A dead main stream was replaced by a live one
    Reconnected(DeviceClass),
    /// A dead main stream could not be replaced
    Lost(DeviceClass),
}

/// Device classes the application asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredDevices {
    pub camera: bool,
    pub microphone: bool,
}

impl RequiredDevices {
    pub fn includes(&self, class: DeviceClass) -> bool {
        match class {
            DeviceClass::Camera => self.camera,
            DeviceClass::Microphone => self.microphone,
        }
    }
}

impl Default for RequiredDevices {
    fn default() -> Self {
        Self {
            camera: true,
            microphone: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub required: RequiredDevices,
    pub retry: RetryPolicy,
    /// Period of the auto-initialization poll
    pub reconnect_poll: Duration,
    /// Period of the track liveness poll
    pub health_check: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            required: RequiredDevices::default(),
            retry: RetryPolicy::default(),
            reconnect_poll: Duration::from_secs(3),
            health_check: Duration::from_secs(5),
        }
    }
}

impl CoordinatorOptions {
    pub fn from_settings(settings: &RecorderSettings) -> Self {
        Self {
            required: RequiredDevices {
                camera: settings.camera.enabled,
                microphone: settings.microphone.enabled,
            },
            retry: settings.retry,
            reconnect_poll: settings.timing.reconnect_poll(),
            health_check: settings.timing.health_check(),
        }
    }
}

/// Result of one coordinated initialization. Failure is a value, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResult {
    pub success: bool,
    pub error: Option<String>,
}

impl InitResult {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

/// Observable per-class outcome of the last coordinated initialization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStatus {
    pub camera_initialized: bool,
    pub camera_error: Option<String>,
    pub microphone_initialized: bool,
    pub microphone_error: Option<String>,
}

impl CoordinatorStatus {
    fn record(&mut self, class: DeviceClass, result: &InitResult) {
        let (initialized, error) = match class {
            DeviceClass::Camera => (&mut self.camera_initialized, &mut self.camera_error),
            DeviceClass::Microphone => (&mut self.microphone_initialized, &mut self.microphone_error),
        };
        *initialized = result.success;
        *error = result.error.clone();
    }
}

struct ClassSlot {
    manager: Arc<DeviceStreamManager>,
    lock: InitLock,
}

pub struct DeviceCoordinator {
    camera: ClassSlot,
    microphone: ClassSlot,
    options: RwLock<CoordinatorOptions>,
    status: Mutex<CoordinatorStatus>,
    event_tx: broadcast::Sender<DeviceEvent>,
}

impl DeviceCoordinator {
    pub fn new(
        camera: Arc<DeviceStreamManager>,
        microphone: Arc<DeviceStreamManager>,
        options: CoordinatorOptions,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            camera: ClassSlot {
                manager: camera,
                lock: InitLock::new(),
            },
            microphone: ClassSlot {
                manager: microphone,
                lock: InitLock::new(),
            },
            options: RwLock::new(options),
            status: Mutex::new(CoordinatorStatus::default()),
            event_tx,
        }
    }

    /// Build both managers from persisted settings. Nothing is acquired yet.
    pub fn from_settings(
        acquirer: Arc<dyn MediaAcquirer>,
        notifier: Notifier,
        settings: &RecorderSettings,
    ) -> Self {
        let camera = DeviceStreamManager::new(DeviceClass::Camera, acquirer.clone(), notifier.clone())
            .with_intent(settings.camera.enabled, settings.camera.device_id.clone());
        let microphone = DeviceStreamManager::new(DeviceClass::Microphone, acquirer, notifier)
            .with_intent(settings.microphone.enabled, settings.microphone.device_id.clone());
        Self::new(
            Arc::new(camera),
            Arc::new(microphone),
            CoordinatorOptions::from_settings(settings),
        )
    }

    fn slot(&self, class: DeviceClass) -> &ClassSlot {
        match class {
            DeviceClass::Camera => &self.camera,
            DeviceClass::Microphone => &self.microphone,
        }
    }

    /// Get the manager of one device class
    pub fn manager(&self, class: DeviceClass) -> &Arc<DeviceStreamManager> {
        &self.slot(class).manager
    }

    /// Get the camera manager
    pub fn camera(&self) -> &Arc<DeviceStreamManager> {
        self.manager(DeviceClass::Camera)
    }

    /// Get the microphone manager
    pub fn microphone(&self) -> &Arc<DeviceStreamManager> {
        self.manager(DeviceClass::Microphone)
    }

    /// Outcome of the last coordinated initialization per class
    pub fn status(&self) -> CoordinatorStatus {
        self.status.lock().clone()
    }

    /// Subscribe to device events
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_tx.subscribe()
    }

    /// Classes requested at construction or through `set_required`
    pub fn required(&self) -> RequiredDevices {
        self.options.read().required
    }

    pub fn set_required(&self, required: RequiredDevices) {
        self.options.write().required = required;
    }

    /// A class is requested when the application required it or the user
    /// has it enabled now.
    pub fn is_requested(&self, class: DeviceClass) -> bool {
        self.required().includes(class) || self.manager(class).is_enabled()
    }

    /// Whether an initialization of `class` is in flight
    pub fn is_locked(&self, class: DeviceClass) -> bool {
        self.slot(class).lock.is_held()
    }

    pub async fn initialize_camera(&self) -> InitResult {
        self.initialize(DeviceClass::Camera).await
    }

    pub async fn initialize_microphone(&self) -> InitResult {
        self.initialize(DeviceClass::Microphone).await
    }

    /// Initialize one class. Returns a failure result immediately when the
    /// class was not requested or another initialization holds the lock.
    pub async fn initialize(&self, class: DeviceClass) -> InitResult {
        if !self.is_requested(class) {
            return InitResult::failed(format!("{} was not requested", class));
        }
        let retry = self.options.read().retry;

        let slot = self.slot(class);
        let Some(_guard) = slot.lock.try_acquire() else {
            tracing::debug!("{} initialization already in progress", class);
            return InitResult::failed(format!("{} initialization already in progress", class));
        };

        let outcome = slot.manager.initialize_main_stream_with_retry(&retry).await;
        let result = match outcome {
            InitOutcome::Failed(message) => InitResult::failed(message),
            _ if slot.manager.has_live_main_stream() => InitResult::ok(),
            _ => InitResult::failed(
                slot.manager
                    .error()
                    .unwrap_or_else(|| format!("{} is not enabled or no device is selected", class)),
            ),
        };

        self.status.lock().record(class, &result);
        if result.success {
            tracing::info!("{} initialized", class);
            let _ = self.event_tx.send(DeviceEvent::Ready(class));
        }
        result
    }

    /// Change the selected device of `class`. When that leaves an enabled
    /// class without a stream, an initialization is scheduled right away.
    /// Returns whether the selection changed.
    pub fn select_device(self: &Arc<Self>, class: DeviceClass, device_id: Option<String>) -> bool {
        let changed = self.manager(class).select_device(device_id);
        if changed {
            self.schedule_initialize(class);
        }
        changed
    }

    /// Spawn an initialization of `class` if it meets the auto-init
    /// condition. Returns whether one was spawned.
    pub fn schedule_initialize(self: &Arc<Self>, class: DeviceClass) -> bool {
        let slot = self.slot(class);
        if !self.is_requested(class) || slot.lock.is_held() || !slot.manager.needs_initialization() {
            return false;
        }
        tracing::debug!("Scheduling {} initialization", class);
        let coordinator = self.clone();
        tokio::spawn(async move {
            // Another caller may have initialized the class in the meantime
            if coordinator.manager(class).needs_initialization() {
                coordinator.initialize(class).await;
            }
        });
        true
    }

    /// Every requested class holds a live main stream
    pub fn all_ready(&self) -> bool {
        DeviceClass::ALL
            .iter()
            .filter(|class| self.is_requested(**class))
            .all(|class| self.manager(*class).has_live_main_stream())
    }

    /// Initialize every requested class that is enabled, selected, holds no
    /// stream and is not being initialized. Returns the classes attempted.
    pub async fn auto_initialize(&self) -> Vec<(DeviceClass, InitResult)> {
        let mut results = Vec::new();
        for class in DeviceClass::ALL {
            let slot = self.slot(class);
            if !self.is_requested(class) || slot.lock.is_held() || !slot.manager.needs_initialization() {
                continue;
            }
            tracing::debug!("Auto-initializing {}", class);
            results.push((class, self.initialize(class).await));
        }
        results
    }

    /// Reconnect any class whose main stream has a dead track. Locked classes
    /// are skipped. Returns the classes that were reconnected.
    pub async fn health_check(&self) -> Vec<DeviceClass> {
        let mut reconnected = Vec::new();
        for class in DeviceClass::ALL {
            let slot = self.slot(class);
            let Some(_guard) = slot.lock.try_acquire() else {
                continue;
            };
            if slot.manager.check_and_reconnect().await {
                let (result, event) = if slot.manager.has_live_main_stream() {
                    (InitResult::ok(), DeviceEvent::Reconnected(class))
                } else {
                    let message = slot
                        .manager
                        .error()
                        .unwrap_or_else(|| format!("{} reconnect failed", class));
                    (InitResult::failed(message), DeviceEvent::Lost(class))
                };
                self.status.lock().record(class, &result);
                let _ = self.event_tx.send(event);
                reconnected.push(class);
            }
        }
        reconnected
    }

    /// Re-acquire every requested class whose stream is missing or stale.
    /// Classes with a live stream are left alone.
    pub async fn reconnect_devices(&self) -> Vec<(DeviceClass, InitResult)> {
        let mut results = Vec::new();
        for class in DeviceClass::ALL {
            if !self.is_requested(class) {
                continue;
            }
            let manager = self.manager(class);
            if manager.has_live_main_stream() {
                results.push((class, InitResult::ok()));
                continue;
            }
            if manager.has_stale_main_stream() && !self.is_locked(class) {
                manager.stop_main_stream();
            }
            results.push((class, self.initialize(class).await));
        }
        results
    }

    /// Start the reconnect and health polls. Both hold only a weak reference
    /// to the coordinator and end when it is dropped. Must be called from
    /// within a tokio runtime.
    pub fn start_polling(self: &Arc<Self>) -> PollingHandle {
        let (reconnect_period, health_period) = {
            let options = self.options.read();
            (options.reconnect_poll, options.health_check)
        };
        tracing::debug!(
            "Starting device polls (reconnect every {:?}, health every {:?})",
            reconnect_period,
            health_period
        );

        let reconnect = spawn_poll(Arc::downgrade(self), reconnect_period, |coordinator| async move {
            coordinator.auto_initialize().await;
        });
        let health = spawn_poll(Arc::downgrade(self), health_period, |coordinator| async move {
            coordinator.health_check().await;
        });

        PollingHandle {
            tasks: vec![reconnect, health],
        }
    }
}

fn spawn_poll<F, Fut>(coordinator: Weak<DeviceCoordinator>, period: Duration, run: F) -> JoinHandle<()>
where
    F: Fn(Arc<DeviceCoordinator>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(coordinator) = coordinator.upgrade() else {
                break;
            };
            run(coordinator).await;
        }
    })
}

/// Owns the poll tasks. Dropping it stops them.
#[derive(Debug)]
pub struct PollingHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl PollingHandle {
    pub(crate) fn new(tasks: Vec<JoinHandle<()>>) -> Self {
        Self { tasks }
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }

    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
