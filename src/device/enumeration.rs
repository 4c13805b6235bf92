//! Device enumeration and permission probing

use super::manager::DeviceStreamManager;
use crate::capture::{
    CaptureError, DeviceDescriptor, DeviceEnumerator, DeviceKind, PermissionProvider,
    PermissionStatus,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Characters of the device ID used in a synthesized label
const FALLBACK_ID_CHARS: usize = 8;

/// Label to show for a device, synthesizing one from the ID when the
/// platform withheld it (no permission yet).
pub fn display_label(device: &DeviceDescriptor) -> String {
    if !device.label.trim().is_empty() {
        return device.label.clone();
    }
    let prefix = match device.kind {
        DeviceKind::VideoInput => "Camera",
        DeviceKind::AudioInput => "Microphone",
    };
    let short: String = device.device_id.chars().take(FALLBACK_ID_CHARS).collect();
    format!("{prefix} {short}")
}

/// Last observed device lists, one per kind
pub struct DeviceCatalog {
    enumerator: Arc<dyn DeviceEnumerator>,
    devices: RwLock<HashMap<DeviceKind, Vec<DeviceDescriptor>>>,
}

impl DeviceCatalog {
    pub fn new(enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        Self {
            enumerator,
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Enumerate again and replace the list for `kind`. Empty labels are
    /// replaced with fallback labels and empty IDs are dropped.
    pub async fn refresh(&self, kind: DeviceKind) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        let devices: Vec<DeviceDescriptor> = self
            .enumerator
            .enumerate_devices()
            .await?
            .into_iter()
            .filter(|d| d.kind == kind && !d.device_id.is_empty())
            .map(|d| DeviceDescriptor {
                label: display_label(&d),
                ..d
            })
            .collect();

        tracing::debug!("Found {} {:?} device(s)", devices.len(), kind);
        self.devices.write().insert(kind, devices.clone());
        Ok(devices)
    }

    /// Devices seen by the last refresh
    pub fn devices(&self, kind: DeviceKind) -> Vec<DeviceDescriptor> {
        self.devices.read().get(&kind).cloned().unwrap_or_default()
    }

    pub fn contains(&self, kind: DeviceKind, device_id: &str) -> bool {
        self.devices
            .read()
            .get(&kind)
            .map(|list| list.iter().any(|d| d.device_id == device_id))
            .unwrap_or(false)
    }

    /// Select a device for `manager`. The device must have been observed by
    /// a previous refresh.
    pub fn select(&self, manager: &DeviceStreamManager, device_id: &str) -> Result<bool, CaptureError> {
        let kind = manager.class().kind();
        if !self.contains(kind, device_id) {
            return Err(CaptureError::DeviceNotFound(device_id.to_string()));
        }
        Ok(manager.select_device(Some(device_id.to_string())))
    }

    /// Refresh the manager's device kind and reconcile its selection: a
    /// vanished selection is cleared, and with no selection the first device
    /// is picked. Returns the resulting selection.
    pub async fn refresh_selection(
        &self,
        manager: &DeviceStreamManager,
    ) -> Result<Option<String>, CaptureError> {
        let devices = self.refresh(manager.class().kind()).await?;
        let current = manager.selected_device_id();

        let still_present = current
            .as_deref()
            .map(|id| devices.iter().any(|d| d.device_id == id))
            .unwrap_or(false);
        if still_present {
            return Ok(current);
        }

        let next = devices.first().map(|d| d.device_id.clone());
        if current.is_some() {
            tracing::warn!("Selected {} {:?} is gone", manager.class(), current);
        }
        manager.select_device(next.clone());
        Ok(next)
    }
}

/// Request camera then microphone access, waiting `gap` between the two
/// requests so native dialogs do not overlap. Classes already granted are not
/// requested again.
pub async fn probe_permissions(provider: &dyn PermissionProvider, gap: Duration) -> PermissionStatus {
    let mut status = provider.check_permissions().await;

    if !status.camera {
        status.camera = provider.request_permission(DeviceKind::VideoInput).await;
        if !status.microphone {
            tokio::time::sleep(gap).await;
        }
    }
    if !status.microphone {
        status.microphone = provider.request_permission(DeviceKind::AudioInput).await;
    }

    tracing::info!(
        "Permissions: camera={}, microphone={}, screen={}",
        status.camera,
        status.microphone,
        status.screen_capture
    );
    status
}
