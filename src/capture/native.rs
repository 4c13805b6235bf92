//! Native device enumeration
//!
//! Lists webcams through nokhwa and audio inputs through cpal. Only
//! enumeration is native; stream acquisition still goes through a
//! `MediaAcquirer`.

use super::traits::{CaptureError, DeviceDescriptor, DeviceEnumerator, DeviceKind};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait};
use nokhwa::utils::{ApiBackend, CameraIndex};

/// Enumerator backed by the platform camera and audio APIs
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeDeviceEnumerator;

impl NativeDeviceEnumerator {
    pub fn new() -> Self {
        Self
    }
}

fn cameras() -> Vec<DeviceDescriptor> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let device_id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                DeviceDescriptor {
                    device_id,
                    label: info.human_name().to_string(),
                    kind: DeviceKind::VideoInput,
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

fn microphones() -> Vec<DeviceDescriptor> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices
            .filter_map(|device| device.name().ok())
            .map(|name| DeviceDescriptor {
                device_id: name.clone(),
                label: name,
                kind: DeviceKind::AudioInput,
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate audio inputs: {}", e);
            Vec::new()
        }
    }
}

#[async_trait]
impl DeviceEnumerator for NativeDeviceEnumerator {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        tokio::task::spawn_blocking(|| {
            let mut devices = cameras();
            devices.extend(microphones());
            devices
        })
        .await
        .map_err(|e| CaptureError::Provider(format!("device enumeration task failed: {}", e)))
    }
}
