//! Recorder settings
//!
//! User-configurable device, layout, format and timing settings, persisted as
//! a JSON file.

use crate::compose::CompositionConfig;
use crate::recorder::encoder::RecordingFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Settings file name inside the app config directory
pub const SETTINGS_FILE: &str = "settings.json";

/// Settings-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// User intent for one device class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceSettings {
    pub enabled: bool,
    pub device_id: Option<String>,
}

/// Bounded fixed-delay retry for device acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Poll intervals and heuristic delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimingSettings {
    /// Re-check the auto-initialization condition
    pub reconnect_poll_ms: u64,
    /// Verify track liveness
    pub health_check_ms: u64,
    /// Wait between composer teardown and rebuild
    pub restart_settle_ms: u64,
    /// Gap between sequential permission requests
    pub permission_probe_gap_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            reconnect_poll_ms: 3000,
            health_check_ms: 5000,
            restart_settle_ms: 100,
            permission_probe_gap_ms: 500,
        }
    }
}

impl TimingSettings {
    pub fn reconnect_poll(&self) -> Duration {
        Duration::from_millis(self.reconnect_poll_ms)
    }

    pub fn health_check(&self) -> Duration {
        Duration::from_millis(self.health_check_ms)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    pub fn permission_probe_gap(&self) -> Duration {
        Duration::from_millis(self.permission_probe_gap_ms)
    }
}

/// All recorder settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderSettings {
    pub camera: DeviceSettings,
    pub microphone: DeviceSettings,
    pub composition: CompositionConfig,
    pub format: RecordingFormat,
    pub retry: RetryPolicy,
    pub timing: TimingSettings,
}

impl RecorderSettings {
    /// Load settings, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)?;

        tracing::debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Write settings as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;

        tracing::debug!("Saved settings to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{CameraPosition, CameraSize};
    use crate::recorder::encoder::Container;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let settings = RecorderSettings::load(&dir.path().join(SETTINGS_FILE)).unwrap();
        assert_eq!(settings, RecorderSettings::default());
        assert_eq!(settings.retry.attempts, 3);
        assert_eq!(settings.timing.restart_settle_ms, 100);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);

        let mut settings = RecorderSettings::default();
        settings.camera = DeviceSettings {
            enabled: true,
            device_id: Some("cam-1".to_string()),
        };
        settings.composition = settings
            .composition
            .with_position(CameraPosition::TopLeft)
            .with_size(CameraSize::Large);
        settings.format.container = Container::Mp4;

        settings.save(&path).unwrap();
        let loaded = RecorderSettings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, r#"{"microphone":{"enabled":true},"retry":{"attempts":5}}"#).unwrap();

        let settings = RecorderSettings::load(&path).unwrap();
        assert!(settings.microphone.enabled);
        assert_eq!(settings.microphone.device_id, None);
        assert_eq!(settings.retry.attempts, 5);
        assert_eq!(settings.retry.delay_ms, 1000);
        assert_eq!(settings.timing.health_check_ms, 5000);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(RecorderSettings::load(&path), Err(ConfigError::Json(_))));
    }
}
