//! Composition types and configuration
//!
//! Defines the overlay configuration, geometry and error types used by the
//! video composer.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Corner the camera overlay is pinned to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

/// Overlay size tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl CameraSize {
    /// Overlay width as a fraction of the output width
    pub fn width_fraction(&self) -> f64 {
        match self {
            CameraSize::Small => 0.20,
            CameraSize::Medium => 0.30,
            CameraSize::Large => 0.40,
        }
    }
}

/// Overlay and output settings for one composer instance
///
/// Compared by value: any difference requires a new composer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompositionConfig {
    pub camera_position: CameraPosition,
    pub camera_size: CameraSize,
    /// Output frames per second
    pub output_frame_rate: u32,
    pub output_width: u32,
    pub output_height: u32,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            camera_position: CameraPosition::default(),
            camera_size: CameraSize::default(),
            output_frame_rate: 30,
            output_width: 1920,
            output_height: 1080,
        }
    }
}

impl CompositionConfig {
    pub fn with_position(mut self, position: CameraPosition) -> Self {
        self.camera_position = position;
        self
    }

    pub fn with_size(mut self, size: CameraSize) -> Self {
        self.camera_size = size;
        self
    }

    pub fn with_output(mut self, width: u32, height: u32, frame_rate: u32) -> Self {
        self.output_width = width;
        self.output_height = height;
        self.output_frame_rate = frame_rate;
        self
    }

    /// Time between two draw cycles
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.output_frame_rate.max(1)))
    }

    pub fn validate(&self) -> Result<(), ComposerError> {
        if self.output_frame_rate == 0 || self.output_frame_rate > 240 {
            return Err(ComposerError::InvalidFrameRate(self.output_frame_rate));
        }
        if self.output_width == 0 || self.output_height == 0 {
            return Err(ComposerError::InvalidCanvas {
                width: self.output_width,
                height: self.output_height,
            });
        }
        Ok(())
    }
}

/// Axis-aligned pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Exclusive right edge
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}

/// Draw statistics for a composer instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionStats {
    /// Draw cycles completed
    pub frames_drawn: u64,
    /// Cycles in which the camera frame was drawn
    pub camera_draws: u64,
    /// Where the camera was drawn last
    pub last_camera_rect: Option<Rect>,
}

/// Composer errors
///
/// Apart from invalid input, these indicate misuse of a composer instance.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComposerError {
    #[error("A screen stream is required")]
    MissingScreenStream,

    #[error("Screen stream is not live")]
    ScreenStreamNotLive,

    #[error("Composition already started")]
    AlreadyStarted,

    #[error("Composition not started")]
    NotStarted,

    #[error("Composer has been disposed")]
    Disposed,

    #[error("No async runtime available to drive the draw loop")]
    NoRuntime,

    #[error("Composer restart did not complete: {0}")]
    RestartFailed(String),

    #[error("Invalid output frame rate: {0}")]
    InvalidFrameRate(u32),

    #[error("Invalid canvas size: {width}x{height}")]
    InvalidCanvas { width: u32, height: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_interval_at_30fps() {
        let config = CompositionConfig::default();
        assert_eq!(config.frame_interval(), Duration::from_micros(33_333));
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let config = CompositionConfig::default().with_output(1280, 720, 0);
        assert_eq!(config.validate(), Err(ComposerError::InvalidFrameRate(0)));
    }

    #[test]
    fn test_config_compares_by_value() {
        let a = CompositionConfig::default().with_position(CameraPosition::TopLeft);
        let b = CompositionConfig::default().with_position(CameraPosition::TopLeft);
        assert_eq!(a, b);
        assert_ne!(a, b.with_size(CameraSize::Large));
    }

    #[test]
    fn test_config_serde_names() {
        let config = CompositionConfig::default()
            .with_position(CameraPosition::TopRight)
            .with_size(CameraSize::Small);
        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["cameraPosition"], "top-right");
        assert_eq!(json["cameraSize"], "small");

        let partial: CompositionConfig =
            serde_json::from_str(r#"{"cameraPosition":"bottom-left"}"#).unwrap();
        assert_eq!(partial.camera_position, CameraPosition::BottomLeft);
        assert_eq!(partial.output_frame_rate, 30);
    }
}
