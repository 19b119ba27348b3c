//! Configuration and serialization module.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::capture::EyeSide;
use crate::error::Result;

/// Default sensor polling interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20;

/// Head tracker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiftConfig {
    /// Sensor polling interval.
    pub poll_interval_ms: u64,
    /// Left eye camera and correction.
    pub left: EyeConfig,
    /// Right eye camera and correction.
    pub right: EyeConfig,
    /// Requested capture width.
    pub capture_width: u32,
    /// Requested capture height.
    pub capture_height: u32,
    /// Requested capture rate.
    pub capture_fps: u32,
}

impl Default for RiftConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            left: EyeConfig::default_for(EyeSide::Left),
            right: EyeConfig::default_for(EyeSide::Right),
            capture_width: 640,
            capture_height: 480,
            capture_fps: 30,
        }
    }
}

impl RiftConfig {
    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save the configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn eye(&self, side: EyeSide) -> &EyeConfig {
        match side {
            EyeSide::Left => &self.left,
            EyeSide::Right => &self.right,
        }
    }

    pub fn eye_mut(&mut self, side: EyeSide) -> &mut EyeConfig {
        match side {
            EyeSide::Left => &mut self.left,
            EyeSide::Right => &mut self.right,
        }
    }
}

/// Per-eye camera configuration.
///
/// The defaults match cameras mounted on their sides with the left one
/// upside down relative to the right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeConfig {
    /// Capture device index.
    pub camera_index: u32,
    /// Static rotation in degrees (counter-clockwise).
    pub angle: f64,
    /// Vertical offset in pixels (positive moves the image down).
    pub vertical_offset: f64,
    /// Quarter turn clockwise before the rotation.
    pub transpose: bool,
}

impl EyeConfig {
    pub fn default_for(side: EyeSide) -> Self {
        match side {
            EyeSide::Left => Self {
                camera_index: 1,
                angle: 180.0,
                vertical_offset: 0.0,
                transpose: true,
            },
            EyeSide::Right => Self {
                camera_index: 0,
                angle: 0.0,
                vertical_offset: 0.0,
                transpose: true,
            },
        }
    }
}

impl Default for EyeConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            angle: 0.0,
            vertical_offset: 0.0,
            transpose: false,
        }
    }
}
