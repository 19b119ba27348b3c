//! HMD orientation sensor interface
//!
//! Defines the hardware-facing `SensorSource` trait together with the raw
//! tracking sample it produces and the roll/pitch/yaw sample derived from it.

mod simulated;

pub use simulated::SimulatedSensor;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Handle to the headset's tracking sensor.
///
/// `sample` is called concurrently by the background sampler and by
/// on-demand accessors, so implementations must tolerate parallel reads.
pub trait SensorSource: Send + Sync {
    /// Bring up the device. Called once before any sample is read.
    fn init(&self) -> Result<()>;

    /// Read the current tracking state.
    fn sample(&self) -> Result<RawSample>;

    /// Make the current orientation the straight-ahead orientation.
    fn recenter(&self) -> Result<()>;

    /// Release the device.
    fn shutdown(&self);
}

/// Orientation components as reported by the headset (w, x, y, z).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quat {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quat {
    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }
}

/// Head position in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// One raw tracking read.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawSample {
    pub orientation: Quat,
    pub position: Vec3,
}

/// Published head orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OrientationSample {
    /// Rotation about the depth axis (tilt head left/right).
    pub roll: f64,
    /// Rotation about the horizontal axis (look up/down).
    pub pitch: f64,
    /// Rotation about the vertical axis (look left/right).
    pub yaw: f64,
}

impl OrientationSample {
    /// Convert the headset's orientation components to degrees.
    ///
    /// The x/y/z components map directly to pitch/yaw/roll; `w` is not used.
    pub fn from_quat(q: &Quat) -> Self {
        Self {
            roll: q.z.to_degrees(),
            pitch: q.x.to_degrees(),
            yaw: q.y.to_degrees(),
        }
    }

    pub fn from_raw(raw: &RawSample) -> Self {
        Self::from_quat(&raw.orientation)
    }
}

impl std::fmt::Display for OrientationSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "roll {:.2} pitch {:.2} yaw {:.2}",
            self.roll, self.pitch, self.yaw
        )
    }
}

/// Head position scaled to centimetres. Only used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PositionSample {
    pub fn from_raw(raw: &RawSample) -> Self {
        Self {
            x: raw.position.x * 100.0,
            y: raw.position.y * 100.0,
            z: raw.position.z * 100.0,
        }
    }
}

impl std::fmt::Display for PositionSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {} {}", self.x as i64, self.y as i64, self.z as i64)
    }
}
