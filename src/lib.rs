//! Rift Tracker - HMD head tracking with stereo camera passthrough
//!
//! Polls a head-mounted display's orientation sensor on a background thread and
//! publishes roll/pitch/yaw samples, while two independent camera streams are
//! rotated, vertically aligned and composed into a stereo frame for the headset.

pub mod calibration;
pub mod capture;
pub mod compositor;
pub mod config;
pub mod error;
pub mod publish;
pub mod sensor;
pub mod service;
pub mod tracking;

pub use calibration::{EyeCalibrator, EyeTransform, ReferencePoint};
pub use capture::{CaptureSource, EyeSide, FrameCallback, SyntheticCapture, TaggedFrame};
pub use compositor::{FrameCompositor, HeadlessSurface, PresentationSurface, RiftFrame};
pub use config::{EyeConfig, RiftConfig};
pub use error::{Result, RiftError};
pub use publish::{Publisher, SubscriptionId};
pub use sensor::{OrientationSample, PositionSample, RawSample, SensorSource, SimulatedSensor};
pub use service::{HeadTrackingService, ServiceState};
pub use tracking::{OrientationSampler, SamplerStats};

#[cfg(feature = "camera")]
pub use capture::CameraCapture;
