//! Error types shared by the tracking and frame pipelines.

use thiserror::Error;

use crate::capture::EyeSide;

/// Errors that can occur while setting up or running the head tracker.
#[derive(Error, Debug)]
pub enum RiftError {
    #[error("Unable to initialize HMD sensor: {0}")]
    SensorInit(String),
    #[error("Failed to read HMD tracking state: {0}")]
    SensorRead(String),
    #[error("Failed to start {side} eye capture: {reason}")]
    CaptureInit { side: EyeSide, reason: String },
    #[error("Failed to start presentation surface: {0}")]
    Presentation(String),
    #[error("Unknown frame source '{0}'")]
    UnknownFrameSource(String),
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RiftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RiftError::CaptureInit {
            side: EyeSide::Right,
            reason: "device busy".into(),
        };
        assert_eq!(err.to_string(), "Failed to start right eye capture: device busy");
        assert_eq!(
            RiftError::UnknownFrameSource("center".into()).to_string(),
            "Unknown frame source 'center'"
        );
    }
}
