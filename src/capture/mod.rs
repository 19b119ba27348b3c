//! Stereo camera capture module
//!
//! Each eye has its own `CaptureSource` that delivers tagged frames to a
//! callback from its own thread. Frames carry a string side tag so that a
//! misconfigured source is detected by the compositor instead of silently
//! landing in the wrong eye.

mod synthetic;

#[cfg(feature = "camera")]
mod camera;

#[cfg(feature = "camera")]
pub use camera::CameraCapture;
pub use synthetic::SyntheticCapture;

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RiftError};

/// Which eye a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EyeSide {
    Left,
    Right,
}

impl EyeSide {
    pub const BOTH: [EyeSide; 2] = [EyeSide::Left, EyeSide::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            EyeSide::Left => "left",
            EyeSide::Right => "right",
        }
    }
}

impl std::fmt::Display for EyeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EyeSide {
    type Err = RiftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(EyeSide::Left),
            "right" => Ok(EyeSide::Right),
            _ => Err(RiftError::UnknownFrameSource(s.to_string())),
        }
    }
}

/// Frame produced by a capture source.
#[derive(Debug, Clone)]
pub struct TaggedFrame {
    /// Side tag set by the producing source ("left" / "right")
    pub source: String,
    /// RGBA pixels
    pub image: Arc<RgbaImage>,
    /// Capture time
    pub timestamp: Instant,
    /// Per-source frame counter
    pub frame_number: u64,
}

impl TaggedFrame {
    pub fn new(side: EyeSide, image: RgbaImage, frame_number: u64) -> Self {
        Self::with_source(side.as_str(), image, frame_number)
    }

    /// Build a frame with an arbitrary tag.
    pub fn with_source(source: impl Into<String>, image: RgbaImage, frame_number: u64) -> Self {
        Self {
            source: source.into(),
            image: Arc::new(image),
            timestamp: Instant::now(),
            frame_number,
        }
    }

    /// Parse the side tag.
    pub fn side(&self) -> Result<EyeSide> {
        self.source.parse()
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Callback invoked by a capture source for each new frame.
pub type FrameCallback = Arc<dyn Fn(TaggedFrame) + Send + Sync>;

/// Asynchronous per-eye frame producer.
pub trait CaptureSource: Send {
    /// The eye this source feeds.
    fn side(&self) -> EyeSide;

    /// Begin delivering frames to `on_frame`.
    ///
    /// Returns an error if the device cannot be opened; frames are delivered
    /// from a thread owned by the source.
    fn start_capture(&mut self, on_frame: FrameCallback) -> Result<()>;

    /// Stop delivering frames.
    fn stop_capture(&mut self);

    fn is_capturing(&self) -> bool;
}

/// Wait for a capture thread to report whether its device opened.
///
/// A thread that reported failure has already returned and is joined. On
/// timeout the thread may still be blocked inside the driver, so it is told to
/// stop and left detached.
#[cfg_attr(not(feature = "camera"), allow(dead_code))]
pub(crate) fn await_device_open(
    side: EyeSide,
    opened_rx: &Receiver<std::result::Result<(), String>>,
    timeout: Duration,
    running: &AtomicBool,
    thread_handle: &mut Option<JoinHandle<()>>,
) -> Result<()> {
    let reason = match opened_rx.recv_timeout(timeout) {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(reason)) => {
            running.store(false, Ordering::Release);
            if let Some(handle) = thread_handle.take() {
                let _ = handle.join();
            }
            reason
        }
        Err(RecvTimeoutError::Disconnected) => {
            running.store(false, Ordering::Release);
            if let Some(handle) = thread_handle.take() {
                let _ = handle.join();
            }
            "capture thread exited before opening the device".to_string()
        }
        Err(RecvTimeoutError::Timeout) => {
            running.store(false, Ordering::Release);
            thread_handle.take();
            log::warn!("{} eye device did not open in {:?}; detaching its thread", side, timeout);
            "timed out opening camera".to_string()
        }
    };
    Err(RiftError::CaptureInit { side, reason })
}
