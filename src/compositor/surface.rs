//! In-memory presentation surface.

use std::sync::atomic::{AtomicU64, Ordering};

use image::RgbaImage;
use parking_lot::Mutex;

use super::{PresentationSurface, RiftFrame};
use crate::error::Result;

/// Keeps the latest side-by-side display buffer instead of driving a headset.
#[derive(Default)]
pub struct HeadlessSurface {
    buffer: Mutex<Option<RgbaImage>>,
    frames_received: AtomicU64,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last composed display buffer.
    pub fn latest_buffer(&self) -> Option<RgbaImage> {
        self.buffer.lock().clone()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }
}

impl PresentationSurface for HeadlessSurface {
    fn start(&self) -> Result<()> {
        log::info!("Headless presentation surface started");
        Ok(())
    }

    fn set_current_frame(&self, frame: &RiftFrame) {
        let buffer = frame.side_by_side();
        *self.buffer.lock() = buffer;
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }
}
