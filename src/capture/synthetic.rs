//! Test-pattern capture source
//!
//! Generates frames on a background thread at a fixed rate. Each frame is a
//! vertical gradient with a bright horizontal marker row, which makes the
//! vertical alignment between the eyes easy to see.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use image::{Rgba, RgbaImage};

use super::{CaptureSource, EyeSide, FrameCallback, TaggedFrame};
use crate::error::{Result, RiftError};

/// Synthetic camera for one eye.
pub struct SyntheticCapture {
    side: EyeSide,
    width: u32,
    height: u32,
    fps: u32,
    /// Row of the marker line
    marker_row: u32,
    running: Arc<AtomicBool>,
    frame_count: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SyntheticCapture {
    pub fn new(side: EyeSide, width: u32, height: u32, fps: u32) -> Self {
        Self {
            side,
            width: width.max(1),
            height: height.max(1),
            fps: fps.max(1),
            marker_row: height / 2,
            running: Arc::new(AtomicBool::new(false)),
            frame_count: Arc::new(AtomicU64::new(0)),
            thread_handle: None,
        }
    }

    /// Place the marker row, e.g. to simulate a camera mounted slightly off.
    pub fn with_marker_row(mut self, row: u32) -> Self {
        self.marker_row = row.min(self.height.saturating_sub(1));
        self
    }

    /// Render one test-pattern frame.
    pub fn render_pattern(width: u32, height: u32, marker_row: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            if y == marker_row {
                Rgba([255, 255, 255, 255])
            } else {
                let shade = (y * 200 / height.max(1)) as u8;
                let tint = (x * 55 / width.max(1)) as u8;
                Rgba([shade, tint, 64, 255])
            }
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    fn capture_thread(
        side: EyeSide,
        pattern: RgbaImage,
        interval: Duration,
        running: Arc<AtomicBool>,
        frame_count: Arc<AtomicU64>,
        on_frame: FrameCallback,
    ) {
        log::info!("Starting synthetic capture thread ({} eye)", side);

        while running.load(Ordering::Acquire) {
            let frame_num = frame_count.fetch_add(1, Ordering::Relaxed);
            on_frame(TaggedFrame::new(side, pattern.clone(), frame_num));
            std::thread::sleep(interval);
        }

        log::info!("Synthetic capture thread stopped ({} eye)", side);
    }
}

impl CaptureSource for SyntheticCapture {
    fn side(&self) -> EyeSide {
        self.side
    }

    fn start_capture(&mut self, on_frame: FrameCallback) -> Result<()> {
        if self.thread_handle.is_some() {
            log::info!("{} eye capture already started", self.side);
            return Ok(());
        }

        let pattern = Self::render_pattern(self.width, self.height, self.marker_row);
        let interval = Duration::from_nanos(1_000_000_000u64 / self.fps as u64);
        let side = self.side;
        let running = self.running.clone();
        let frame_count = self.frame_count.clone();

        self.running.store(true, Ordering::Release);
        let handle = std::thread::Builder::new()
            .name(format!("rift-capture-{}", side))
            .spawn(move || {
                Self::capture_thread(side, pattern, interval, running, frame_count, on_frame)
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                RiftError::CaptureInit {
                    side,
                    reason: e.to_string(),
                }
            })?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    fn stop_capture(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn is_capturing(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for SyntheticCapture {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Instant;

    #[test]
    fn test_pattern_marker_row() {
        let img = SyntheticCapture::render_pattern(8, 6, 2);
        assert_eq!(img.get_pixel(3, 2), &Rgba([255, 255, 255, 255]));
        assert_ne!(img.get_pixel(3, 3), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_capture_delivers_tagged_frames() {
        let mut capture = SyntheticCapture::new(EyeSide::Left, 16, 8, 200);
        let frames = Arc::new(Mutex::new(Vec::new()));
        let f = frames.clone();
        capture
            .start_capture(Arc::new(move |frame: TaggedFrame| f.lock().push(frame)))
            .unwrap();
        assert!(capture.is_capturing());

        let deadline = Instant::now() + Duration::from_secs(2);
        while frames.lock().len() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        capture.stop_capture();
        assert!(!capture.is_capturing());

        let frames = frames.lock();
        assert!(frames.len() >= 3);
        assert!(frames.iter().all(|f| f.side().unwrap() == EyeSide::Left));
        assert!(frames.windows(2).all(|w| w[0].frame_number < w[1].frame_number));
        assert_eq!(frames[0].width(), 16);
    }
}
