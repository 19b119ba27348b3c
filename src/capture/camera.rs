//! Physical camera capture using the nokhwa crate.
//!
//! The camera is opened on the capture thread (nokhwa cameras are not
//! `Send`); the open result is reported back so `start_capture` fails when
//! the device is unavailable.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use image::RgbaImage;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;

use super::{await_device_open, CaptureSource, EyeSide, FrameCallback, TaggedFrame};
use crate::error::{Result, RiftError};

/// How long `start_capture` waits for the device to open. A thread still
/// blocked in the driver after this is detached.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Camera feeding one eye.
pub struct CameraCapture {
    side: EyeSide,
    camera_index: u32,
    width: u32,
    height: u32,
    running: Arc<AtomicBool>,
    frame_count: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CameraCapture {
    pub fn new(side: EyeSide, camera_index: u32, width: u32, height: u32) -> Self {
        Self {
            side,
            camera_index,
            width,
            height,
            running: Arc::new(AtomicBool::new(false)),
            frame_count: Arc::new(AtomicU64::new(0)),
            thread_handle: None,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    fn open_camera(
        camera_index: u32,
        width: u32,
        height: u32,
    ) -> std::result::Result<Camera, String> {
        let index = CameraIndex::Index(camera_index);
        let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::HighestResolution(
            Resolution::new(width, height),
        ));

        let mut camera = match Camera::new(index.clone(), requested) {
            Ok(c) => c,
            Err(e) => {
                log::warn!(
                    "Failed to open camera {} at {}x{}: {:?}",
                    camera_index,
                    width,
                    height,
                    e
                );
                let fallback = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::None);
                Camera::new(index, fallback).map_err(|e| format!("{:?}", e))?
            }
        };

        camera.open_stream().map_err(|e| format!("{:?}", e))?;
        Ok(camera)
    }

    fn capture_thread(
        side: EyeSide,
        camera_index: u32,
        width: u32,
        height: u32,
        running: Arc<AtomicBool>,
        frame_count: Arc<AtomicU64>,
        opened_tx: Sender<std::result::Result<(), String>>,
        on_frame: FrameCallback,
    ) {
        log::info!("Starting camera capture thread ({} eye, camera {})", side, camera_index);

        let mut camera = match Self::open_camera(camera_index, width, height) {
            Ok(c) => {
                let _ = opened_tx.send(Ok(()));
                c
            }
            Err(e) => {
                log::error!("Failed to open camera {}: {}", camera_index, e);
                running.store(false, Ordering::Release);
                let _ = opened_tx.send(Err(e));
                return;
            }
        };

        log::info!(
            "Camera opened: {} ({}x{})",
            camera.info().human_name(),
            camera.resolution().width(),
            camera.resolution().height()
        );

        while running.load(Ordering::Acquire) {
            let frame = match camera.frame() {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("Failed to capture frame: {:?}", e);
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
            };

            let resolution = frame.resolution();
            let decoded = match frame.decode_image::<RgbAFormat>() {
                Ok(decoded) => decoded,
                Err(e) => {
                    log::warn!("Failed to decode frame: {:?}", e);
                    continue;
                }
            };

            let Some(image) =
                RgbaImage::from_raw(resolution.width(), resolution.height(), decoded.into_raw())
            else {
                log::warn!(
                    "Decoded frame size does not match {}x{}",
                    resolution.width(),
                    resolution.height()
                );
                continue;
            };

            let frame_num = frame_count.fetch_add(1, Ordering::Relaxed);
            on_frame(TaggedFrame::new(side, image, frame_num));
        }

        if let Err(e) = camera.stop_stream() {
            log::warn!("Failed to stop camera stream: {:?}", e);
        }
        log::info!("Camera capture thread stopped ({} eye)", side);
    }
}

impl CaptureSource for CameraCapture {
    fn side(&self) -> EyeSide {
        self.side
    }

    fn start_capture(&mut self, on_frame: FrameCallback) -> Result<()> {
        if self.thread_handle.is_some() {
            log::info!("{} eye capture already started", self.side);
            return Ok(());
        }

        let (opened_tx, opened_rx) = crossbeam_channel::bounded(1);
        let side = self.side;
        let (camera_index, width, height) = (self.camera_index, self.width, self.height);
        let running = self.running.clone();
        let frame_count = self.frame_count.clone();

        self.running.store(true, Ordering::Release);
        let handle = std::thread::Builder::new()
            .name(format!("rift-capture-{}", side))
            .spawn(move || {
                Self::capture_thread(
                    side,
                    camera_index,
                    width,
                    height,
                    running,
                    frame_count,
                    opened_tx,
                    on_frame,
                )
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                RiftError::CaptureInit {
                    side,
                    reason: e.to_string(),
                }
            })?;
        self.thread_handle = Some(handle);

        await_device_open(side, &opened_rx, OPEN_TIMEOUT, &self.running, &mut self.thread_handle)
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

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.stop_capture();
    }
}
