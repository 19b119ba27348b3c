//! Stereo frame compositor
//!
//! Receives frames from both eye capture threads, corrects them with the
//! matching `EyeCalibrator`, keeps the latest corrected frame per eye in a
//! `RiftFrame` and pushes that pair to the presentation surface and to
//! subscribers.
//!
//! Each eye updates independently: there is no barrier waiting for the other
//! eye, so the two halves of a published `RiftFrame` may come from different
//! capture times.

mod surface;

pub use surface::HeadlessSurface;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::{imageops, Rgba, RgbaImage};
use parking_lot::{Mutex, RwLock};

use crate::calibration::{vertical_alignment, EyeCalibrator, EyeTransform, ReferencePoint};
use crate::capture::{EyeSide, TaggedFrame};
use crate::error::Result;
use crate::publish::Publisher;

/// Display that shows the composed stereo frame.
pub trait PresentationSurface: Send + Sync {
    /// Called once when the service starts.
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Replace the frame being displayed.
    ///
    /// Called from the capture threads while the compositor holds its frame
    /// lock; must not call back into the compositor.
    fn set_current_frame(&self, frame: &RiftFrame);
}

/// Latest corrected frame for each eye.
#[derive(Debug, Clone, Default)]
pub struct RiftFrame {
    pub left: Option<TaggedFrame>,
    pub right: Option<TaggedFrame>,
}

impl RiftFrame {
    pub fn get(&self, side: EyeSide) -> Option<&TaggedFrame> {
        match side {
            EyeSide::Left => self.left.as_ref(),
            EyeSide::Right => self.right.as_ref(),
        }
    }

    pub fn set(&mut self, side: EyeSide, frame: TaggedFrame) {
        match side {
            EyeSide::Left => self.left = Some(frame),
            EyeSide::Right => self.right = Some(frame),
        }
    }

    /// Both eyes have delivered at least one frame.
    pub fn is_complete(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }

    /// Compose both eyes into one buffer, left eye on the left.
    ///
    /// A missing eye is drawn black at the size of the present one.
    pub fn side_by_side(&self) -> Option<RgbaImage> {
        let left = self.left.as_ref().map(|f| f.image.dimensions());
        let right = self.right.as_ref().map(|f| f.image.dimensions());
        let (lw, lh) = left.or(right)?;
        let (rw, rh) = right.or(left)?;

        let mut out = RgbaImage::from_pixel(lw + rw, lh.max(rh), Rgba([0, 0, 0, 255]));
        if let Some(frame) = &self.left {
            imageops::replace(&mut out, &*frame.image, 0, 0);
        }
        if let Some(frame) = &self.right {
            imageops::replace(&mut out, &*frame.image, lw as i64, 0);
        }
        Some(out)
    }
}

/// Compositor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositorStats {
    pub frames_composed: u64,
    pub frames_dropped: u64,
}

struct ComposeState {
    frame: RiftFrame,
    calibrated: bool,
}

/// Routes eye frames through calibration into the shared `RiftFrame`.
///
/// Lock order is state, then left, then right.
pub struct FrameCompositor {
    left: Mutex<EyeCalibrator>,
    right: Mutex<EyeCalibrator>,
    state: Mutex<ComposeState>,
    surface: RwLock<Option<Arc<dyn PresentationSurface>>>,
    publisher: Arc<Publisher<RiftFrame>>,
    frames_composed: AtomicU64,
    frames_dropped: AtomicU64,
}

impl FrameCompositor {
    pub fn new(
        left: EyeTransform,
        right: EyeTransform,
        publisher: Arc<Publisher<RiftFrame>>,
    ) -> Self {
        Self {
            left: Mutex::new(EyeCalibrator::new(EyeSide::Left, left)),
            right: Mutex::new(EyeCalibrator::new(EyeSide::Right, right)),
            state: Mutex::new(ComposeState {
                frame: RiftFrame::default(),
                calibrated: false,
            }),
            surface: RwLock::new(None),
            publisher,
            frames_composed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    fn calibrator(&self, side: EyeSide) -> &Mutex<EyeCalibrator> {
        match side {
            EyeSide::Left => &self.left,
            EyeSide::Right => &self.right,
        }
    }

    /// Handle one frame from a capture thread.
    ///
    /// Frames with an unknown side tag are dropped and reported. The returned
    /// `RiftFrame` is the pair that was published.
    pub fn on_frame_arrived(&self, frame: TaggedFrame) -> Result<RiftFrame> {
        let side = match frame.side() {
            Ok(side) => side,
            Err(e) => {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                log::error!("unknown source {}", frame.source);
                return Err(e);
            }
        };

        // Work on a copy so the warp runs without holding the eye lock
        let calibrator = self.calibrator(side).lock().clone();
        let corrected = calibrator.on_frame_arrived(frame);

        let composed = {
            let mut state = self.state.lock();
            state.frame.set(side, corrected);
            self.calibrate_locked(&mut state);
            let composed = state.frame.clone();

            // Pushed under the state lock so the surface never ends up behind
            // the compositor when both eyes race
            match self.surface.read().as_ref() {
                Some(surface) => surface.set_current_frame(&composed),
                None => log::warn!("The presentation surface was not set."),
            }
            composed
        };

        self.publisher.publish(&composed);
        self.frames_composed.fetch_add(1, Ordering::Relaxed);
        Ok(composed)
    }

    /// Run the vertical alignment if it has not happened yet and both eyes
    /// have a reference point. Returns true if it ran.
    pub fn try_calibrate(&self) -> bool {
        let mut state = self.state.lock();
        self.calibrate_locked(&mut state)
    }

    fn calibrate_locked(&self, state: &mut ComposeState) -> bool {
        if state.calibrated {
            return false;
        }

        let mut left = self.left.lock();
        let mut right = self.right.lock();
        let (Some(left_point), Some(right_point)) =
            (left.reference_click(), right.reference_click())
        else {
            return false;
        };

        let delta_y = vertical_alignment(left_point, right_point);
        left.set_vertical_offset(-delta_y);
        right.set_vertical_offset(delta_y);
        state.calibrated = true;
        log::info!("Delta Y calibrated {}", delta_y);
        true
    }

    /// Forget reference points and offsets so the next pair of clicks
    /// calibrates again.
    pub fn reset_calibration(&self) {
        let mut state = self.state.lock();
        let mut left = self.left.lock();
        let mut right = self.right.lock();
        left.clear_reference_click();
        right.clear_reference_click();
        left.set_vertical_offset(0.0);
        right.set_vertical_offset(0.0);
        state.calibrated = false;
        log::info!("Calibration reset");
    }

    pub fn is_calibrated(&self) -> bool {
        self.state.lock().calibrated
    }

    pub fn record_reference_click(&self, side: EyeSide, point: ReferencePoint) {
        self.calibrator(side).lock().record_reference_click(point);
    }

    pub fn reference_click(&self, side: EyeSide) -> Option<ReferencePoint> {
        self.calibrator(side).lock().reference_click()
    }

    pub fn set_angle(&self, side: EyeSide, angle: f64) {
        self.calibrator(side).lock().set_angle(angle);
    }

    pub fn set_vertical_offset(&self, side: EyeSide, dy: f64) {
        self.calibrator(side).lock().set_vertical_offset(dy);
    }

    pub fn eye_transform(&self, side: EyeSide) -> EyeTransform {
        self.calibrator(side).lock().transform()
    }

    pub fn set_presentation_surface(&self, surface: Option<Arc<dyn PresentationSurface>>) {
        *self.surface.write() = surface;
    }

    pub fn presentation_surface(&self) -> Option<Arc<dyn PresentationSurface>> {
        self.surface.read().clone()
    }

    /// Latest composed pair.
    pub fn current_frame(&self) -> RiftFrame {
        self.state.lock().frame.clone()
    }

    pub fn stats(&self) -> CompositorStats {
        CompositorStats {
            frames_composed: self.frames_composed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}
