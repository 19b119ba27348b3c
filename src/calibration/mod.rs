//! Per-eye geometric correction and vertical alignment.
//!
//! Each eye owns an `EyeCalibrator` holding a static rotation and a vertical
//! offset. The offsets are computed once from a reference point clicked in
//! each eye's image; see [`vertical_alignment`].

mod warp;

pub use warp::{rotate_and_shift, transpose_flip};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capture::{EyeSide, TaggedFrame};
use crate::config::EyeConfig;

/// Pixel location marked by the user in one eye's image.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub x: f64,
    pub y: f64,
}

impl ReferencePoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Geometric correction for one eye.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EyeTransform {
    /// Rotation in degrees, counter-clockwise
    pub angle: f64,
    /// Vertical shift in pixels, positive is down
    pub vertical_offset: f64,
    /// Quarter turn clockwise applied before the rotation
    pub transpose: bool,
}

impl EyeTransform {
    pub fn apply(&self, image: &image::RgbaImage) -> image::RgbaImage {
        if self.transpose {
            let turned = transpose_flip(image);
            rotate_and_shift(&turned, self.angle, self.vertical_offset)
        } else {
            rotate_and_shift(image, self.angle, self.vertical_offset)
        }
    }
}

impl From<&EyeConfig> for EyeTransform {
    fn from(config: &EyeConfig) -> Self {
        Self {
            angle: config.angle,
            vertical_offset: config.vertical_offset,
            transpose: config.transpose,
        }
    }
}

/// Half the vertical distance between the two reference points.
///
/// The left eye is shifted by `-delta` and the right eye by `+delta`.
pub fn vertical_alignment(left: ReferencePoint, right: ReferencePoint) -> f64 {
    (left.y - right.y) / 2.0
}

/// Correction state for one eye.
#[derive(Debug, Clone)]
pub struct EyeCalibrator {
    side: EyeSide,
    transform: EyeTransform,
    reference_click: Option<ReferencePoint>,
}

impl EyeCalibrator {
    pub fn new(side: EyeSide, transform: EyeTransform) -> Self {
        Self {
            side,
            transform,
            reference_click: None,
        }
    }

    pub fn from_config(side: EyeSide, config: &EyeConfig) -> Self {
        Self::new(side, EyeTransform::from(config))
    }

    pub fn side(&self) -> EyeSide {
        self.side
    }

    pub fn transform(&self) -> EyeTransform {
        self.transform
    }

    pub fn angle(&self) -> f64 {
        self.transform.angle
    }

    pub fn set_angle(&mut self, angle: f64) {
        self.transform.angle = angle;
    }

    pub fn vertical_offset(&self) -> f64 {
        self.transform.vertical_offset
    }

    pub fn set_vertical_offset(&mut self, dy: f64) {
        self.transform.vertical_offset = dy;
    }

    /// Apply the current correction, keeping the frame's tag and timestamp.
    pub fn on_frame_arrived(&self, frame: TaggedFrame) -> TaggedFrame {
        let corrected = self.transform.apply(&frame.image);
        TaggedFrame {
            image: Arc::new(corrected),
            ..frame
        }
    }

    /// Store the reference point for this eye, replacing any earlier one.
    pub fn record_reference_click(&mut self, point: ReferencePoint) {
        log::debug!("{} eye reference click at ({}, {})", self.side, point.x, point.y);
        self.reference_click = Some(point);
    }

    pub fn reference_click(&self) -> Option<ReferencePoint> {
        self.reference_click
    }

    pub fn clear_reference_click(&mut self) {
        self.reference_click = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{imageops, Rgba, RgbaImage};

    fn frame(side: EyeSide) -> TaggedFrame {
        let img = RgbaImage::from_fn(4, 2, |x, y| Rgba([x as u8 * 10, y as u8 * 10, 0, 255]));
        TaggedFrame::new(side, img, 7)
    }

    #[test]
    fn test_vertical_alignment() {
        let left = ReferencePoint::new(100.0, 50.0);
        let right = ReferencePoint::new(100.0, 40.0);
        let delta = vertical_alignment(left, right);
        assert!((delta - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_identity_transform_preserves_frame() {
        let calibrator = EyeCalibrator::new(EyeSide::Right, EyeTransform::default());
        let input = frame(EyeSide::Right);
        let output = calibrator.on_frame_arrived(input.clone());

        assert_eq!(*output.image, *input.image);
        assert_eq!(output.source, "right");
        assert_eq!(output.frame_number, 7);
        assert_eq!(output.timestamp, input.timestamp);
    }

    #[test]
    fn test_setters_take_effect_on_next_frame() {
        let mut calibrator = EyeCalibrator::new(EyeSide::Left, EyeTransform::default());
        let input = frame(EyeSide::Left);

        calibrator.set_angle(180.0);
        let rotated = calibrator.on_frame_arrived(input.clone());
        assert_eq!(*rotated.image, imageops::rotate180(&*input.image));

        calibrator.set_angle(0.0);
        calibrator.set_vertical_offset(1.0);
        let shifted = calibrator.on_frame_arrived(input.clone());
        assert_eq!(shifted.image.get_pixel(2, 1), input.image.get_pixel(2, 0));
    }

    #[test]
    fn test_transpose_changes_dimensions() {
        let config = EyeConfig::default_for(EyeSide::Left);
        let calibrator = EyeCalibrator::from_config(EyeSide::Left, &config);
        let output = calibrator.on_frame_arrived(frame(EyeSide::Left));
        assert_eq!(output.image.dimensions(), (2, 4));
    }

    #[test]
    fn test_reference_click_last_write_wins() {
        let mut calibrator = EyeCalibrator::new(EyeSide::Left, EyeTransform::default());
        assert!(calibrator.reference_click().is_none());

        calibrator.record_reference_click(ReferencePoint::new(1.0, 2.0));
        calibrator.record_reference_click(ReferencePoint::new(3.0, 4.0));
        assert_eq!(calibrator.reference_click(), Some(ReferencePoint::new(3.0, 4.0)));

        calibrator.clear_reference_click();
        assert!(calibrator.reference_click().is_none());
    }
}
