//! Pixel-level eye correction.

use image::{imageops, Rgba, RgbaImage};

/// Fill for pixels with no source.
const BORDER: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Rotate `image` about its centre by `angle` degrees (counter-clockwise on
/// screen) and shift it down by `dy` pixels. Output keeps the input size;
/// sampling is nearest-neighbour.
pub fn rotate_and_shift(image: &RgbaImage, angle: f64, dy: f64) -> RgbaImage {
    if angle.rem_euclid(360.0) == 0.0 && dy == 0.0 {
        return image.clone();
    }

    let (width, height) = image.dimensions();
    let cx = (width as f64 - 1.0) / 2.0;
    let cy = (height as f64 - 1.0) / 2.0;
    let (sin, cos) = angle.to_radians().sin_cos();

    RgbaImage::from_fn(width, height, |x, y| {
        // Inverse mapping: undo the shift, then the rotation
        let u = x as f64 - cx;
        let v = y as f64 - dy - cy;
        let sx = (cos * u - sin * v + cx).round();
        let sy = (sin * u + cos * v + cy).round();

        if sx < 0.0 || sy < 0.0 || sx >= width as f64 || sy >= height as f64 {
            BORDER
        } else {
            *image.get_pixel(sx as u32, sy as u32)
        }
    })
}

/// Quarter turn clockwise (transpose followed by a horizontal flip).
pub fn transpose_flip(image: &RgbaImage) -> RgbaImage {
    imageops::rotate90(image)
}
