//! Letterbox preprocessing and its inverse.
//!
//! The detector input is a fixed `S×S` square. Images are scaled to fit,
//! centred on a zero canvas, and the mapping is recorded in a
//! [`TransformInfo`] so decoded coordinates can be taken back to the
//! original image.

use crate::detector::DetectorError;
use crate::types::Normalization;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

/// Mapping between original-image pixels and the letterboxed square input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformInfo {
    pub original_width: u32,
    pub original_height: u32,
    /// `input_size / max(original_width, original_height)`.
    pub scale: f32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub resized_width: u32,
    pub resized_height: u32,
}

impl TransformInfo {
    /// Compute the letterbox mapping for an image of the given size.
    pub fn compute(width: u32, height: u32, input_size: u32) -> Result<Self, DetectorError> {
        if width == 0 || height == 0 {
            return Err(DetectorError::EmptyImage { width, height });
        }

        let scale = input_size as f32 / width.max(height) as f32;
        let resized_width = ((width as f32 * scale).round() as u32).clamp(1, input_size);
        let resized_height = ((height as f32 * scale).round() as u32).clamp(1, input_size);

        Ok(Self {
            original_width: width,
            original_height: height,
            scale,
            x_offset: (input_size - resized_width) / 2,
            y_offset: (input_size - resized_height) / 2,
            resized_width,
            resized_height,
        })
    }

    /// Map a point from letterboxed square space back to original-image space.
    ///
    /// Padding is removed and the point clamped to the resized region before
    /// dividing by the scale; the result is clamped again to the image bounds.
    pub fn remap(&self, x: f32, y: f32) -> (f32, f32) {
        let x = (x - self.x_offset as f32).clamp(0.0, self.resized_width as f32);
        let y = (y - self.y_offset as f32).clamp(0.0, self.resized_height as f32);

        let x = (x / self.scale).clamp(0.0, self.original_width as f32);
        let y = (y / self.scale).clamp(0.0, self.original_height as f32);

        (x, y)
    }
}

/// Letterbox an RGB image into a normalized `[1, 3, S, S]` tensor.
///
/// Resizes with bilinear filtering, centres the result on a zero canvas and
/// applies `norm` to every channel value, padding included.
pub fn letterbox(
    image: &RgbImage,
    input_size: u32,
    norm: Normalization,
) -> Result<(Array4<f32>, TransformInfo), DetectorError> {
    let info = TransformInfo::compute(image.width(), image.height(), input_size)?;

    let resized = if info.resized_width == image.width() && info.resized_height == image.height() {
        image.clone()
    } else {
        imageops::resize(image, info.resized_width, info.resized_height, FilterType::Triangle)
    };

    let side = input_size as usize;
    let pad = norm.apply(0);
    let mut tensor = Array4::<f32>::from_elem((1, 3, side, side), pad);

    let x0 = info.x_offset as usize;
    let y0 = info.y_offset as usize;
    for (x, y, pixel) in resized.enumerate_pixels() {
        let cx = x0 + x as usize;
        let cy = y0 + y as usize;
        for c in 0..3 {
            tensor[[0, c, cy, cx]] = norm.apply(pixel[c]);
        }
    }

    Ok((tensor, info))
}
