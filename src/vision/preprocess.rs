//! Image preprocessing for OCR models
//!
//! Resizing and tensor conversion for the PaddleOCR detection and
//! recognition networks.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

/// Preprocessing configuration
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Longest side of the detection input (rounded to a multiple of 32)
    pub det_max_side: u32,
    /// Fixed input height of the recognition model
    pub rec_target_height: u32,
    /// Maximum width of a recognition input
    pub rec_max_width: u32,
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            det_max_side: 960,
            rec_target_height: 48,
            rec_max_width: 640,
            // (pixel / 255 - 0.5) / 0.5 maps [0, 255] onto [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

/// Normalized NCHW tensor (batch size 1) from an RGB image
pub fn to_nchw(image: &RgbImage, mean: &[f32; 3], std: &[f32; 3]) -> Array4<f32> {
    let (w, h) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel.0[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (value - mean[c]) / std[c];
        }
    }

    tensor
}

fn round_to_32(v: f32) -> u32 {
    (((v / 32.0).round() as u32) * 32).max(32)
}

/// Resize so the longest side fits `max_side` and both sides are multiples of
/// 32 (a DBNet requirement). Returns the resized image and the x/y ratios
/// (resized / original) needed to map boxes back.
pub fn resize_for_detection(image: &RgbImage, max_side: u32) -> (RgbImage, f32, f32) {
    let (w, h) = image.dimensions();
    let longest = w.max(h).max(1) as f32;
    let scale = (max_side as f32 / longest).min(1.0);

    let new_w = round_to_32(w as f32 * scale);
    let new_h = round_to_32(h as f32 * scale);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    (resized, new_w as f32 / w.max(1) as f32, new_h as f32 / h.max(1) as f32)
}

/// Resize a text line to the fixed recognition height, keeping the aspect
/// ratio and capping the width
pub fn resize_for_recognition(image: &RgbImage, target_height: u32, max_width: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let scale = target_height as f32 / h.max(1) as f32;
    let new_w = ((w as f32 * scale).ceil() as u32).clamp(1, max_width.max(1));
    imageops::resize(image, new_w, target_height, FilterType::Triangle)
}
