//! Box padding, cropping and upscaling

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::config::DetectionParameters;
use crate::vision::Rect;

/// Grow (or, with negative paddings, shrink) `bounds` per side, clamped to
/// the image. The result is always at least 1x1 and inside the image.
pub fn pad_box(bounds: Rect, image_width: u32, image_height: u32, params: &DetectionParameters) -> Rect {
    let (x, width) = pad_axis(
        bounds.x,
        bounds.width,
        image_width,
        params.padding_left,
        params.padding_right,
    );
    let (y, height) = pad_axis(
        bounds.y,
        bounds.height,
        image_height,
        params.padding_top,
        params.padding_bottom,
    );
    Rect::new(x, y, width, height)
}

fn pad_axis(start: u32, length: u32, extent: u32, pad_before: i32, pad_after: i32) -> (u32, u32) {
    let extent = extent.max(1) as i64;
    let new_start = (start as i64 - pad_before as i64).clamp(0, extent - 1);
    let new_length = (length as i64 + pad_before as i64 + pad_after as i64)
        .min(extent - new_start)
        .max(1);
    (new_start as u32, new_length as u32)
}

/// Size of the crop after upscaling, never below 1x1
pub fn upscaled_size(width: u32, height: u32, factor: f64) -> (u32, u32) {
    let scale = |v: u32| ((v as f64 * factor).round() as u32).max(1);
    (scale(width), scale(height))
}

/// Cut `rect` out of the full-resolution image and enlarge it by `factor`
/// with Catmull-Rom (cubic) resampling so small glyphs survive recognition.
pub fn crop_and_upscale(image: &RgbImage, rect: Rect, factor: f64) -> RgbImage {
    let crop = imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image();
    let (new_w, new_h) = upscaled_size(crop.width(), crop.height(), factor);
    imageops::resize(&crop, new_w, new_h, FilterType::CatmullRom)
}
