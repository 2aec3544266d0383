//! Debug image export for callers
//!
//! The pipeline itself never writes files. Callers that want to inspect a run
//! hand the result (and the crop from [`super::run_with_crop`]) to
//! [`export_debug_images`].

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::PipelineResult;
use crate::error::Result;
use crate::vision::Rect;

const SEARCH_COLOR: Rgb<u8> = Rgb([0, 160, 255]);
const BOX_COLOR: Rgb<u8> = Rgb([255, 40, 40]);

/// Copy of `image` with the search rectangle and selected box outlined
pub fn annotate(image: &RgbImage, result: &PipelineResult) -> RgbImage {
    let mut annotated = image.clone();
    outline(&mut annotated, result.search_rect, SEARCH_COLOR);
    if let Some(label_box) = result.label_box {
        outline(&mut annotated, label_box, BOX_COLOR);
    }
    annotated
}

fn outline(image: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    if rect.width == 0 || rect.height == 0 {
        return;
    }
    let r = imageproc::rect::Rect::at(rect.x as i32, rect.y as i32).of_size(rect.width, rect.height);
    draw_hollow_rect_mut(image, r, color);
}

/// Write `<stem>_boxes.png` and, if present, `<stem>_crop.png` into `dir`.
/// Returns the written paths.
pub fn export_debug_images(
    dir: &Path,
    stem: &str,
    image: &RgbImage,
    result: &PipelineResult,
    crop: Option<&RgbImage>,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    let boxes_path = dir.join(format!("{stem}_boxes.png"));
    annotate(image, result).save(&boxes_path)?;
    written.push(boxes_path);

    if let Some(crop) = crop {
        let crop_path = dir.join(format!("{stem}_crop.png"));
        crop.save(&crop_path)?;
        written.push(crop_path);
    }

    debug!("Exported debug images for {}: {:?}", stem, written);
    Ok(written)
}
