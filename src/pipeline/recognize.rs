//! Text recognition on the upscaled label crop
//!
//! The detector is re-run on the whole crop. Recognition strategies are tried
//! in order, each applying its own filters to the crop first; the first
//! strategy that yields any text above the confidence floor wins.

use image::{imageops, Rgb, RgbImage};
use imageproc::definitions::Image;
use imageproc::filter::filter3x3;
use imageproc::map::map_colors;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::vision::{DetectionCandidate, OcrEngine};

/// Optional image enhancements applied to the crop before recognition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropFilters {
    /// Convert to grayscale
    pub grayscale: bool,
    /// Invert colors (light text on dark background)
    pub invert: bool,
    /// Contrast factor, 1.0 = unchanged
    pub contrast: f32,
    /// Sharpening strength, 0.0 = off
    pub sharpen: f32,
}

impl Default for CropFilters {
    fn default() -> Self {
        Self {
            grayscale: false,
            invert: false,
            contrast: 1.0,
            sharpen: 0.0,
        }
    }
}

impl CropFilters {
    pub fn is_identity(&self) -> bool {
        !self.grayscale && !self.invert && (self.contrast - 1.0).abs() <= 0.01 && self.sharpen <= 0.01
    }
}

/// A named way of reading the crop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionStrategy {
    pub name: String,
    #[serde(default)]
    pub filters: CropFilters,
}

impl RecognitionStrategy {
    pub fn new(name: &str, filters: CropFilters) -> Self {
        Self {
            name: name.to_string(),
            filters,
        }
    }

    /// Read the crop as-is
    pub fn upscaled() -> Self {
        Self::new("upscaled", CropFilters::default())
    }
}

/// Strategy list used when none is configured
pub fn default_strategies() -> Vec<RecognitionStrategy> {
    vec![RecognitionStrategy::upscaled()]
}

/// Text read from the crop and the strategy that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    /// Texts above the confidence floor, joined by single spaces in detection order
    pub text: String,
    pub strategy: String,
}

/// Join every text whose (clamped) confidence reaches `confidence_floor`.
/// `None` when no detection qualifies; an empty-but-qualifying text is `Some("")`.
pub fn aggregate_text(detections: &[DetectionCandidate], confidence_floor: f32) -> Option<String> {
    let accepted: Vec<&str> = detections
        .iter()
        .filter(|d| d.clamped_confidence() >= confidence_floor)
        .map(|d| d.text.as_str())
        .collect();

    if accepted.is_empty() {
        None
    } else {
        Some(accepted.join(" "))
    }
}

/// Try each strategy in order until one produces text.
///
/// Returns `Ok(None)` when every strategy came back empty. Engine errors abort
/// the remaining strategies and are handed to the caller.
pub fn recognize<E: OcrEngine + ?Sized>(
    engine: &mut E,
    crop: &RgbImage,
    strategies: &[RecognitionStrategy],
    confidence_floor: f32,
) -> Result<Option<Recognition>> {
    let fallback;
    let strategies = if strategies.is_empty() {
        fallback = default_strategies();
        &fallback[..]
    } else {
        strategies
    };

    for strategy in strategies {
        let detections = if strategy.filters.is_identity() {
            engine.detect(crop)?
        } else {
            engine.detect(&apply_filters(crop, &strategy.filters))?
        };

        if let Some(text) = aggregate_text(&detections, confidence_floor) {
            debug!("Strategy '{}' read '{}'", strategy.name, text);
            return Ok(Some(Recognition {
                text,
                strategy: strategy.name.clone(),
            }));
        }
        debug!(
            "Strategy '{}' produced no text above {:.2} ({} detections)",
            strategy.name,
            confidence_floor,
            detections.len()
        );
    }

    Ok(None)
}

/// Apply the configured filters: contrast, sharpen, grayscale, then invert
pub fn apply_filters(image: &RgbImage, filters: &CropFilters) -> RgbImage {
    let mut result = image.clone();

    if (filters.contrast - 1.0).abs() > 0.01 {
        result = apply_contrast(&result, filters.contrast);
    }

    if filters.sharpen > 0.01 {
        result = apply_sharpen(&result, filters.sharpen);
    }

    if filters.grayscale {
        result = imageops::grayscale_with_type::<Rgb<u8>, _>(&result);
    }

    if filters.invert {
        imageops::invert(&mut result);
    }

    result
}

/// Stretch values around the midpoint; factor > 1.0 increases contrast.
/// `imageops::contrast` takes a percentage whose squared ratio is the factor.
fn apply_contrast(image: &RgbImage, factor: f32) -> RgbImage {
    let percent = (factor.max(0.0).sqrt() - 1.0) * 100.0;
    imageops::contrast(image, percent)
}

/// 3x3 cross sharpening kernel: center 1 + 4s, direct neighbours -s.
/// Borders are padded by continuity.
fn apply_sharpen(image: &RgbImage, strength: f32) -> RgbImage {
    #[rustfmt::skip]
    let kernel = [
        0.0, -strength, 0.0,
        -strength, 1.0 + 4.0 * strength, -strength,
        0.0, -strength, 0.0,
    ];
    let filtered: Image<Rgb<f32>> = filter3x3(image, &kernel);
    map_colors(&filtered, |p| Rgb(p.0.map(|v| v.round().clamp(0.0, 255.0) as u8)))
}
