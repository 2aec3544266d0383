//! Detector boundary
//!
//! The pipeline never talks to a concrete OCR backend. It hands an RGB buffer
//! to an [`OcrEngine`] and gets back raw [`DetectionCandidate`]s in the
//! coordinate system of that buffer.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::Rect;
use crate::error::Result;

/// Four corner points of a detection, in pixels of the searched buffer
pub type Quad = [(f32, f32); 4];

/// A single raw detection returned by an engine. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionCandidate {
    /// Corner points (order as reported by the engine)
    pub quad: Quad,
    /// Recognized text, may be empty
    pub text: String,
    /// Engine confidence, nominally 0.0 - 1.0
    pub confidence: f32,
}

impl DetectionCandidate {
    pub fn new(quad: Quad, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            quad,
            text: text.into(),
            confidence,
        }
    }

    /// Candidate covering an axis-aligned rectangle
    pub fn from_rect(x: f32, y: f32, width: f32, height: f32, text: impl Into<String>, confidence: f32) -> Self {
        Self::new(
            [(x, y), (x + width, y), (x + width, y + height), (x, y + height)],
            text,
            confidence,
        )
    }

    /// Confidence forced into [0, 1]; NaN counts as 0
    pub fn clamped_confidence(&self) -> f32 {
        if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        }
    }

    /// Axis-aligned bounding box of the quad. Negative coordinates saturate to 0.
    pub fn bounds(&self) -> Rect {
        let min_x = self.quad.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
        let min_y = self.quad.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
        let max_x = self.quad.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
        let max_y = self.quad.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);

        let x = min_x.max(0.0);
        let y = min_y.max(0.0);
        Rect::new(
            x as u32,
            y as u32,
            (max_x - x).max(0.0).round() as u32,
            (max_y - y).max(0.0).round() as u32,
        )
    }
}

/// Text detector + recognizer used by the pipeline
///
/// Implementations may hold heavy, non thread-safe model state; the pipeline
/// only ever calls them from the thread that owns them.
pub trait OcrEngine {
    /// Short backend name for logs
    fn name(&self) -> &str {
        "ocr"
    }

    /// Detect and read all text regions in `image`.
    ///
    /// Results are ordered but not ranked; an empty vector is a valid answer.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectionCandidate>>;
}

impl<E: OcrEngine + ?Sized> OcrEngine for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectionCandidate>> {
        (**self).detect(image)
    }
}

/// Builds a fresh engine instance. Called once per worker (and again after a
/// timeout abandons an engine), always on the thread that will own the engine.
pub type EngineFactory = Arc<dyn Fn() -> Result<Box<dyn OcrEngine>> + Send + Sync>;
