//! Vision/OCR Layer
//!
//! The text detector the pipeline consumes, seen only through the
//! [`OcrEngine`] trait. Backends:
//! - PaddleOCR via ONNX Runtime ([`PaddleEngine`])
//! - any engine wrapped in a per-image time budget ([`TimedEngine`])

pub mod engine;
pub mod models;
pub mod paddle;
pub mod preprocess;
pub mod timeout;

#[cfg(test)]
pub(crate) mod mock;

use serde::{Deserialize, Serialize};

pub use engine::{DetectionCandidate, EngineFactory, OcrEngine, Quad};
pub use models::{ModelManager, ModelType, OnnxSession};
pub use paddle::{PaddleConfig, PaddleEngine};
pub use timeout::TimedEngine;

/// Axis-aligned pixel rectangle (x, y, width, height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Exclusive right edge
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Shift the rectangle by an origin (ROI-local to full-image coordinates)
    pub fn translate(&self, dx: u32, dy: u32) -> Self {
        Self::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.width,
            self.height,
        )
    }

    /// Overlap with `other`, `None` when they share no pixel
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right > x && bottom > y).then(|| Rect::new(x, y, right - x, bottom - y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_edges_and_area() {
        let r = Rect::new(50, 5, 80, 20);
        assert_eq!(r.right(), 130);
        assert_eq!(r.bottom(), 25);
        assert_eq!(r.area(), 1600);
        assert_eq!(r.translate(10, 2), Rect::new(60, 7, 80, 20));
    }

    #[test]
    fn test_edges_saturate_near_u32_max() {
        let r = Rect::new(u32::MAX - 10, u32::MAX - 5, 256, 64);
        assert_eq!(r.right(), u32::MAX);
        assert_eq!(r.bottom(), u32::MAX);
        assert_eq!(r.translate(100, 100).x, u32::MAX);
    }

    #[test]
    fn test_intersect() {
        let image = Rect::new(0, 0, 640, 480);
        assert_eq!(
            Rect::new(600, 470, 80, 20).intersect(&image),
            Some(Rect::new(600, 470, 40, 10))
        );
        assert_eq!(Rect::new(700, 5, 80, 20).intersect(&image), None);
        // touching edges share no pixel
        assert_eq!(Rect::new(640, 0, 10, 10).intersect(&image), None);
        assert_eq!(Rect::new(10, 10, 0, 5).intersect(&image), None);
    }
}
