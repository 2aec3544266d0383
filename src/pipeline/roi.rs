//! Region-of-interest selection

use crate::config::DetectionParameters;
use crate::vision::Rect;

/// Search rectangle for an image of `width` x `height` pixels.
///
/// Never fails: out-of-range or inverted fractions collapse to a rectangle
/// of at least 1x1 inside the image.
pub fn select_roi(width: u32, height: u32, params: &DetectionParameters) -> Rect {
    let (x0, x1) = span(width, params.left_frac, params.right_frac);
    let (y0, y1) = span(height, params.top_frac, params.bottom_frac);
    Rect::new(x0, y0, x1 - x0, y1 - y0)
}

/// Ordered [start, end) along one axis with end > start
fn span(extent: u32, start_frac: f64, end_frac: f64) -> (u32, u32) {
    let extent = extent.max(1);
    let to_px = |frac: f64| {
        let px = (extent as f64 * frac).floor();
        if px.is_nan() {
            0
        } else {
            px.clamp(0.0, extent as f64) as u32
        }
    };

    let (a, b) = (to_px(start_frac), to_px(end_frac));
    let start = a.min(b).min(extent - 1);
    let end = a.max(b).max(start + 1).min(extent);
    (start, end)
}
