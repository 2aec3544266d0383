//! Candidate filtering and scoring
//!
//! Labels are burned into the top-right corner, so among the boxes that pass
//! the area and aspect filters the scorer favours confident boxes close to the
//! top edge that reach the right margin.

use tracing::debug;

use crate::config::DetectionParameters;
use crate::vision::{DetectionCandidate, Rect};

/// Weight of the vertical position in the distance penalty
const TOP_WEIGHT: f64 = 0.6;
/// Weight of "box does not reach the right edge" in the distance penalty
const RIGHT_EDGE_WEIGHT: f64 = 0.4;
const CONFIDENCE_SCALE: f64 = 100.0;
const PENALTY_SCALE: f64 = 50.0;

/// A candidate that survived filtering, in full-image coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredBox {
    /// Position of the candidate in the detector output
    pub index: usize,
    pub bounds: Rect,
    pub text: String,
    pub confidence: f32,
    pub area_frac: f64,
    pub aspect: f64,
    pub score: f64,
}

/// Why a candidate was dropped
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// No part of the box lies inside the image
    OutsideImage,
    Area(f64),
    Aspect(f64),
}

/// Filter and score one candidate detected inside `roi`
pub fn score_candidate(
    index: usize,
    candidate: &DetectionCandidate,
    roi: Rect,
    image_width: u32,
    image_height: u32,
    params: &DetectionParameters,
) -> Result<ScoredBox, Rejection> {
    let bounds = candidate
        .bounds()
        .translate(roi.x, roi.y)
        .intersect(&Rect::new(0, 0, image_width, image_height))
        .ok_or(Rejection::OutsideImage)?;
    let image_w = image_width.max(1) as f64;
    let image_h = image_height.max(1) as f64;

    let area_frac = bounds.area() as f64 / (image_w * image_h);
    if area_frac < params.min_area_frac || area_frac > params.max_area_frac {
        return Err(Rejection::Area(area_frac));
    }

    let aspect = bounds.width as f64 / bounds.height.max(1) as f64;
    if aspect < params.min_aspect || aspect > params.max_aspect {
        return Err(Rejection::Aspect(aspect));
    }

    let off_right_edge = if bounds.right() < image_width { 1.0 } else { 0.0 };
    let dist_penalty = (bounds.y as f64 / image_h) * TOP_WEIGHT + off_right_edge * RIGHT_EDGE_WEIGHT;
    let confidence = candidate.clamped_confidence();
    let score = confidence as f64 * CONFIDENCE_SCALE - PENALTY_SCALE * dist_penalty;

    Ok(ScoredBox {
        index,
        bounds,
        text: candidate.text.clone(),
        confidence,
        area_frac,
        aspect,
        score,
    })
}

/// Pick the highest-scoring candidate. Equal scores keep the first seen.
pub fn select_box(
    candidates: &[DetectionCandidate],
    roi: Rect,
    image_width: u32,
    image_height: u32,
    params: &DetectionParameters,
) -> Option<ScoredBox> {
    let mut best: Option<ScoredBox> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        match score_candidate(index, candidate, roi, image_width, image_height, params) {
            Ok(scored) => {
                debug!(
                    "Candidate #{} {:?} '{}' score {:.2}",
                    index, scored.bounds, scored.text, scored.score
                );
                if best.as_ref().map_or(true, |b| scored.score > b.score) {
                    best = Some(scored);
                }
            }
            Err(reason) => {
                debug!("Candidate #{} rejected: {:?}", index, reason);
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roi_origin() -> Rect {
        Rect::new(0, 0, 640, 480)
    }

    #[test]
    fn test_example_box_accepted() {
        let params = DetectionParameters::default();
        let c = DetectionCandidate::from_rect(50.0, 5.0, 80.0, 20.0, "HS5", 0.9);
        let scored = score_candidate(0, &c, roi_origin(), 640, 480, &params).unwrap();

        assert!((scored.area_frac - 1600.0 / 307_200.0).abs() < 1e-12);
        assert!((scored.aspect - 4.0).abs() < 1e-12);
        // 0.9·100 − 50·(5/480·0.6 + 0.4)
        let expected = 90.0 - 50.0 * (5.0 / 480.0 * 0.6 + 0.4);
        assert!((scored.score - expected).abs() < 1e-4);
    }

    #[test]
    fn test_translation_by_roi_origin() {
        let params = DetectionParameters {
            max_area_frac: 1.0,
            ..Default::default()
        };
        let c = DetectionCandidate::from_rect(10.0, 4.0, 40.0, 10.0, "", 0.5);
        let scored = score_candidate(0, &c, Rect::new(100, 20, 200, 100), 640, 480, &params).unwrap();
        assert_eq!(scored.bounds, Rect::new(110, 24, 40, 10));
    }

    #[test]
    fn test_area_bounds_inclusive() {
        // 100x100 image, 20x5 box => area_frac 0.01
        let c = DetectionCandidate::from_rect(0.0, 0.0, 20.0, 5.0, "", 0.5);
        let roi = Rect::new(0, 0, 100, 100);
        let at_bounds = DetectionParameters {
            min_area_frac: 0.01,
            max_area_frac: 0.01,
            min_aspect: 1.0,
            max_aspect: 10.0,
            ..Default::default()
        };
        assert!(score_candidate(0, &c, roi, 100, 100, &at_bounds).is_ok());

        // one pixel column less / more falls outside
        let smaller = DetectionCandidate::from_rect(0.0, 0.0, 19.0, 5.0, "", 0.5);
        let larger = DetectionCandidate::from_rect(0.0, 0.0, 21.0, 5.0, "", 0.5);
        assert!(matches!(
            score_candidate(0, &smaller, roi, 100, 100, &at_bounds),
            Err(Rejection::Area(_))
        ));
        assert!(matches!(
            score_candidate(0, &larger, roi, 100, 100, &at_bounds),
            Err(Rejection::Area(_))
        ));
    }

    #[test]
    fn test_aspect_filter() {
        let params = DetectionParameters::default();
        let tall = DetectionCandidate::from_rect(0.0, 0.0, 10.0, 20.0, "", 0.9);
        let flat = DetectionCandidate::from_rect(0.0, 0.0, 140.0, 20.0, "", 0.9);
        assert!(matches!(
            score_candidate(0, &tall, roi_origin(), 640, 480, &params),
            Err(Rejection::Aspect(_))
        ));
        assert!(matches!(
            score_candidate(0, &flat, roi_origin(), 640, 480, &params),
            Err(Rejection::Aspect(_))
        ));
    }

    #[test]
    fn test_prefers_box_touching_right_edge() {
        let params = DetectionParameters {
            max_area_frac: 1.0,
            ..Default::default()
        };
        let inner = DetectionCandidate::from_rect(10.0, 0.0, 40.0, 10.0, "A", 0.9);
        let edge = DetectionCandidate::from_rect(60.0, 0.0, 40.0, 10.0, "B", 0.9);
        let roi = Rect::new(0, 0, 100, 100);
        let best = select_box(&[inner, edge], roi, 100, 100, &params).unwrap();
        assert_eq!(best.text, "B");
        assert_eq!(best.index, 1);
    }

    #[test]
    fn test_prefers_higher_box() {
        let params = DetectionParameters {
            max_area_frac: 1.0,
            ..Default::default()
        };
        let low = DetectionCandidate::from_rect(0.0, 50.0, 40.0, 10.0, "low", 0.9);
        let high = DetectionCandidate::from_rect(0.0, 5.0, 40.0, 10.0, "high", 0.9);
        let roi = Rect::new(0, 0, 100, 100);
        let best = select_box(&[low, high], roi, 100, 100, &params).unwrap();
        assert_eq!(best.text, "high");
    }

    #[test]
    fn test_tie_keeps_first_seen() {
        let params = DetectionParameters::default();
        let a = DetectionCandidate::from_rect(10.0, 5.0, 40.0, 10.0, "first", 0.8);
        let b = DetectionCandidate::from_rect(20.0, 5.0, 40.0, 10.0, "second", 0.8);
        let best = select_box(&[a, b], roi_origin(), 640, 480, &params).unwrap();
        assert_eq!(best.text, "first");
    }

    #[test]
    fn test_out_of_range_confidence_clamped() {
        let params = DetectionParameters::default();
        let wild = DetectionCandidate::from_rect(10.0, 5.0, 40.0, 10.0, "wild", 7.5);
        let sane = DetectionCandidate::from_rect(10.0, 5.0, 40.0, 10.0, "sane", 1.0);
        let best = select_box(&[sane, wild], roi_origin(), 640, 480, &params).unwrap();
        // both clamp to 1.0, so the first one wins the tie
        assert_eq!(best.text, "sane");
        assert_eq!(best.confidence, 1.0);
    }

    #[test]
    fn test_box_outside_image_rejected() {
        let params = DetectionParameters::default();
        let real = DetectionCandidate::from_rect(50.0, 5.0, 80.0, 20.0, "real", 0.9);
        let ghost = DetectionCandidate::from_rect(700.0, 5.0, 80.0, 20.0, "ghost", 0.9);
        assert_eq!(
            score_candidate(1, &ghost, roi_origin(), 640, 480, &params),
            Err(Rejection::OutsideImage)
        );

        let best = select_box(&[real, ghost], Rect::new(0, 0, 115, 96), 640, 480, &params).unwrap();
        assert_eq!(best.text, "real");
        assert_eq!(best.bounds, Rect::new(50, 5, 80, 20));
    }

    #[test]
    fn test_huge_coordinates_do_not_overflow() {
        let params = DetectionParameters::default();
        let far = DetectionCandidate::from_rect(4_294_967_040.0, 0.0, 256.0, 64.0, "X", 0.9);
        assert!(select_box(&[far], Rect::new(0, 0, 115, 96), 640, 480, &params).is_none());

        let shifted = DetectionCandidate::from_rect(4_294_967_040.0, 0.0, 256.0, 64.0, "X", 0.9);
        let roi = Rect::new(525, 0, 115, 96);
        assert_eq!(
            score_candidate(0, &shifted, roi, 640, 480, &params),
            Err(Rejection::OutsideImage)
        );
    }

    #[test]
    fn test_box_overhanging_image_is_clipped() {
        let params = DetectionParameters {
            max_area_frac: 1.0,
            ..Default::default()
        };
        let overhang = DetectionCandidate::from_rect(70.0, 0.0, 60.0, 10.0, "edge", 0.9);
        let scored = score_candidate(0, &overhang, Rect::new(0, 0, 100, 100), 100, 100, &params).unwrap();
        assert_eq!(scored.bounds, Rect::new(70, 0, 30, 10));
        assert_eq!(scored.bounds.right(), 100);
    }

    #[test]
    fn test_no_survivors() {
        let params = DetectionParameters::default();
        assert!(select_box(&[], roi_origin(), 640, 480, &params).is_none());
        let tall = DetectionCandidate::from_rect(0.0, 0.0, 5.0, 50.0, "", 0.9);
        assert!(select_box(&[tall], roi_origin(), 640, 480, &params).is_none());
    }
}
