//! Label detection parameters
//!
//! Loaded once per session, read-only while a pipeline runs.

use serde::{Deserialize, Serialize};

use crate::error::{KuerzelError, Result};

/// Parameters controlling ROI search, box filtering, cropping and matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParameters {
    /// ROI top edge as a fraction of image height
    pub top_frac: f64,
    /// ROI bottom edge as a fraction of image height
    pub bottom_frac: f64,
    /// ROI left edge as a fraction of image width
    pub left_frac: f64,
    /// ROI right edge as a fraction of image width
    pub right_frac: f64,
    /// Smallest accepted box area, as a fraction of the image area
    pub min_area_frac: f64,
    /// Largest accepted box area, as a fraction of the image area
    pub max_area_frac: f64,
    /// Smallest accepted width/height ratio
    pub min_aspect: f64,
    /// Largest accepted width/height ratio
    pub max_aspect: f64,
    /// Pixels added above the box (negative shrinks)
    pub padding_top: i32,
    pub padding_bottom: i32,
    pub padding_left: i32,
    pub padding_right: i32,
    /// Resize factor applied to the crop before recognition
    pub upscale_factor: f64,
    /// Minimum confidence for a recognized text to count
    pub confidence_floor: f32,
    /// Minimum similarity ratio for a fuzzy vocabulary match
    pub fuzzy_cutoff: f64,
}

impl Default for DetectionParameters {
    fn default() -> Self {
        Self {
            top_frac: 0.0,
            bottom_frac: 0.20,
            left_frac: 0.0,
            right_frac: 0.18,
            min_area_frac: 0.0,
            max_area_frac: 0.12,
            min_aspect: 1.4,
            max_aspect: 6.5,
            padding_top: -2,
            padding_bottom: -2,
            padding_left: -2,
            padding_right: -2,
            upscale_factor: 2.0,
            confidence_floor: 0.3,
            fuzzy_cutoff: 0.65,
        }
    }
}

const MAX_PADDING: i32 = 4096;
const MAX_UPSCALE: f64 = 8.0;

impl DetectionParameters {
    /// Copy with every value forced into its domain range.
    ///
    /// Only ranges are enforced here; relations between fields are checked by
    /// [`DetectionParameters::validate`] and never repaired. NaN passes through
    /// untouched so that validation can reject it.
    pub fn clamped(&self) -> Self {
        let frac = |v: f64| v.clamp(0.0, 1.0);
        Self {
            top_frac: frac(self.top_frac),
            bottom_frac: frac(self.bottom_frac),
            left_frac: frac(self.left_frac),
            right_frac: frac(self.right_frac),
            min_area_frac: frac(self.min_area_frac),
            max_area_frac: frac(self.max_area_frac),
            min_aspect: self.min_aspect.clamp(0.0, f64::MAX),
            max_aspect: self.max_aspect.clamp(0.0, f64::MAX),
            padding_top: self.padding_top.clamp(-MAX_PADDING, MAX_PADDING),
            padding_bottom: self.padding_bottom.clamp(-MAX_PADDING, MAX_PADDING),
            padding_left: self.padding_left.clamp(-MAX_PADDING, MAX_PADDING),
            padding_right: self.padding_right.clamp(-MAX_PADDING, MAX_PADDING),
            upscale_factor: self.upscale_factor.clamp(1.0, MAX_UPSCALE),
            confidence_floor: self.confidence_floor.clamp(0.0, 1.0),
            fuzzy_cutoff: self.fuzzy_cutoff.clamp(0.01, 1.0),
        }
    }

    /// Reject contradictory settings with a message naming the offending fields
    pub fn validate(&self) -> Result<()> {
        let floats = [
            ("top_frac", self.top_frac),
            ("bottom_frac", self.bottom_frac),
            ("left_frac", self.left_frac),
            ("right_frac", self.right_frac),
            ("min_area_frac", self.min_area_frac),
            ("max_area_frac", self.max_area_frac),
            ("min_aspect", self.min_aspect),
            ("max_aspect", self.max_aspect),
            ("upscale_factor", self.upscale_factor),
            ("confidence_floor", self.confidence_floor as f64),
            ("fuzzy_cutoff", self.fuzzy_cutoff),
        ];
        if let Some((name, _)) = floats.iter().find(|(_, v)| !v.is_finite()) {
            return Err(KuerzelError::InvalidParameters(format!(
                "{name} must be a finite number"
            )));
        }

        let ordered = [
            ("min_area_frac", self.min_area_frac, "max_area_frac", self.max_area_frac),
            ("min_aspect", self.min_aspect, "max_aspect", self.max_aspect),
            ("top_frac", self.top_frac, "bottom_frac", self.bottom_frac),
            ("left_frac", self.left_frac, "right_frac", self.right_frac),
        ];
        for (lo_name, lo, hi_name, hi) in ordered {
            if lo > hi {
                return Err(KuerzelError::InvalidParameters(format!(
                    "{lo_name} ({lo}) is greater than {hi_name} ({hi})"
                )));
            }
        }

        Ok(())
    }

    /// Clamp, then validate. The form every loader should use.
    pub fn sanitized(&self) -> Result<Self> {
        let params = self.clamped();
        params.validate()?;
        Ok(params)
    }
}
