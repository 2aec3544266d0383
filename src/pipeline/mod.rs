//! Label Reading Pipeline
//!
//! Reads the code printed in the label at the top-right corner of an
//! inspection image. One call to [`run`] walks a fixed state machine:
//!
//! ```text
//! SEARCHING -> NO_BOX                                   (terminal)
//!           -> BOX_FOUND -> NO_TEXT                     (terminal)
//!                        -> RECOGNIZED -> CORRECTED -> DONE
//! ```
//!
//! Every stage is a deterministic function of its inputs. Nothing retries;
//! callers re-run the whole pipeline to re-analyse an image.

pub mod crop;
pub mod export;
pub mod recognize;
pub mod roi;
pub mod selector;

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DetectionParameters;
use crate::correction::{correct_text, AliasTable, CorrectionSettings, Vocabulary};
use crate::error::{KuerzelError, Result};
use crate::vision::{OcrEngine, Rect};

pub use crop::{crop_and_upscale, pad_box};
pub use recognize::{default_strategies, CropFilters, Recognition, RecognitionStrategy};
pub use roi::select_roi;
pub use selector::{select_box, ScoredBox};

/// Terminal state reached by a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// No candidate survived filtering
    NoBox,
    /// A box was found but nothing could be read from it
    NoText,
    /// Text was read and corrected; `final_code` may still be absent
    Done,
}

/// Outcome of reading one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    pub state: PipelineState,
    /// Corrected code, present only when it is a vocabulary member
    pub final_code: Option<String>,
    /// Recognized text before any correction
    pub raw_text: Option<String>,
    /// 1.0 for a vocabulary match, 0.5 for unmatched text, 0.0 otherwise
    pub confidence: f64,
    /// Selected label region in original-image coordinates (after padding)
    #[serde(rename = "box")]
    pub label_box: Option<Rect>,
    /// Region that was searched for candidates
    pub search_rect: Rect,
    /// Human-readable audit trail of corrections, in order
    pub corrections_applied: Vec<String>,
    /// Size of the upscaled crop handed to recognition
    pub crop_size: Option<(u32, u32)>,
    /// Name of the recognition strategy that produced `raw_text`
    pub strategy: Option<String>,
    /// Engine failure absorbed while processing this image
    pub engine_error: Option<String>,
}

impl PipelineResult {
    fn no_box(search_rect: Rect, engine_error: Option<String>) -> Self {
        Self {
            state: PipelineState::NoBox,
            final_code: None,
            raw_text: None,
            confidence: 0.0,
            label_box: None,
            search_rect,
            corrections_applied: vec![],
            crop_size: None,
            strategy: None,
            engine_error,
        }
    }

    fn no_text(search_rect: Rect, label_box: Rect, crop_size: (u32, u32), engine_error: Option<String>) -> Self {
        Self {
            state: PipelineState::NoText,
            label_box: Some(label_box),
            crop_size: Some(crop_size),
            ..Self::no_box(search_rect, engine_error)
        }
    }

    /// Whether the caller should ask a human to confirm or enter the code
    pub fn needs_review(&self) -> bool {
        self.final_code.is_none()
    }
}

/// Settings that stay fixed for the lifetime of a [`PipelineContext`]
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub correction: CorrectionSettings,
    /// Ordered recognition strategies, first success wins
    pub strategies: Vec<RecognitionStrategy>,
    /// Surface engine failures as errors instead of soft results
    pub propagate_engine_errors: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            correction: CorrectionSettings::default(),
            strategies: default_strategies(),
            propagate_engine_errors: false,
        }
    }
}

/// Everything a worker needs to read labels: the engine it owns and the
/// options it was built with. Built once per worker, reused for every image.
pub struct PipelineContext<E> {
    engine: E,
    options: PipelineOptions,
}

impl<E: OcrEngine> PipelineContext<E> {
    pub fn new(engine: E, options: PipelineOptions) -> Self {
        Self { engine, options }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn into_engine(self) -> E {
        self.engine
    }
}

/// Read the label code of one image.
///
/// `params` are clamped into range first; contradictory ones fail with
/// `InvalidParameters`. Otherwise only fatal conditions are returned as errors:
/// `EngineUnavailable` always, other engine failures only when
/// `propagate_engine_errors` is set.
pub fn run<E: OcrEngine>(
    ctx: &mut PipelineContext<E>,
    image_id: &str,
    image: &RgbImage,
    params: &DetectionParameters,
    vocabulary: &Vocabulary,
    aliases: &AliasTable,
) -> Result<PipelineResult> {
    run_with_crop(ctx, image_id, image, params, vocabulary, aliases).map(|(result, _)| result)
}

/// Like [`run`], also returning the upscaled crop when one was produced
pub fn run_with_crop<E: OcrEngine>(
    ctx: &mut PipelineContext<E>,
    image_id: &str,
    image: &RgbImage,
    params: &DetectionParameters,
    vocabulary: &Vocabulary,
    aliases: &AliasTable,
) -> Result<(PipelineResult, Option<RgbImage>)> {
    let params = params.sanitized()?;
    let params = &params;
    let (width, height) = image.dimensions();

    // SEARCHING
    let search_rect = select_roi(width, height, params);
    if width == 0 || height == 0 {
        debug!("Image {} is empty", image_id);
        return Ok((PipelineResult::no_box(search_rect, None), None));
    }

    let roi_image = imageops::crop_imm(
        image,
        search_rect.x,
        search_rect.y,
        search_rect.width,
        search_rect.height,
    )
    .to_image();

    let candidates = match ctx.engine.detect(&roi_image) {
        Ok(candidates) => candidates,
        Err(e) => {
            let message = absorb_engine_error(e, image_id, ctx.options.propagate_engine_errors)?;
            return Ok((PipelineResult::no_box(search_rect, Some(message)), None));
        }
    };
    debug!("Image {}: {} candidates in {:?}", image_id, candidates.len(), search_rect);

    let Some(selected) = select_box(&candidates, search_rect, width, height, params) else {
        info!("Image {}: no label box", image_id);
        return Ok((PipelineResult::no_box(search_rect, None), None));
    };

    // BOX_FOUND
    let label_box = pad_box(selected.bounds, width, height, params);
    let crop = crop_and_upscale(image, label_box, params.upscale_factor);
    let crop_size = crop.dimensions();
    debug!(
        "Image {}: box {:?} padded to {:?}, crop {}x{}",
        image_id, selected.bounds, label_box, crop_size.0, crop_size.1
    );

    let recognition = match recognize::recognize(
        &mut ctx.engine,
        &crop,
        &ctx.options.strategies,
        params.confidence_floor,
    ) {
        Ok(recognition) => recognition,
        Err(e) => {
            let message = absorb_engine_error(e, image_id, ctx.options.propagate_engine_errors)?;
            let result = PipelineResult::no_text(search_rect, label_box, crop_size, Some(message));
            return Ok((result, Some(crop)));
        }
    };

    let Some(recognition) = recognition else {
        info!("Image {}: no text in label box", image_id);
        let result = PipelineResult::no_text(search_rect, label_box, crop_size, None);
        return Ok((result, Some(crop)));
    };

    // RECOGNIZED -> CORRECTED
    let corrected = correct_text(
        &recognition.text,
        &ctx.options.correction,
        vocabulary,
        aliases,
        params.fuzzy_cutoff,
    );

    // DONE
    let final_code = vocabulary
        .contains(&corrected.text)
        .then(|| corrected.text.clone());
    let confidence = if final_code.is_some() { 1.0 } else { 0.5 };

    info!(
        "Image {}: read '{}' -> {:?}",
        image_id, recognition.text, final_code
    );

    let result = PipelineResult {
        state: PipelineState::Done,
        final_code,
        raw_text: Some(recognition.text),
        confidence,
        label_box: Some(label_box),
        search_rect,
        corrections_applied: corrected.corrections,
        crop_size: Some(crop_size),
        strategy: Some(recognition.strategy),
        engine_error: None,
    };
    Ok((result, Some(crop)))
}

/// Turn a recoverable engine failure into a message for the result, or
/// return the error when it is fatal or the caller asked for propagation.
fn absorb_engine_error(error: KuerzelError, image_id: &str, propagate: bool) -> Result<String> {
    if propagate || matches!(error, KuerzelError::EngineUnavailable(_)) {
        return Err(error);
    }
    warn!("Image {}: {}", image_id, error);
    Ok(match error {
        KuerzelError::EngineTimeout(_) => "engine timeout".to_string(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::CharSubstitutionTable;
    use crate::vision::mock::MockEngine;
    use crate::vision::DetectionCandidate;
    use image::Rgb;
    use proptest::prelude::*;

    fn image() -> RgbImage {
        RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]))
    }

    fn vocab() -> Vocabulary {
        ["HSS", "HS5", "HS1", "G-12"].into_iter().collect()
    }

    fn unpadded() -> DetectionParameters {
        DetectionParameters {
            padding_top: 0,
            padding_bottom: 0,
            padding_left: 0,
            padding_right: 0,
            fuzzy_cutoff: 0.7,
            ..Default::default()
        }
    }

    fn label(text: &str, confidence: f32) -> DetectionCandidate {
        DetectionCandidate::from_rect(50.0, 5.0, 80.0, 20.0, text, confidence)
    }

    fn read(text: &str) -> DetectionCandidate {
        DetectionCandidate::from_rect(0.0, 0.0, 150.0, 38.0, text, 0.95)
    }

    fn context(engine: MockEngine) -> PipelineContext<MockEngine> {
        PipelineContext::new(engine, PipelineOptions::default())
    }

    #[test]
    fn test_zero_detections_skip_recognition() {
        let mut ctx = context(MockEngine::new().then(vec![]));
        let result = run(&mut ctx, "img", &image(), &unpadded(), &vocab(), &AliasTable::new()).unwrap();

        assert_eq!(result.state, PipelineState::NoBox);
        assert!(result.label_box.is_none());
        assert!(result.final_code.is_none());
        assert!(result.raw_text.is_none());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(ctx.engine().calls(), 1);
    }

    #[test]
    fn test_search_runs_on_roi_subimage() {
        let mut ctx = context(MockEngine::new());
        let result = run(&mut ctx, "img", &image(), &unpadded(), &vocab(), &AliasTable::new()).unwrap();
        assert_eq!(result.search_rect, Rect::new(0, 0, 115, 96));
        assert_eq!(ctx.engine().seen[0], (115, 96));
    }

    #[test]
    fn test_box_found_crop_upscaled() {
        let mut ctx = context(MockEngine::new().then(vec![label("", 0.9)]).then(vec![read("HS5")]));
        let result = run(&mut ctx, "img", &image(), &unpadded(), &vocab(), &AliasTable::new()).unwrap();

        assert_eq!(result.label_box, Some(Rect::new(50, 5, 80, 20)));
        assert_eq!(result.crop_size, Some((160, 40)));
        assert_eq!(ctx.engine().seen[1], (160, 40));
        assert_eq!(result.final_code.as_deref(), Some("HS5"));
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.state, PipelineState::Done);
        assert_eq!(result.strategy.as_deref(), Some("upscaled"));
    }

    #[test]
    fn test_default_padding_applied_before_crop() {
        let mut ctx = context(MockEngine::new().then(vec![label("", 0.9)]));
        let params = DetectionParameters::default();
        let result = run(&mut ctx, "img", &image(), &params, &vocab(), &AliasTable::new()).unwrap();
        assert_eq!(result.label_box, Some(Rect::new(52, 7, 76, 16)));
        assert_eq!(result.crop_size, Some((152, 32)));
    }

    #[test]
    fn test_no_text_keeps_box() {
        let faint = DetectionCandidate::from_rect(0.0, 0.0, 150.0, 38.0, "HS5", 0.1);
        let mut ctx = context(MockEngine::new().then(vec![label("", 0.9)]).then(vec![faint]));
        let result = run(&mut ctx, "img", &image(), &unpadded(), &vocab(), &AliasTable::new()).unwrap();

        assert_eq!(result.state, PipelineState::NoText);
        assert!(result.label_box.is_some());
        assert!(result.final_code.is_none());
        assert!(result.raw_text.is_none());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_normalization_recorded() {
        let mut ctx = PipelineContext::new(
            MockEngine::new().then(vec![label("", 0.9)]).then(vec![read("HSl")]),
            PipelineOptions {
                correction: CorrectionSettings {
                    substitutions: CharSubstitutionTable::new(vec![('l', '1')]).unwrap(),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let result = run(&mut ctx, "img", &image(), &unpadded(), &vocab(), &AliasTable::new()).unwrap();

        assert_eq!(result.raw_text.as_deref(), Some("HSl"));
        assert_eq!(result.final_code.as_deref(), Some("HS1"));
        assert_eq!(result.corrections_applied, vec!["'l' -> '1' (1x)"]);
    }

    #[test]
    fn test_alias_resolution() {
        let aliases: AliasTable = [("hss", "HSS")].into_iter().collect();
        let mut ctx = context(MockEngine::new().then(vec![label("", 0.9)]).then(vec![read("hss")]));
        let result = run(&mut ctx, "img", &image(), &unpadded(), &vocab(), &aliases).unwrap();
        assert_eq!(result.final_code.as_deref(), Some("HSS"));
    }

    #[test]
    fn test_fuzzy_resolution() {
        let mut ctx = context(MockEngine::new().then(vec![label("", 0.9)]).then(vec![read("HS5X")]));
        let result = run(&mut ctx, "img", &image(), &unpadded(), &vocab(), &AliasTable::new()).unwrap();
        assert_eq!(result.final_code.as_deref(), Some("HS5"));
        assert_eq!(result.raw_text.as_deref(), Some("HS5X"));
    }

    #[test]
    fn test_unmatched_text_retained_for_review() {
        let mut ctx = PipelineContext::new(
            MockEngine::new().then(vec![label("", 0.9)]).then(vec![read("ZZZZ")]),
            PipelineOptions {
                correction: CorrectionSettings {
                    substitutions: CharSubstitutionTable::empty(),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let result = run(&mut ctx, "img", &image(), &unpadded(), &vocab(), &AliasTable::new()).unwrap();

        assert_eq!(result.state, PipelineState::Done);
        assert!(result.final_code.is_none());
        assert_eq!(result.raw_text.as_deref(), Some("ZZZZ"));
        assert_eq!(result.confidence, 0.5);
        assert!(result.needs_review());
    }

    #[test]
    fn test_engine_failure_absorbed() {
        let mut ctx = context(MockEngine::new().then(vec![label("", 0.9)]).then_timeout());
        let result = run(&mut ctx, "img", &image(), &unpadded(), &vocab(), &AliasTable::new()).unwrap();
        assert_eq!(result.state, PipelineState::NoText);
        assert_eq!(result.engine_error.as_deref(), Some("engine timeout"));

        let mut ctx = context(MockEngine::new().then_fail("driver crash"));
        let result = run(&mut ctx, "img", &image(), &unpadded(), &vocab(), &AliasTable::new()).unwrap();
        assert_eq!(result.state, PipelineState::NoBox);
        assert!(result.engine_error.unwrap().contains("driver crash"));
    }

    #[test]
    fn test_engine_failure_propagated_when_configured() {
        let mut ctx = PipelineContext::new(
            MockEngine::new().then_fail("driver crash"),
            PipelineOptions {
                propagate_engine_errors: true,
                ..Default::default()
            },
        );
        let err = run(&mut ctx, "img", &image(), &unpadded(), &vocab(), &AliasTable::new()).unwrap_err();
        assert!(matches!(err, KuerzelError::Engine(_)));
    }

    #[test]
    fn test_repeated_runs_identical() {
        let script = || {
            MockEngine::new()
                .then(vec![label("", 0.9), DetectionCandidate::from_rect(10.0, 40.0, 60.0, 15.0, "", 0.8)])
                .then(vec![read("HSl"), read("Z")])
        };
        let aliases: AliasTable = [("hs1 2", "HS1")].into_iter().collect();

        let mut first = context(script());
        let mut second = context(script());
        let a = run(&mut first, "img", &image(), &unpadded(), &vocab(), &aliases).unwrap();
        let b = run(&mut second, "img", &image(), &unpadded(), &vocab(), &aliases).unwrap();

        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
        assert_eq!(a.final_code.as_deref(), Some("HS1"));
    }

    #[test]
    fn test_final_code_always_in_vocabulary() {
        let substitution = (prop::char::range('a', 'z'), prop::char::range('0', '9'));
        proptest!(ProptestConfig::with_cases(64), |(
            text in "[A-Za-z0-9 \\-]{0,12}",
            codes in prop::collection::vec("[A-Z0-9\\-]{1,5}", 0..6),
            alias_pairs in prop::collection::vec(("[a-z0-9 \\-]{1,6}", "[A-Z0-9]{1,5}"), 0..4),
            pairs in prop::collection::vec(substitution, 0..4)
        )| {
            let vocabulary: Vocabulary = codes.iter().collect();
            let aliases: AliasTable = alias_pairs.into_iter().collect();
            let options = PipelineOptions {
                correction: CorrectionSettings {
                    substitutions: CharSubstitutionTable::new(pairs).unwrap_or_else(|_| CharSubstitutionTable::empty()),
                    ..Default::default()
                },
                ..Default::default()
            };
            let script = || MockEngine::new().then(vec![label("", 0.9)]).then(vec![read(&text)]);

            let mut first = PipelineContext::new(script(), options.clone());
            let mut second = PipelineContext::new(script(), options.clone());
            let a = run(&mut first, "img", &image(), &unpadded(), &vocabulary, &aliases).unwrap();
            let b = run(&mut second, "img", &image(), &unpadded(), &vocabulary, &aliases).unwrap();

            prop_assert_eq!(&a, &b);
            prop_assert!(a.final_code.as_ref().map_or(true, |code| vocabulary.contains(code)));
            if a.final_code.is_some() {
                prop_assert!(a.label_box.is_some());
                prop_assert_eq!(a.confidence, 1.0);
            }
        });
    }

    #[test]
    fn test_upscale_factor_clamped_before_crop() {
        let mut ctx = context(MockEngine::new().then(vec![label("", 0.9)]));
        let params = DetectionParameters {
            upscale_factor: 1e6,
            ..unpadded()
        };
        let result = run(&mut ctx, "img", &image(), &params, &vocab(), &AliasTable::new()).unwrap();
        // 80x20 box at the 8x ceiling
        assert_eq!(result.crop_size, Some((640, 160)));
    }

    #[test]
    fn test_contradictory_params_rejected() {
        let mut ctx = context(MockEngine::new());
        let params = DetectionParameters {
            min_aspect: 7.0,
            max_aspect: 2.0,
            ..Default::default()
        };
        let err = run(&mut ctx, "img", &image(), &params, &vocab(), &AliasTable::new()).unwrap_err();
        assert!(matches!(err, KuerzelError::InvalidParameters(_)));
        assert_eq!(ctx.engine().calls(), 0);
    }

    #[test]
    fn test_empty_image() {
        let mut ctx = context(MockEngine::new());
        let empty = RgbImage::new(0, 0);
        let result = run(&mut ctx, "img", &empty, &unpadded(), &vocab(), &AliasTable::new()).unwrap();
        assert_eq!(result.state, PipelineState::NoBox);
        assert_eq!(ctx.engine().calls(), 0);
    }
}
