//! PaddleOCR engine on ONNX Runtime
//!
//! Two networks: a DBNet text detector producing a per-pixel text
//! probability map, and a CRNN recognizer decoded with greedy CTC against a
//! character dictionary.

use image::imageops;
use image::{GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::Array4;
use ort::value::Tensor;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::engine::{DetectionCandidate, EngineFactory, OcrEngine};
use super::models::{ModelManager, ModelType, OnnxSession};
use super::preprocess::{resize_for_detection, resize_for_recognition, to_nchw, PreprocessConfig};
use super::Rect;
use crate::error::{KuerzelError, Result};

/// PaddleOCR engine settings
#[derive(Debug, Clone)]
pub struct PaddleConfig {
    /// Model directory; the per-user data directory when `None`
    pub model_dir: Option<PathBuf>,
    /// Try GPU execution providers before CPU
    pub use_gpu: bool,
    /// Probability above which a pixel counts as text
    pub det_thresh: f32,
    /// Minimum mean probability of a text region
    pub box_thresh: f32,
    /// How far regions are grown, relative to area / perimeter
    pub unclip_ratio: f32,
    /// Regions with a shorter side (in map pixels) are dropped
    pub min_box_size: u32,
    pub preprocess: PreprocessConfig,
}

impl Default for PaddleConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            use_gpu: false,
            det_thresh: 0.3,
            box_thresh: 0.6,
            unclip_ratio: 1.5,
            min_box_size: 3,
            preprocess: PreprocessConfig::default(),
        }
    }
}

pub struct PaddleEngine {
    det: OnnxSession,
    rec: OnnxSession,
    dictionary: Vec<String>,
    config: PaddleConfig,
}

impl PaddleEngine {
    /// Load (downloading if needed) the models. Any failure is reported as
    /// [`KuerzelError::EngineUnavailable`].
    pub fn new(config: PaddleConfig) -> Result<Self> {
        Self::load(config).map_err(|e| KuerzelError::EngineUnavailable(format!("{e:#}")))
    }

    fn load(config: PaddleConfig) -> anyhow::Result<Self> {
        let manager = match &config.model_dir {
            Some(dir) => ModelManager::with_dir(dir.clone())?,
            None => ModelManager::new()?,
        };

        let det_path = manager.ensure_model(ModelType::Detection)?;
        let rec_path = manager.ensure_model(ModelType::Recognition)?;
        let dict_path = manager.ensure_model(ModelType::Dictionary)?;

        let open = |path: &Path| {
            if config.use_gpu {
                OnnxSession::new_with_gpu(path)
            } else {
                OnnxSession::new(path)
            }
        };
        let det = open(&det_path)?;
        let rec = open(&rec_path)?;
        let dictionary = load_dictionary(&dict_path)?;
        info!("PaddleOCR engine loaded ({} dictionary entries)", dictionary.len());

        Ok(Self {
            det,
            rec,
            dictionary,
            config,
        })
    }

    /// Factory building one engine per calling thread
    pub fn factory(config: PaddleConfig) -> EngineFactory {
        Arc::new(move || -> Result<Box<dyn OcrEngine>> { Ok(Box::new(PaddleEngine::new(config.clone())?)) })
    }

    /// Text regions in image coordinates with their detection score
    fn detect_regions(&mut self, image: &RgbImage) -> Result<Vec<(Rect, f32)>> {
        let pre = &self.config.preprocess;
        let (resized, rx, ry) = resize_for_detection(image, pre.det_max_side);
        let (dims, prob) = run_single(&mut self.det, to_nchw(&resized, &pre.mean, &pre.std))?;

        // [1, 1, H, W]
        let &[.., map_h, map_w] = dims.as_slice() else {
            return Err(KuerzelError::Engine(format!("unexpected detection output shape {dims:?}")));
        };
        let regions = boxes_from_probability_map(&prob, map_w as u32, map_h as u32, &self.config);

        let (img_w, img_h) = image.dimensions();
        let mut mapped: Vec<(Rect, f32)> = regions
            .into_iter()
            .filter_map(|(r, score)| {
                let x0 = ((r.x as f32 / rx).floor() as u32).min(img_w - 1);
                let y0 = ((r.y as f32 / ry).floor() as u32).min(img_h - 1);
                let x1 = ((r.right() as f32 / rx).ceil() as u32).min(img_w);
                let y1 = ((r.bottom() as f32 / ry).ceil() as u32).min(img_h);
                (x1 > x0 && y1 > y0).then(|| (Rect::new(x0, y0, x1 - x0, y1 - y0), score))
            })
            .collect();
        mapped.sort_by_key(|(r, _)| (r.y, r.x));
        Ok(mapped)
    }

    fn recognize_line(&mut self, line: &RgbImage) -> Result<(String, f32)> {
        let pre = &self.config.preprocess;
        let resized = resize_for_recognition(line, pre.rec_target_height, pre.rec_max_width);
        let (dims, probs) = run_single(&mut self.rec, to_nchw(&resized, &pre.mean, &pre.std))?;

        // [1, T, C]
        let &[_, steps, classes] = dims.as_slice() else {
            return Err(KuerzelError::Engine(format!("unexpected recognition output shape {dims:?}")));
        };
        Ok(ctc_greedy_decode(&probs, steps, classes, &self.dictionary))
    }
}

impl OcrEngine for PaddleEngine {
    fn name(&self) -> &str {
        "paddle"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectionCandidate>> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(vec![]);
        }

        let regions = self.detect_regions(image)?;
        let mut candidates = Vec::with_capacity(regions.len());
        for (rect, det_score) in regions {
            let line = imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image();
            let (text, confidence) = self.recognize_line(&line)?;
            debug!(
                "Region {:?} (det {:.2}) read '{}' ({:.2})",
                rect, det_score, text, confidence
            );
            candidates.push(DetectionCandidate::from_rect(
                rect.x as f32,
                rect.y as f32,
                rect.width as f32,
                rect.height as f32,
                text,
                confidence,
            ));
        }
        Ok(candidates)
    }
}

fn ort_error(e: ort::Error) -> KuerzelError {
    KuerzelError::Engine(e.to_string())
}

/// Run a single-input, single-output model and copy out the first output
fn run_single(session: &mut OnnxSession, input: Array4<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
    let output_name = session
        .output_names()
        .first()
        .cloned()
        .ok_or_else(|| KuerzelError::Engine("model declares no outputs".to_string()))?;

    let tensor = Tensor::from_array(input).map_err(ort_error)?;
    let outputs = session
        .session_mut()
        .run(ort::inputs![tensor])
        .map_err(ort_error)?;
    let value = outputs
        .get(output_name.as_str())
        .ok_or_else(|| KuerzelError::Engine(format!("missing output '{output_name}'")))?;
    let (shape, data) = value.try_extract_tensor::<f32>().map_err(ort_error)?;

    let dims = shape.as_ref().iter().map(|&d| d.max(0) as usize).collect();
    Ok((dims, data.to_vec()))
}

#[derive(Debug)]
struct Region {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    sum: f32,
    count: u32,
}

/// Threshold the probability map, label connected text pixels and turn each
/// component into an expanded box. Boxes are in map coordinates.
pub fn boxes_from_probability_map(prob: &[f32], width: u32, height: u32, config: &PaddleConfig) -> Vec<(Rect, f32)> {
    if width == 0 || height == 0 || prob.len() < (width as usize * height as usize) {
        return vec![];
    }
    let at = |x: u32, y: u32| prob[(y * width + x) as usize];

    let mask = GrayImage::from_fn(width, height, |x, y| {
        if at(x, y) > config.det_thresh {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

    let mut regions: BTreeMap<u32, Region> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0];
        if label == 0 {
            continue;
        }
        let region = regions.entry(label).or_insert(Region {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            sum: 0.0,
            count: 0,
        });
        region.min_x = region.min_x.min(x);
        region.min_y = region.min_y.min(y);
        region.max_x = region.max_x.max(x);
        region.max_y = region.max_y.max(y);
        region.sum += at(x, y);
        region.count += 1;
    }

    regions
        .into_values()
        .filter_map(|r| {
            let w = r.max_x - r.min_x + 1;
            let h = r.max_y - r.min_y + 1;
            if w.min(h) < config.min_box_size {
                return None;
            }
            let score = r.sum / r.count as f32;
            if score < config.box_thresh {
                return None;
            }

            let distance = (w * h) as f32 * config.unclip_ratio / (2 * (w + h)) as f32;
            let x0 = (r.min_x as f32 - distance).floor().max(0.0) as u32;
            let y0 = (r.min_y as f32 - distance).floor().max(0.0) as u32;
            let x1 = ((r.max_x + 1) as f32 + distance).ceil().min(width as f32) as u32;
            let y1 = ((r.max_y + 1) as f32 + distance).ceil().min(height as f32) as u32;
            Some((Rect::new(x0, y0, x1 - x0, y1 - y0), score))
        })
        .collect()
}

/// Greedy CTC decoding: best class per step, collapse repeats, drop blanks
/// (class 0). Class `i` maps to `dictionary[i - 1]`. Confidence is the mean
/// probability of the emitted characters, 0 for an empty read.
pub fn ctc_greedy_decode(probs: &[f32], steps: usize, classes: usize, dictionary: &[String]) -> (String, f32) {
    let mut text = String::new();
    let mut scores = Vec::new();
    let mut previous = 0usize;

    for row in probs.chunks_exact(classes.max(1)).take(steps) {
        let (best, p) = row
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |acc, (i, p)| if p > acc.1 { (i, p) } else { acc });

        if best != 0 && best != previous {
            if let Some(ch) = dictionary.get(best - 1) {
                text.push_str(ch);
                scores.push(p);
            }
        }
        previous = best;
    }

    let confidence = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f32>() / scores.len() as f32
    };
    (text, confidence)
}

/// One character per line; a trailing space class is appended as PaddleOCR does
pub fn load_dictionary(path: &Path) -> std::io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    let mut dictionary: Vec<String> = content
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
        .collect();
    dictionary.push(" ".to_string());
    Ok(dictionary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn map_with_block(width: u32, height: u32, block: Rect, value: f32) -> Vec<f32> {
        let mut prob = vec![0.0; (width * height) as usize];
        for y in block.y..block.bottom() {
            for x in block.x..block.right() {
                prob[(y * width + x) as usize] = value;
            }
        }
        prob
    }

    #[test]
    fn test_single_region_is_unclipped() {
        let prob = map_with_block(20, 10, Rect::new(4, 2, 6, 4), 0.9);
        let boxes = boxes_from_probability_map(&prob, 20, 10, &PaddleConfig::default());

        // distance = 24 * 1.5 / 20 = 1.8
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].0, Rect::new(2, 0, 10, 8));
        assert!((boxes[0].1 - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_small_and_faint_regions_dropped() {
        let mut prob = map_with_block(30, 10, Rect::new(1, 1, 2, 2), 0.9);
        for (i, p) in map_with_block(30, 10, Rect::new(10, 2, 8, 5), 0.4).into_iter().enumerate() {
            prob[i] += p;
        }
        assert!(boxes_from_probability_map(&prob, 30, 10, &PaddleConfig::default()).is_empty());
    }

    #[test]
    fn test_short_map_yields_nothing() {
        assert!(boxes_from_probability_map(&[0.9; 4], 20, 10, &PaddleConfig::default()).is_empty());
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        let dictionary: Vec<String> = ["H", "S", "5"].iter().map(|s| s.to_string()).collect();
        // classes: blank, H, S, 5
        let probs = vec![
            0.1, 0.8, 0.05, 0.05, // H
            0.1, 0.7, 0.1, 0.1, // H (repeat)
            0.9, 0.05, 0.03, 0.02, // blank
            0.1, 0.1, 0.6, 0.2, // S
            0.0, 0.0, 0.0, 1.0, // 5
        ];
        let (text, confidence) = ctc_greedy_decode(&probs, 5, 4, &dictionary);
        assert_eq!(text, "HS5");
        assert!((confidence - (0.8 + 0.6 + 1.0) / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_ctc_all_blank() {
        let (text, confidence) = ctc_greedy_decode(&[1.0, 0.0, 1.0, 0.0], 2, 2, &["A".to_string()]);
        assert_eq!(text, "");
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn test_load_dictionary_appends_space() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "A\r\nB\n\n5\n").unwrap();
        let dictionary = load_dictionary(file.path()).unwrap();
        assert_eq!(dictionary, vec!["A", "B", "5", " "]);
    }
}
