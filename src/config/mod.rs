//! Application Configuration
//!
//! Settings stored in TOML format. Every section falls back to its defaults,
//! so a config file only needs the values it changes.

pub mod detection;

pub use detection::DetectionParameters;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batch::BatchSettings;
use crate::correction::{AliasTable, CharSubstitutionTable, CorrectionSettings, Vocabulary};
use crate::error::{KuerzelError, Result};
use crate::pipeline::{default_strategies, PipelineOptions, RecognitionStrategy};
use crate::vision::PaddleConfig;

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Search area, box filters, padding and thresholds
    pub detection: DetectionParameters,
    /// Correction stages
    pub correction: CorrectionSettings,
    /// Valid codes and known misspellings
    pub codes: CodesConfig,
    /// OCR engine settings
    pub engine: EngineConfig,
    /// Batch worker pool
    pub batch: BatchConfig,
    /// Recognition strategies
    pub recognition: RecognitionConfig,
}

/// The closed vocabulary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodesConfig {
    /// Valid codes, in tie-break order
    pub valid: Vec<String>,
    /// Misspelling -> canonical code
    pub aliases: AliasTable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Model directory override
    pub model_dir: Option<PathBuf>,
    /// Try GPU execution first
    pub use_gpu: bool,
    /// Pixel probability threshold of the text detector
    pub det_thresh: f32,
    /// Minimum mean probability of a detected text region
    pub box_thresh: f32,
    /// Report engine failures as errors instead of soft results
    pub propagate_errors: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            use_gpu: false,
            det_thresh: 0.3,
            box_thresh: 0.6,
            propagate_errors: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker threads, each with its own engine
    pub workers: usize,
    /// Time budget per image in seconds
    pub image_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            image_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Tried in order; the first one that yields text wins
    pub strategies: Vec<RecognitionStrategy>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            strategies: default_strategies(),
        }
    }
}

impl AppConfig {
    /// Clamp values into range and reject contradictory ones
    pub fn validated(mut self) -> Result<Self> {
        self.detection = self.detection.sanitized()?;

        if self.batch.workers == 0 {
            return Err(KuerzelError::InvalidParameters("batch.workers must be at least 1".to_string()));
        }
        if self.batch.image_timeout_secs == 0 {
            return Err(KuerzelError::InvalidParameters(
                "batch.image_timeout_secs must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("engine.det_thresh", self.engine.det_thresh),
            ("engine.box_thresh", self.engine.box_thresh),
        ] {
            if !value.is_finite() {
                return Err(KuerzelError::InvalidParameters(format!("{name} is not a finite number")));
            }
        }
        self.engine.det_thresh = self.engine.det_thresh.clamp(0.0, 1.0);
        self.engine.box_thresh = self.engine.box_thresh.clamp(0.0, 1.0);

        Ok(self)
    }

    pub fn vocabulary(&self) -> Vocabulary {
        self.codes.valid.iter().collect()
    }

    pub fn aliases(&self) -> AliasTable {
        self.codes.aliases.clone()
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            correction: self.correction.clone(),
            strategies: self.recognition.strategies.clone(),
            propagate_engine_errors: self.engine.propagate_errors,
        }
    }

    pub fn paddle_config(&self) -> PaddleConfig {
        PaddleConfig {
            model_dir: self.engine.model_dir.clone(),
            use_gpu: self.engine.use_gpu,
            det_thresh: self.engine.det_thresh,
            box_thresh: self.engine.box_thresh,
            ..Default::default()
        }
    }

    pub fn batch_settings(&self, debug_dir: Option<PathBuf>) -> BatchSettings {
        BatchSettings {
            workers: self.batch.workers,
            image_timeout: Duration::from_secs(self.batch.image_timeout_secs),
            debug_dir,
        }
    }
}

/// Load and validate configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| KuerzelError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let parse_error = |e: toml::de::Error| KuerzelError::Config(format!("cannot parse {}: {}", path.display(), e));
    let document = toml::Value::Table(toml::from_str(&content).map_err(parse_error)?);

    // A bad substitution table is a parameter error, not a syntax error
    if let Some(pairs) = document.get("correction").and_then(|c| c.get("substitutions")) {
        let pairs: Vec<(String, String)> = pairs.clone().try_into().map_err(parse_error)?;
        CharSubstitutionTable::try_from(pairs)?;
    }

    let config: AppConfig = document.try_into().map_err(parse_error)?;
    config.validated()
}

/// Save configuration to file, creating parent directories
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| KuerzelError::Config(format!("cannot serialize configuration: {e}")))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
        .map_err(|e| KuerzelError::Config(format!("cannot write {}: {}", path.display(), e)))
}

/// `<config_dir>/config.toml`
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join("config.toml"))
}
