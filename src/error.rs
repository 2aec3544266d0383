//! Error taxonomy for the label reader
//!
//! Expected outcomes such as "no label box found" or "no text recognized" are
//! not errors; they are terminal states of a [`crate::pipeline::PipelineResult`].

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the pipeline, the engines and the configuration layer
#[derive(Debug, Error)]
pub enum KuerzelError {
    /// The OCR engine could not be initialized. Fatal for a whole batch.
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Contradictory or malformed parameters, rejected at load time
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// A single engine call exceeded its time budget
    #[error("engine timeout after {0:?}")]
    EngineTimeout(Duration),

    /// Any other failure reported by the engine while processing an image
    #[error("engine failure: {0}")]
    Engine(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl KuerzelError {
    /// Whether the error must abort a batch instead of being absorbed per image
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KuerzelError::EngineUnavailable(_) | KuerzelError::InvalidParameters(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, KuerzelError>;
