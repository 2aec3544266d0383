//! kuerzel-reader
//!
//! Reads the short label code ("Kürzel") burned into the top-right corner of
//! endoscopic gearbox inspection images, and reconciles the OCR output with a
//! closed vocabulary of valid codes.
//!
//! The OCR engine is injected through [`vision::OcrEngine`]; the pipeline in
//! [`pipeline`] is pure apart from the engine calls.

pub mod batch;
pub mod config;
pub mod correction;
pub mod error;
pub mod pipeline;
pub mod storage;
pub mod vision;

pub use error::{KuerzelError, Result};
