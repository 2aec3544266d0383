//! Scripted engine for tests

use image::RgbImage;
use std::collections::VecDeque;
use std::time::Duration;

use super::engine::{DetectionCandidate, OcrEngine};
use crate::error::{KuerzelError, Result};

/// Engine that replays scripted responses in call order and records what it saw.
/// Once the script runs out every call returns no detections.
#[derive(Debug, Default)]
pub struct MockEngine {
    script: VecDeque<Result<Vec<DetectionCandidate>>>,
    /// Dimensions of every image passed to `detect`
    pub seen: Vec<(u32, u32)>,
    /// Optional artificial latency per call
    pub delay: Option<Duration>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, detections: Vec<DetectionCandidate>) -> Self {
        self.script.push_back(Ok(detections));
        self
    }

    pub fn then_fail(mut self, message: &str) -> Self {
        self.script.push_back(Err(KuerzelError::Engine(message.to_string())));
        self
    }

    pub fn then_timeout(mut self) -> Self {
        self.script
            .push_back(Err(KuerzelError::EngineTimeout(Duration::from_millis(1))));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.seen.len()
    }
}

impl OcrEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectionCandidate>> {
        self.seen.push(image.dimensions());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.script.pop_front().unwrap_or_else(|| Ok(vec![]))
    }
}
