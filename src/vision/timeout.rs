//! Per-image time budget around an engine
//!
//! The wrapped engine lives on its own thread and is created there by an
//! [`EngineFactory`]. Calls are forwarded over channels and the caller waits
//! at most until the current deadline. An engine that blows its budget is
//! abandoned (its thread exits once the stuck call returns) and a fresh one is
//! spawned on the next call.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::engine::{DetectionCandidate, EngineFactory, OcrEngine};
use crate::error::{KuerzelError, Result};

struct EngineWorker {
    requests: Sender<RgbImage>,
    responses: Receiver<Result<Vec<DetectionCandidate>>>,
}

/// Engine proxy enforcing a time budget per image
pub struct TimedEngine {
    factory: EngineFactory,
    worker: Option<EngineWorker>,
    name: String,
    budget: Duration,
    deadline: Option<Instant>,
    restarts: usize,
}

impl TimedEngine {
    /// Spawn the engine thread and wait for the engine to initialize.
    /// Initialization failures surface as [`KuerzelError::EngineUnavailable`].
    pub fn new(factory: EngineFactory, budget: Duration) -> Result<Self> {
        let (worker, name) = spawn_worker(&factory)?;
        info!("Engine '{}' ready (budget {:?})", name, budget);
        Ok(Self {
            factory,
            worker: Some(worker),
            name,
            budget,
            deadline: None,
            restarts: 0,
        })
    }

    /// Start the clock for a new image. Every `detect` until the next call
    /// shares the same deadline.
    pub fn arm_deadline(&mut self) {
        self.deadline = Some(Instant::now() + self.budget);
    }

    /// Drop the deadline; each call then gets the full budget
    pub fn disarm_deadline(&mut self) {
        self.deadline = None;
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// How many times the engine was replaced after a timeout or crash
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    fn remaining(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => self.budget,
        }
    }

    fn abandon(&mut self) {
        self.worker = None;
        self.restarts += 1;
    }
}

impl OcrEngine for TimedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectionCandidate>> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Err(KuerzelError::EngineTimeout(self.budget));
        }

        if self.worker.is_none() {
            debug!("Respawning engine after previous failure");
            let (worker, name) = spawn_worker(&self.factory)?;
            self.worker = Some(worker);
            self.name = name;
        }
        let Some(worker) = self.worker.as_ref() else {
            return Err(KuerzelError::EngineUnavailable("engine worker missing".to_string()));
        };

        if worker.requests.send(image.clone()).is_err() {
            self.abandon();
            return Err(KuerzelError::Engine("engine thread terminated".to_string()));
        }

        match worker.responses.recv_timeout(remaining) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Engine '{}' exceeded its budget of {:?}, abandoning it",
                    self.name, self.budget
                );
                self.abandon();
                Err(KuerzelError::EngineTimeout(self.budget))
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Engine '{}' thread terminated unexpectedly", self.name);
                self.abandon();
                Err(KuerzelError::Engine("engine thread terminated".to_string()))
            }
        }
    }
}

fn spawn_worker(factory: &EngineFactory) -> Result<(EngineWorker, String)> {
    let (request_tx, request_rx) = unbounded::<RgbImage>();
    let (response_tx, response_rx) = unbounded();
    let (ready_tx, ready_rx) = bounded::<Result<String>>(1);
    let factory = factory.clone();

    thread::Builder::new()
        .name("ocr-engine".to_string())
        .spawn(move || {
            let mut engine = match factory() {
                Ok(engine) => engine,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(engine.name().to_string()));

            for image in request_rx.iter() {
                if response_tx.send(engine.detect(&image)).is_err() {
                    break;
                }
            }
            debug!("Engine thread '{}' exiting", engine.name());
        })?;

    let name = match ready_rx.recv() {
        Ok(Ok(name)) => name,
        Ok(Err(KuerzelError::EngineUnavailable(msg))) => return Err(KuerzelError::EngineUnavailable(msg)),
        Ok(Err(e)) => return Err(KuerzelError::EngineUnavailable(e.to_string())),
        Err(_) => {
            return Err(KuerzelError::EngineUnavailable(
                "engine thread exited during initialization".to_string(),
            ))
        }
    };

    Ok((
        EngineWorker {
            requests: request_tx,
            responses: response_rx,
        },
        name,
    ))
}
