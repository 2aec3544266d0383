//! Batch Driver
//!
//! Runs the label pipeline over many images on a fixed pool of worker
//! threads. Each worker owns one engine (behind a [`TimedEngine`]) and one
//! [`PipelineContext`] for its whole lifetime. Per-image problems (unreadable
//! files, engine timeouts) become items in the report; only an unavailable
//! engine aborts the batch.

use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbImage;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::DetectionParameters;
use crate::correction::{AliasTable, Vocabulary};
use crate::error::{KuerzelError, Result};
use crate::pipeline::export::export_debug_images;
use crate::pipeline::{self, PipelineContext, PipelineOptions, PipelineResult, PipelineState};
use crate::vision::{EngineFactory, TimedEngine};

/// Where a job's image comes from
#[derive(Debug, Clone)]
pub enum ImageSource {
    File(PathBuf),
    Memory(Arc<RgbImage>),
}

impl ImageSource {
    fn load(&self) -> Result<RgbImage> {
        match self {
            ImageSource::File(path) => Ok(image::open(path)?.to_rgb8()),
            ImageSource::Memory(image) => Ok(image.as_ref().clone()),
        }
    }
}

/// One image to analyse
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Identifier used in logs, reports and debug file names
    pub id: String,
    pub source: ImageSource,
}

impl BatchJob {
    /// Job for an image file, identified by its file stem
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            id,
            source: ImageSource::File(path),
        }
    }

    pub fn from_image(id: impl Into<String>, image: RgbImage) -> Self {
        Self {
            id: id.into(),
            source: ImageSource::Memory(Arc::new(image)),
        }
    }
}

/// What happened to one image
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// The pipeline ran; the result may still need review
    Analyzed(PipelineResult),
    /// The image could not be opened or decoded
    Unreadable { error: String },
    /// The engine failed and errors were configured to propagate
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    /// Position of the job in the submitted list
    pub index: usize,
    pub id: String,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

impl BatchItem {
    pub fn result(&self) -> Option<&PipelineResult> {
        match &self.outcome {
            BatchOutcome::Analyzed(result) => Some(result),
            _ => None,
        }
    }
}

/// Live counters, readable while the batch runs
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchProgress {
    pub total: usize,
    pub processed: usize,
    /// Read and matched against the vocabulary
    pub matched: usize,
    /// Analyzed but without a vocabulary code
    pub needs_review: usize,
    pub no_box: usize,
    pub no_text: usize,
    pub timeouts: usize,
    pub unreadable: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl BatchProgress {
    fn record(&mut self, outcome: &BatchOutcome) {
        self.processed += 1;
        match outcome {
            BatchOutcome::Analyzed(result) => {
                if result.final_code.is_some() {
                    self.matched += 1;
                } else {
                    self.needs_review += 1;
                }
                match result.state {
                    PipelineState::NoBox => self.no_box += 1,
                    PipelineState::NoText => self.no_text += 1,
                    PipelineState::Done => {}
                }
                if result.engine_error.as_deref() == Some("engine timeout") {
                    self.timeouts += 1;
                }
            }
            BatchOutcome::Unreadable { .. } => self.unreadable += 1,
            BatchOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Cooperative cancellation, checked between images
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub workers: usize,
    /// Time budget per image, shared by every engine call for that image
    pub image_timeout: Duration,
    /// Write annotated images and crops here when set
    pub debug_dir: Option<PathBuf>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            image_timeout: Duration::from_secs(30),
            debug_dir: None,
        }
    }
}

/// Runs the pipeline over a list of images
pub struct BatchRunner {
    factory: EngineFactory,
    params: DetectionParameters,
    vocabulary: Vocabulary,
    aliases: AliasTable,
    options: PipelineOptions,
    settings: BatchSettings,
    progress: Arc<RwLock<BatchProgress>>,
    cancel: CancelToken,
}

impl BatchRunner {
    /// Parameters are clamped and validated here, before any engine starts
    pub fn new(
        factory: EngineFactory,
        params: DetectionParameters,
        vocabulary: Vocabulary,
        aliases: AliasTable,
        options: PipelineOptions,
        settings: BatchSettings,
    ) -> Result<Self> {
        Ok(Self {
            factory,
            params: params.sanitized()?,
            vocabulary,
            aliases,
            options,
            settings,
            progress: Arc::new(RwLock::new(BatchProgress::default())),
            cancel: CancelToken::new(),
        })
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Shared handle for watching progress from another thread
    pub fn progress_handle(&self) -> Arc<RwLock<BatchProgress>> {
        self.progress.clone()
    }

    pub fn progress(&self) -> BatchProgress {
        self.progress.read().clone()
    }

    /// Analyse every job and return the items in input order.
    ///
    /// Fails only when an engine cannot be initialized (before any image is
    /// processed) or becomes unavailable mid-batch. On cancellation the items
    /// processed so far are returned.
    pub fn run(&self, jobs: Vec<BatchJob>) -> Result<Vec<BatchItem>> {
        let total = jobs.len();
        *self.progress.write() = BatchProgress {
            total,
            ..Default::default()
        };
        if total == 0 {
            return Ok(vec![]);
        }

        let worker_count = self.settings.workers.clamp(1, total);
        info!("Starting batch of {} images on {} workers", total, worker_count);

        let (job_tx, job_rx) = unbounded::<(usize, BatchJob)>();
        let (ready_tx, ready_rx) = unbounded::<Result<()>>();
        let (item_tx, item_rx) = unbounded::<BatchItem>();
        let abort = AtomicBool::new(false);

        thread::scope(|scope| -> Result<()> {
            let handles: Vec<_> = (0..worker_count)
                .map(|worker_id| {
                    let jobs = job_rx.clone();
                    let ready = ready_tx.clone();
                    let items = item_tx.clone();
                    let abort = &abort;
                    scope.spawn(move || self.worker(worker_id, jobs, ready, items, abort))
                })
                .collect();
            drop(ready_tx);
            drop(item_tx);

            let mut first_error = None;
            for _ in 0..worker_count {
                match ready_rx.recv() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        first_error.get_or_insert(e);
                    }
                    Err(_) => {
                        first_error.get_or_insert(KuerzelError::EngineUnavailable(
                            "worker exited during initialization".to_string(),
                        ));
                        break;
                    }
                }
            }

            if first_error.is_none() {
                for job in jobs.into_iter().enumerate() {
                    let _ = job_tx.send(job);
                }
            } else {
                abort.store(true, Ordering::SeqCst);
            }
            drop(job_tx);

            for handle in handles {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        first_error.get_or_insert(e);
                    }
                    Err(_) => {
                        first_error.get_or_insert(KuerzelError::Engine("batch worker panicked".to_string()));
                    }
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })?;

        let mut items: Vec<BatchItem> = item_rx.try_iter().collect();
        items.sort_by_key(|item| item.index);

        let mut progress = self.progress.write();
        progress.cancelled = self.cancel.is_cancelled();
        info!(
            "Batch finished: {}/{} processed, {} matched, {} need review{}",
            progress.processed,
            total,
            progress.matched,
            progress.needs_review,
            if progress.cancelled { " (cancelled)" } else { "" }
        );

        Ok(items)
    }

    fn worker(
        &self,
        worker_id: usize,
        jobs: Receiver<(usize, BatchJob)>,
        ready: Sender<Result<()>>,
        items: Sender<BatchItem>,
        abort: &AtomicBool,
    ) -> Result<()> {
        let engine = match TimedEngine::new(self.factory.clone(), self.settings.image_timeout) {
            Ok(engine) => engine,
            Err(e) => {
                error!("Worker {} could not start its engine: {}", worker_id, e);
                let _ = ready.send(Err(e));
                return Ok(());
            }
        };
        let _ = ready.send(Ok(()));
        drop(ready);

        let mut ctx = PipelineContext::new(engine, self.options.clone());
        for (index, job) in jobs.iter() {
            if self.cancel.is_cancelled() || abort.load(Ordering::SeqCst) {
                break;
            }

            match self.process(&mut ctx, index, job) {
                Ok(item) => {
                    self.progress.write().record(&item.outcome);
                    let _ = items.send(item);
                }
                Err(e) => {
                    error!("Worker {} aborting batch: {}", worker_id, e);
                    abort.store(true, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }

        debug!(
            "Worker {} done ({} engine restarts)",
            worker_id,
            ctx.engine().restarts()
        );
        Ok(())
    }

    fn process(&self, ctx: &mut PipelineContext<TimedEngine>, index: usize, job: BatchJob) -> Result<BatchItem> {
        let image = match job.source.load() {
            Ok(image) => image,
            Err(e) => {
                warn!("Image {} is unreadable: {}", job.id, e);
                return Ok(BatchItem {
                    index,
                    id: job.id,
                    outcome: BatchOutcome::Unreadable { error: e.to_string() },
                });
            }
        };

        ctx.engine_mut().arm_deadline();
        let run = pipeline::run_with_crop(
            ctx,
            &job.id,
            &image,
            &self.params,
            &self.vocabulary,
            &self.aliases,
        );
        ctx.engine_mut().disarm_deadline();

        let outcome = match run {
            Ok((result, crop)) => {
                if let Some(dir) = &self.settings.debug_dir {
                    self.export(dir, &job.id, &image, &result, crop.as_ref());
                }
                BatchOutcome::Analyzed(result)
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Image {} failed: {}", job.id, e);
                BatchOutcome::Failed { error: e.to_string() }
            }
        };

        Ok(BatchItem {
            index,
            id: job.id,
            outcome,
        })
    }

    fn export(&self, dir: &Path, id: &str, image: &RgbImage, result: &PipelineResult, crop: Option<&RgbImage>) {
        if let Err(e) = export_debug_images(dir, id, image, result, crop) {
            warn!("Could not export debug images for {}: {}", id, e);
        }
    }
}
