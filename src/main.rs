//! kuerzel-reader - label code reader for gearbox inspection images
//!
//! Runs the label pipeline over a set of images and prints one result per
//! image. Logs go to stderr, results to stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use kuerzel_reader::batch::{BatchItem, BatchJob, BatchOutcome, BatchRunner};
use kuerzel_reader::config::{self, AppConfig};
use kuerzel_reader::vision::{ModelManager, PaddleEngine};

/// Reads label codes from endoscopic gearbox inspection images
#[derive(Parser, Debug)]
#[command(name = "kuerzel-reader", version)]
#[command(about = "Reads and corrects label codes in gearbox inspection images")]
struct Args {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read the label code of each image
    Analyze {
        /// Image files
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Configuration file (defaults to the per-user config)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Worker threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Time budget per image in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Write annotated images and label crops here
        #[arg(long)]
        debug_dir: Option<PathBuf>,

        /// One JSON object per line instead of tab-separated text
        #[arg(long)]
        json: bool,
    },

    /// Download and verify the OCR models
    Models {
        /// Model directory (defaults to the per-user data directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration
    Init {
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show {
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Analyze {
            images,
            config,
            workers,
            timeout_secs,
            debug_dir,
            json,
        } => {
            let mut app_config = load_or_default(config.as_deref())?;
            if let Some(workers) = workers {
                app_config.batch.workers = workers;
            }
            if let Some(timeout_secs) = timeout_secs {
                app_config.batch.image_timeout_secs = timeout_secs;
            }
            analyze(app_config.validated()?, images, debug_dir, json)
        }
        Command::Models { dir } => download_models(dir),
        Command::Config { action } => match action {
            ConfigAction::Init { path, force } => init_config(path, force),
            ConfigAction::Show { path } => {
                let app_config = load_or_default(path.as_deref())?;
                print!("{}", toml::to_string_pretty(&app_config)?);
                Ok(())
            }
        },
    }
}

/// Load the given file, else the per-user config if it exists, else defaults
fn load_or_default(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        return config::load_config(path).with_context(|| format!("Failed to load {}", path.display()));
    }

    let default_path = config::default_config_path()?;
    if default_path.exists() {
        info!("Loading configuration from {:?}", default_path);
        return config::load_config(&default_path)
            .with_context(|| format!("Failed to load {}", default_path.display()));
    }

    info!("Using default configuration");
    Ok(AppConfig::default())
}

fn model_manager(dir: Option<PathBuf>) -> Result<ModelManager> {
    match dir {
        Some(dir) => ModelManager::with_dir(dir),
        None => ModelManager::new(),
    }
}

fn analyze(app_config: AppConfig, images: Vec<PathBuf>, debug_dir: Option<PathBuf>, json: bool) -> Result<()> {
    let vocabulary = app_config.vocabulary();
    if vocabulary.is_empty() {
        warn!("No valid codes configured; every result will need review");
    }

    // Fetch models once up front rather than racing downloads in every worker
    let manager = model_manager(app_config.engine.model_dir.clone())?;
    if let Err(e) = manager.ensure_all_models(|_, _, _| {}) {
        warn!("Could not prepare models: {:#}", e);
    }

    let runner = BatchRunner::new(
        PaddleEngine::factory(app_config.paddle_config()),
        app_config.detection.clone(),
        vocabulary,
        app_config.aliases(),
        app_config.pipeline_options(),
        app_config.batch_settings(debug_dir),
    )?;

    let jobs = images.into_iter().map(BatchJob::from_path).collect();
    let items = runner.run(jobs).context("Batch aborted")?;

    for item in &items {
        if json {
            println!("{}", serde_json::to_string(item)?);
        } else {
            println!("{}", format_line(item));
        }
    }

    let progress = runner.progress();
    info!(
        "{} images: {} matched, {} need review, {} unreadable, {} timeouts",
        progress.total, progress.matched, progress.needs_review, progress.unreadable, progress.timeouts
    );
    Ok(())
}

/// `id  code  state  raw text  confidence`, tab separated
fn format_line(item: &BatchItem) -> String {
    match &item.outcome {
        BatchOutcome::Analyzed(result) => format!(
            "{}\t{}\t{:?}\t{}\t{:.1}",
            item.id,
            result.final_code.as_deref().unwrap_or("-"),
            result.state,
            result.raw_text.as_deref().unwrap_or(""),
            result.confidence
        ),
        BatchOutcome::Unreadable { error } => format!("{}\t-\tUnreadable\t{}\t0.0", item.id, error),
        BatchOutcome::Failed { error } => format!("{}\t-\tFailed\t{}\t0.0", item.id, error),
    }
}

fn download_models(dir: Option<PathBuf>) -> Result<()> {
    let manager = model_manager(dir)?;
    info!("Models directory: {:?}", manager.models_dir());

    manager.ensure_all_models(|model, downloaded, total| {
        if let Some(total) = total.filter(|&t| t > 0) {
            if downloaded == total {
                info!("{:?}: {} bytes", model, total);
            }
        }
    })?;

    for status in manager.model_status() {
        println!(
            "{:<12} {:<5} {:>10} {}",
            format!("{:?}", status.model_type),
            if status.available { "ok" } else { "bad" },
            status.size_bytes.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            status.path.display()
        );
    }
    Ok(())
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config::save_config(&AppConfig::default(), &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
