//! voxprep CLI - parallel feature extraction for voice conversion datasets

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use voxprep::config::resolve_worker_count;
use voxprep::models::F0Method;
use voxprep::orchestrator::{read_chunk, summary_line, StdoutReporter};
use voxprep::pipeline::probe_device_count;
use voxprep::{
    discover_wavs, shuffle_files, CancellationToken, DiffusionConfig, Dispatcher, FailurePolicy,
    ModelConfig, Pipeline, ProcessSpawner, RunSettings, Worker, VERSION,
};

const DEFAULT_CONFIG: &str = "configs/config.json";
const DEFAULT_DIFF_CONFIG: &str = "configs/diffusion.yaml";

/// voxprep - extract training features from a voice dataset
#[derive(Parser, Debug)]
#[command(name = "voxprep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use CPU even when GPUs are available
    #[arg(long, global = true)]
    cpu: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract features for every wav file under a dataset directory
    Run {
        /// Dataset directory, searched recursively for *.wav
        #[arg(long, default_value = "dataset/44k")]
        in_dir: PathBuf,

        /// Number of workers (0 = one per available core)
        #[arg(long, default_value_t = 1)]
        num_workers: usize,

        /// Succeed even when some workers fail
        #[arg(long)]
        allow_partial: bool,

        /// Run workers as threads instead of child processes
        #[arg(long)]
        threads: bool,

        /// Cancel the run after this many seconds
        #[arg(long, value_name = "SECS")]
        max_runtime: Option<u64>,

        /// Progress refresh interval
        #[arg(long, default_value_t = 500, value_name = "MS")]
        poll_interval_ms: u64,

        /// Seed for the file shuffle
        #[arg(long)]
        seed: Option<u64>,

        #[command(flatten)]
        extract: ExtractArgs,
    },

    /// Process one chunk read from stdin (spawned by `run`)
    #[command(hide = true)]
    Worker {
        /// Worker rank
        #[arg(long)]
        rank: usize,

        /// CUDA device index; CPU when absent
        #[arg(long)]
        device: Option<usize>,

        #[command(flatten)]
        extract: ExtractArgs,
    },
}

/// Options shared by the parent and its worker processes
#[derive(Args, Debug, Clone)]
struct ExtractArgs {
    /// Also extract loudness, vocoder mel and augmented features
    #[arg(long)]
    use_diff: bool,

    /// Pitch estimator: pm, dio or harvest
    #[arg(long, default_value = "dio")]
    f0_predictor: F0Method,

    /// Skip extraction and only exercise the orchestration
    #[arg(long)]
    fake_processing: bool,

    /// Upper bound of the per-file sleep in fake mode
    #[arg(long, default_value_t = 1000, value_name = "MS")]
    fake_delay_ms: u64,

    /// Model config [default: configs/config.json if present]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Diffusion config [default: configs/diffusion.yaml if present]
    #[arg(long)]
    diff_config: Option<PathBuf>,
}

impl ExtractArgs {
    /// Pin config paths so child processes load exactly what the parent did
    fn resolved(&self) -> Self {
        Self {
            config: resolve_config(self.config.as_deref(), DEFAULT_CONFIG),
            diff_config: resolve_config(self.diff_config.as_deref(), DEFAULT_DIFF_CONFIG),
            ..self.clone()
        }
    }

    fn settings(&self) -> Result<RunSettings> {
        let model = match &self.config {
            Some(path) => ModelConfig::load(path)
                .with_context(|| format!("Failed to load model config {:?}", path))?,
            None => ModelConfig::default(),
        };
        let diffusion = match &self.diff_config {
            Some(path) => DiffusionConfig::load(path)
                .with_context(|| format!("Failed to load diffusion config {:?}", path))?,
            None => DiffusionConfig::default(),
        };

        Ok(RunSettings {
            model,
            diffusion,
            use_diff: self.use_diff,
            f0_method: self.f0_predictor,
            fake_processing: self.fake_processing,
            fake_delay: Duration::from_millis(self.fake_delay_ms),
            ..RunSettings::default()
        })
    }

    /// Arguments that reproduce these options on a `worker` command line
    fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--f0-predictor".into(),
            self.f0_predictor.name().into(),
            "--fake-delay-ms".into(),
            self.fake_delay_ms.to_string().into(),
        ];
        if self.use_diff {
            args.push("--use-diff".into());
        }
        if self.fake_processing {
            args.push("--fake-processing".into());
        }
        if let Some(path) = &self.config {
            args.push("--config".into());
            args.push(path.into());
        }
        if let Some(path) = &self.diff_config {
            args.push("--diff-config".into());
            args.push(path.into());
        }
        args
    }
}

fn resolve_config(explicit: Option<&Path>, default: &str) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => Some(PathBuf::from(default)).filter(|p| p.is_file()),
    }
}

fn setup_logging(verbose: bool, to_stderr: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact();

    // Worker stdout carries progress lines, so its logs go to stderr
    let installed = if to_stderr {
        tracing::subscriber::set_global_default(builder.with_writer(std::io::stderr).finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.context("Failed to set tracing subscriber")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_worker = matches!(cli.command, Commands::Worker { .. });
    setup_logging(cli.verbose, is_worker)?;

    match cli.command {
        Commands::Run {
            in_dir,
            num_workers,
            allow_partial,
            threads,
            max_runtime,
            poll_interval_ms,
            seed,
            extract,
        } => {
            info!("voxprep v{}", VERSION);

            let extract = extract.resolved();
            let mut settings = extract.settings()?;
            settings.device_count = if cli.cpu { 0 } else { probe_device_count() };
            settings.poll_interval = Duration::from_millis(poll_interval_ms);
            settings.failure_policy = if allow_partial {
                FailurePolicy::AllowPartial
            } else {
                FailurePolicy::Strict
            };
            info!(
                "Speech encoder: {}, f0 predictor: {}, diffusion: {}",
                settings.model.model.speech_encoder, settings.f0_method, settings.use_diff
            );

            let mut files = discover_wavs(&in_dir)
                .with_context(|| format!("Failed to scan {:?}", in_dir))?;
            shuffle_files(&mut files, seed);
            let workers = resolve_worker_count(num_workers);
            let policy = settings.failure_policy;

            let mut dispatcher = Dispatcher::new(settings);
            if !threads {
                let mut child_args: Vec<OsString> = Vec::new();
                if cli.verbose {
                    child_args.push("--verbose".into());
                }
                if cli.cpu {
                    child_args.push("--cpu".into());
                }
                child_args.push("worker".into());
                child_args.extend(extract.to_args());
                dispatcher = dispatcher.with_processes(ProcessSpawner::current_exe()?.args(child_args));
            }

            if let Some(secs) = max_runtime {
                let token = dispatcher.cancellation_token();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_secs(secs));
                    warn!("Maximum runtime of {}s reached, cancelling", secs);
                    token.cancel();
                });
            }

            let report = dispatcher
                .dispatch(&files, workers.get())
                .context("Failed to dispatch workers")?;
            info!(
                "Processed {}/{} files: {} artifacts written, {} already present",
                report.progress.total_completed(),
                files.len(),
                report.written(),
                report.cached()
            );
            for failed in report.failures() {
                warn!(
                    "Worker {} stopped after {}/{} files",
                    failed.rank, failed.reported, failed.expected
                );
            }
            report.check(policy).context("Preprocessing incomplete")?;

            Ok(())
        }

        Commands::Worker {
            rank,
            device,
            extract,
        } => {
            let _span = tracing::info_span!("worker", rank).entered();

            let settings = Arc::new(extract.settings()?);
            let chunk = read_chunk(std::io::stdin().lock())
                .context("Failed to read chunk from stdin")?;

            let worker = Worker::new(
                rank,
                device,
                settings.clone(),
                Pipeline::for_settings(&settings),
                CancellationToken::new(),
            );
            let summary = worker
                .run(&chunk, &StdoutReporter)
                .with_context(|| format!("Worker {} failed", rank))?;
            println!("{}", summary_line(&summary));

            Ok(())
        }
    }
}
