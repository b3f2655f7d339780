//! # voxprep
//!
//! Parallel feature extraction for voice conversion training datasets.
//!
//! A dataset directory of `*.wav` files is split into one contiguous chunk per
//! worker. Each worker binds one compute device and extracts the per-file
//! features a voice conversion model trains on: content units, pitch,
//! linear spectrogram, and, for the shallow diffusion pipeline, loudness,
//! vocoder mel, and augmented mel/loudness. Every feature is written next to
//! its source file and skipped when already present, so an interrupted run
//! resumes where it stopped.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voxprep::{discover_wavs, Dispatcher, RunSettings};
//!
//! let files = discover_wavs("dataset/44k".as_ref())?;
//! let report = Dispatcher::new(RunSettings::default()).dispatch(&files, 4)?;
//! report.check(Default::default())?;
//! ```

#![warn(missing_docs)]
#![allow(rustdoc::missing_crate_level_docs)]

/// Decoding, resampling and spectral transforms
pub mod audio;
/// Artifact payload encodings
pub mod codec;
/// Model, diffusion and run configuration
pub mod config;
/// Dataset file discovery
pub mod discovery;
/// Error types
pub mod error;
/// Feature extractors
pub mod models;
/// Partitioning, workers and progress
pub mod orchestrator;
/// Artifact cache and extraction steps
pub mod pipeline;

// Re-exports for convenience
pub use config::{DiffusionConfig, FailurePolicy, ModelConfig, RunSettings};
pub use discovery::{discover_wavs, shuffle_files};
pub use error::{PreprocessError, Result};
pub use orchestrator::{
    CancellationToken, DispatchReport, Dispatcher, ProcessSpawner, ProgressAggregator, Worker,
    WorkerSummary,
};
pub use pipeline::{ArtifactCache, ArtifactKind, ExtractionStep, Pipeline};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
