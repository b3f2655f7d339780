//! Error types for the preprocessing run

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while discovering, dispatching or extracting features.
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// Decoded audio does not match the configured expectations.
    #[error("{path}: sample rate {actual} Hz does not match configured {expected} Hz")]
    ConfigMismatch {
        /// Source file
        path: PathBuf,
        /// Rate of the decoded samples
        actual: u32,
        /// Configured model rate
        expected: u32,
    },

    /// The compute device a worker was bound to could not be opened.
    #[error("compute device cuda:{index} is unavailable: {reason}")]
    DeviceUnavailable {
        /// CUDA ordinal
        index: usize,
        /// Backend error text
        reason: String,
    },

    /// Reading or writing an artifact or source file failed.
    #[error("{path}: {source}")]
    Io {
        /// File being read or written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The source file could not be decoded as audio.
    #[error("failed to decode {path}: {reason}")]
    Decode {
        /// Source file
        path: PathBuf,
        /// Decoder error text
        reason: String,
    },

    /// The file set or worker count cannot be partitioned.
    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    /// The model config names a content encoder this build does not know.
    #[error("unsupported speech encoder '{0}'")]
    UnsupportedSpeechEncoder(String),

    /// A configuration file could not be loaded.
    #[error("failed to load config {path}: {reason}")]
    Config {
        /// Config file
        path: PathBuf,
        /// Parse or read error text
        reason: String,
    },

    /// A worker terminated without completing its chunk.
    #[error("worker {rank} failed: {reason}")]
    WorkerFailed {
        /// Worker rank
        rank: usize,
        /// Why the chunk was abandoned
        reason: String,
    },

    /// The run was cancelled before the worker finished its chunk.
    #[error("cancelled")]
    Cancelled,

    /// A feature extractor failed.
    #[error(transparent)]
    Extraction(#[from] anyhow::Error),
}

impl PreprocessError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T, E = PreprocessError> = std::result::Result<T, E>;
