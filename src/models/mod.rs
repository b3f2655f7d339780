//! Feature extractors used by the pipeline steps
//!
//! - Content encoder (speech units at 16 kHz)
//! - F0 predictors (pm, dio, harvest)
//! - Frame-wise loudness
//! - Vocoder-rate mel extractor

/// Content units
pub mod content;
/// F0 estimation
pub mod pitch;
/// RMS loudness
pub mod volume;
/// Vocoder mel
pub mod vocoder;

// Re-exports
pub use content::{load_content_encoder, ContentEncoder, SpectralContentEncoder, SpeechEncoder};
pub use pitch::{f0_predictor, F0Method, F0Predictor};
pub use volume::VolumeExtractor;
pub use vocoder::MelExtractor;
