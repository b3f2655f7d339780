//! Audio processing modules
//!
//! - Audio file loading and decoding (WAV)
//! - Sample rate conversion (16kHz for content encoders, vocoder rate for mels)
//! - Magnitude STFT (linear spectrogram)
//! - Mel spectrogram computation, optionally key-shifted

mod loader;
mod resampler;
mod stft;
mod mel;

pub use loader::AudioLoader;
pub use resampler::{Resampler, CONTENT_SAMPLE_RATE};
pub use stft::Stft;
pub use mel::MelSpectrogram;

pub(crate) use stft::reflect_pad;
