//! Content (speech unit) encoders
//!
//! Content encoders turn 16 kHz audio into a `(1, dim, frames)` unit tensor.
//! The encoder name comes from `model.speech_encoder` in the model config and
//! fixes the unit width. [`SpectralContentEncoder`] is the built-in encoder: a
//! standardized log-mel front end followed by a fixed projection to the unit
//! width, computed on the worker's device.

use anyhow::Result;
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::str::FromStr;

use crate::audio::{MelSpectrogram, CONTENT_SAMPLE_RATE};
use crate::error::PreprocessError;

/// Mel bands of the spectral front end
const N_MELS: usize = 80;
/// 20 ms hop at 16 kHz, the usual unit rate of speech encoders
const HOP_LENGTH: usize = 320;

/// Known content encoder names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum SpeechEncoder {
    Vec256L9,
    Vec768L12,
    HubertSoft,
    DpHubert,
    WavLmBasePlus,
    CnHubertLarge,
    WhisperPpg,
}

impl SpeechEncoder {
    /// Config name of the encoder
    pub fn name(self) -> &'static str {
        match self {
            SpeechEncoder::Vec256L9 => "vec256l9",
            SpeechEncoder::Vec768L12 => "vec768l12",
            SpeechEncoder::HubertSoft => "hubertsoft",
            SpeechEncoder::DpHubert => "dphubert",
            SpeechEncoder::WavLmBasePlus => "wavlmbase+",
            SpeechEncoder::CnHubertLarge => "cnhubertlarge",
            SpeechEncoder::WhisperPpg => "whisper-ppg",
        }
    }

    /// Width of the emitted units
    pub fn dimension(self) -> usize {
        match self {
            SpeechEncoder::Vec256L9 | SpeechEncoder::HubertSoft => 256,
            SpeechEncoder::Vec768L12 | SpeechEncoder::DpHubert | SpeechEncoder::WavLmBasePlus => 768,
            SpeechEncoder::CnHubertLarge | SpeechEncoder::WhisperPpg => 1024,
        }
    }
}

impl FromStr for SpeechEncoder {
    type Err = PreprocessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoder = match s.to_ascii_lowercase().as_str() {
            "vec256l9" => SpeechEncoder::Vec256L9,
            "vec768l12" => SpeechEncoder::Vec768L12,
            "hubertsoft" => SpeechEncoder::HubertSoft,
            "dphubert" => SpeechEncoder::DpHubert,
            "wavlmbase+" => SpeechEncoder::WavLmBasePlus,
            "cnhubertlarge" => SpeechEncoder::CnHubertLarge,
            "whisper-ppg" => SpeechEncoder::WhisperPpg,
            _ => return Err(PreprocessError::UnsupportedSpeechEncoder(s.to_string())),
        };
        Ok(encoder)
    }
}

impl fmt::Display for SpeechEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encodes 16 kHz audio into content units
pub trait ContentEncoder: Send {
    /// Encode to a `(1, dim, frames)` tensor on the encoder's device
    fn encode(&self, wav16k: &[f32]) -> Result<Tensor>;

    /// Unit width
    fn dimension(&self) -> usize;
}

/// Log-mel front end with a fixed linear projection to the unit width
pub struct SpectralContentEncoder {
    device: Device,
    mel: MelSpectrogram,
    projection: Tensor,
    dimension: usize,
}

impl SpectralContentEncoder {
    /// Build the encoder for `encoder` on `device`
    pub fn new(encoder: SpeechEncoder, device: &Device) -> Result<Self> {
        let dimension = encoder.dimension();
        let mel = MelSpectrogram::new(512, HOP_LENGTH, 400, N_MELS, CONTENT_SAMPLE_RATE, 0.0, None);

        // Seeded by width so every worker and every run projects identically
        let mut rng = StdRng::seed_from_u64(dimension as u64);
        let scale = 1.0 / (N_MELS as f32).sqrt();
        let weights: Vec<f32> = (0..N_MELS * dimension)
            .map(|_| rng.gen_range(-1.0f32..1.0) * scale)
            .collect();
        let projection = Tensor::from_vec(weights, (N_MELS, dimension), device)?;

        Ok(Self {
            device: device.clone(),
            mel,
            projection,
            dimension,
        })
    }
}

impl ContentEncoder for SpectralContentEncoder {
    fn encode(&self, wav16k: &[f32]) -> Result<Tensor> {
        let frames = self.mel.compute(wav16k)?;
        if frames.is_empty() {
            anyhow::bail!(
                "audio too short for content encoding ({} samples at 16 kHz)",
                wav16k.len()
            );
        }

        let n_frames = frames.len();
        let flat: Vec<f32> = frames.into_iter().flatten().collect();
        let feats = Tensor::from_vec(flat, (n_frames, N_MELS), &self.device)?;

        // Per-band standardization over time
        let mean = feats.mean_keepdim(0)?;
        let centered = feats.broadcast_sub(&mean)?;
        let std = centered.sqr()?.mean_keepdim(0)?.sqrt()?.affine(1.0, 1e-5)?;
        let normed = centered.broadcast_div(&std)?;

        let units = normed.matmul(&self.projection)?;
        Ok(units.t()?.unsqueeze(0)?)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Resolve the configured encoder name and build it on `device`
pub fn load_content_encoder(
    name: &str,
    device: &Device,
) -> crate::error::Result<Box<dyn ContentEncoder>> {
    let encoder: SpeechEncoder = name.parse()?;
    Ok(Box::new(SpectralContentEncoder::new(encoder, device)?))
}
