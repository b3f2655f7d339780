//! Audio file loading

use anyhow::{Context, Result};
use std::path::Path;

/// Audio loader for dataset source files
pub struct AudioLoader;

impl AudioLoader {
    /// Load audio as mono samples at `target_sr`, returning the samples and their rate
    pub fn load<P: AsRef<Path>>(path: P, target_sr: u32) -> Result<(Vec<f32>, u32)> {
        let (samples, sample_rate) = Self::decode(path)?;
        if sample_rate != target_sr {
            let resampled = super::Resampler::resample(&samples, sample_rate, target_sr)?;
            Ok((resampled, target_sr))
        } else {
            Ok((samples, sample_rate))
        }
    }

    /// Decode mono samples at the file's own sample rate
    pub fn decode<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, u32)> {
        let path = path.as_ref();

        if path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
        {
            return Self::load_wav(path);
        }

        Err(anyhow::anyhow!("Unsupported audio format: {:?}", path))
    }

    fn load_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
        let reader = hound::WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let sample_rate = spec.sample_rate;

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .context("Failed to read float samples")?,
            hound::SampleFormat::Int => {
                let max_value = (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / max_value))
                    .collect::<Result<_, _>>()
                    .context("Failed to read integer samples")?
            }
        };

        // Downmix
        let mono_samples = if spec.channels > 1 {
            samples
                .chunks(spec.channels as usize)
                .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
                .collect()
        } else {
            samples
        };

        Ok((mono_samples, sample_rate))
    }
}
