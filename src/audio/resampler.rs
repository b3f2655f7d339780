//! Audio resampling using rubato

use anyhow::{Context, Result};
use rubato::{Resampler as RubatoResampler, SincFixedIn, SincInterpolationType, SincInterpolationParameters, WindowFunction};

/// Sample rate expected by content encoders
pub const CONTENT_SAMPLE_RATE: u32 = 16000;

/// Audio resampler
pub struct Resampler;

impl Resampler {
    /// Resample mono audio from one sample rate to another
    ///
    /// The output always holds `ceil(len * to_sr / from_sr)` samples.
    pub fn resample(samples: &[f32], from_sr: u32, to_sr: u32) -> Result<Vec<f32>> {
        if from_sr == to_sr || samples.is_empty() {
            return Ok(samples.to_vec());
        }
        if from_sr == 0 || to_sr == 0 {
            anyhow::bail!("cannot resample between {} Hz and {} Hz", from_sr, to_sr);
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let ratio = to_sr as f64 / from_sr as f64;
        let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, samples.len(), 1)
            .with_context(|| format!("Failed to build {} Hz -> {} Hz resampler", from_sr, to_sr))?;

        let output = resampler
            .process(&[samples], None)
            .context("Resampling failed")?;

        let expected = (samples.len() as u64 * to_sr as u64).div_ceil(from_sr as u64) as usize;
        let mut resampled = output.into_iter().next().unwrap_or_default();
        resampled.resize(expected, 0.0);
        Ok(resampled)
    }

    /// Resample to the 16 kHz rate content encoders consume
    pub fn resample_to_16k(samples: &[f32], from_sr: u32) -> Result<Vec<f32>> {
        Self::resample(samples, from_sr, CONTENT_SAMPLE_RATE)
    }
}
