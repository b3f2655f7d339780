//! Vocoder-rate mel extraction for the shallow diffusion pipeline

use anyhow::Result;

use crate::audio::{MelSpectrogram, Resampler};
use crate::config::VocoderConfig;

/// Log-mel spectrogram matching the vocoder's analysis parameters
pub struct MelExtractor {
    config: VocoderConfig,
    mel: MelSpectrogram,
}

impl MelExtractor {
    /// Build the filterbank described by `config`
    pub fn new(config: &VocoderConfig) -> Self {
        let mel = MelSpectrogram::new(
            config.n_fft,
            config.hop_length,
            config.win_length,
            config.n_mels,
            config.sampling_rate,
            config.fmin,
            Some(config.fmax),
        );
        Self {
            config: config.clone(),
            mel,
        }
    }

    /// Rate audio is resampled to before the mel
    pub fn sampling_rate(&self) -> u32 {
        self.config.sampling_rate
    }

    /// Mel bands per frame
    pub fn n_mels(&self) -> usize {
        self.config.n_mels
    }

    /// `[n_frames][n_mels]` log-mel of `audio` at `sample_rate`, key-shifted
    /// by `keyshift` semitones
    pub fn extract(&self, audio: &[f32], sample_rate: u32, keyshift: f32) -> Result<Vec<Vec<f32>>> {
        let audio = Resampler::resample(audio, sample_rate, self.config.sampling_rate)?;
        self.mel.compute_with_keyshift(&audio, keyshift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> VocoderConfig {
        VocoderConfig {
            sampling_rate: 16000,
            n_fft: 512,
            win_length: 512,
            hop_length: 160,
            n_mels: 40,
            fmin: 40.0,
            fmax: 8000.0,
            ..VocoderConfig::default()
        }
    }

    #[test]
    fn test_mel_shape() {
        let extractor = MelExtractor::new(&test_config());
        let audio: Vec<f32> = (0..16000).map(|i| (i as f32 * 0.07).sin() * 0.2).collect();
        let mel = extractor.extract(&audio, 16000, 0.0).unwrap();
        assert_eq!(mel.len(), 100);
        assert!(mel.iter().all(|frame| frame.len() == 40));
    }

    #[test]
    fn test_keyshift_keeps_shape() {
        let extractor = MelExtractor::new(&test_config());
        let audio: Vec<f32> = (0..16000).map(|i| (i as f32 * 0.07).sin() * 0.2).collect();
        let plain = extractor.extract(&audio, 16000, 0.0).unwrap();
        let shifted = extractor.extract(&audio, 16000, 3.0).unwrap();
        assert_eq!(shifted[0].len(), plain[0].len());
        assert_ne!(plain, shifted);
    }
}
