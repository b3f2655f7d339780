//! Mel spectrogram computation

use anyhow::Result;

use super::stft::Stft;

/// Log-magnitude mel spectrogram computer
pub struct MelSpectrogram {
    /// FFT size
    pub n_fft: usize,
    /// Hop length
    pub hop_length: usize,
    /// Window length
    pub win_length: usize,
    /// Number of mel bands
    pub n_mels: usize,
    /// Sample rate
    pub sample_rate: u32,
    /// Minimum frequency
    pub fmin: f32,
    /// Maximum frequency (None = Nyquist)
    pub fmax: Option<f32>,
    /// Mel filterbank
    mel_filters: Vec<Vec<f32>>,
    stft: Stft,
}

impl MelSpectrogram {
    /// Create a new mel spectrogram computer
    pub fn new(
        n_fft: usize,
        hop_length: usize,
        win_length: usize,
        n_mels: usize,
        sample_rate: u32,
        fmin: f32,
        fmax: Option<f32>,
    ) -> Self {
        let fmax = fmax.unwrap_or(sample_rate as f32 / 2.0);
        let mel_filters = Self::mel_filterbank(n_fft, n_mels, sample_rate, fmin, fmax);

        Self {
            n_fft,
            hop_length,
            win_length,
            n_mels,
            sample_rate,
            fmin,
            fmax: Some(fmax),
            mel_filters,
            stft: Stft::new(n_fft, hop_length, win_length),
        }
    }

    /// Compute mel spectrogram from audio samples, `[n_frames][n_mels]`
    pub fn compute(&self, audio: &[f32]) -> Result<Vec<Vec<f32>>> {
        let magnitude = self.stft.magnitude(audio)?;
        Ok(self.log_compress(&self.apply_mel_filters(&magnitude)))
    }

    /// Compute a pitch-shifted mel spectrogram
    ///
    /// The analysis window is stretched by `2^(keyshift / 12)`, the resulting
    /// bins are cropped or zero-filled back to `n_fft / 2 + 1`, and magnitudes
    /// are rescaled by the window ratio before the mel filterbank is applied.
    pub fn compute_with_keyshift(&self, audio: &[f32], keyshift: f32) -> Result<Vec<Vec<f32>>> {
        if keyshift == 0.0 {
            return self.compute(audio);
        }

        let factor = 2f32.powf(keyshift / 12.0);
        let n_fft = ((self.n_fft as f32 * factor).round() as usize).max(2);
        let win_length = ((self.win_length as f32 * factor).round() as usize).max(1);
        let stft = Stft::new(n_fft, self.hop_length, win_length);

        let n_bins = self.stft.n_bins();
        let scale = self.win_length as f32 / win_length as f32;
        let magnitude: Vec<Vec<f32>> = stft
            .magnitude(audio)?
            .into_iter()
            .map(|frame| {
                let mut resized: Vec<f32> = frame.into_iter().take(n_bins).map(|m| m * scale).collect();
                resized.resize(n_bins, 0.0);
                resized
            })
            .collect();

        Ok(self.log_compress(&self.apply_mel_filters(&magnitude)))
    }

    /// Apply mel filterbank to a magnitude spectrum
    fn apply_mel_filters(&self, spec: &[Vec<f32>]) -> Vec<Vec<f32>> {
        spec.iter()
            .map(|frame| {
                self.mel_filters.iter()
                    .map(|filter| {
                        filter.iter()
                            .zip(frame.iter())
                            .map(|(f, p)| f * p)
                            .sum()
                    })
                    .collect()
            })
            .collect()
    }

    /// Apply log compression
    fn log_compress(&self, mel_spec: &[Vec<f32>]) -> Vec<Vec<f32>> {
        mel_spec.iter()
            .map(|frame| {
                frame.iter()
                    .map(|v| v.max(1e-5).ln())
                    .collect()
            })
            .collect()
    }

    /// Hz to Mel conversion
    fn hz_to_mel(hz: f32) -> f32 {
        2595.0 * (1.0 + hz / 700.0).log10()
    }

    /// Mel to Hz conversion
    fn mel_to_hz(mel: f32) -> f32 {
        700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
    }

    /// Create mel filterbank
    fn mel_filterbank(n_fft: usize, n_mels: usize, sr: u32, fmin: f32, fmax: f32) -> Vec<Vec<f32>> {
        let n_freqs = n_fft / 2 + 1;
        let freq_bins: Vec<f32> = (0..n_freqs)
            .map(|i| i as f32 * sr as f32 / n_fft as f32)
            .collect();

        let mel_min = Self::hz_to_mel(fmin);
        let mel_max = Self::hz_to_mel(fmax);
        let mel_points: Vec<f32> = (0..n_mels + 2)
            .map(|i| Self::mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
            .collect();

        let mut filters = vec![vec![0.0; n_freqs]; n_mels];

        for (i, filter) in filters.iter_mut().enumerate() {
            let left = mel_points[i];
            let center = mel_points[i + 1];
            let right = mel_points[i + 2];

            for (j, &freq) in freq_bins.iter().enumerate() {
                if freq >= left && freq <= center {
                    filter[j] = (freq - left) / (center - left);
                } else if freq > center && freq <= right {
                    filter[j] = (right - freq) / (right - center);
                }
            }
        }

        filters
    }
}
