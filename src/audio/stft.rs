//! Short-time Fourier transform

use anyhow::Result;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// Magnitude STFT with reflect padding and no centering
///
/// Frames are laid out as `[n_frames][n_fft / 2 + 1]`.
#[derive(Debug, Clone)]
pub struct Stft {
    /// FFT size
    pub n_fft: usize,
    /// Samples between frame starts
    pub hop_length: usize,
    /// Hann window length, at most `n_fft`
    pub win_length: usize,
    /// Hann window of `win_length`, zero-padded and centered to `n_fft`
    window: Vec<f32>,
}

impl Stft {
    /// Create a new STFT
    pub fn new(n_fft: usize, hop_length: usize, win_length: usize) -> Self {
        let win_length = win_length.min(n_fft);
        let offset = (n_fft - win_length) / 2;
        let mut window = vec![0.0; n_fft];
        for (i, w) in hann_window(win_length).into_iter().enumerate() {
            window[offset + i] = w;
        }

        Self {
            n_fft,
            hop_length,
            win_length,
            window,
        }
    }

    /// Number of frequency bins per frame
    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Magnitude spectrogram, `sqrt(re^2 + im^2 + 1e-6)` per bin
    pub fn magnitude(&self, audio: &[f32]) -> Result<Vec<Vec<f32>>> {
        if self.hop_length == 0 || self.n_fft == 0 {
            anyhow::bail!("STFT needs non-zero n_fft and hop_length");
        }

        let pad = self.n_fft.saturating_sub(self.hop_length);
        let padded = reflect_pad(audio, pad / 2, (pad + 1) / 2);
        if padded.len() < self.n_fft {
            return Ok(Vec::new());
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(self.n_fft);

        let num_frames = (padded.len() - self.n_fft) / self.hop_length + 1;
        let mut frames = Vec::with_capacity(num_frames);
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.n_fft];

        for i in 0..num_frames {
            let start = i * self.hop_length;
            for (j, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + j] * self.window[j], 0.0);
            }

            fft.process(&mut buffer);
            frames.push(
                buffer[..self.n_bins()]
                    .iter()
                    .map(|c| (c.norm_sqr() + 1e-6).sqrt())
                    .collect(),
            );
        }

        Ok(frames)
    }
}

/// Create Hann window
pub(crate) fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Reflect-pad `audio` without repeating the edge sample
///
/// Inputs shorter than two samples are zero-padded instead.
pub(crate) fn reflect_pad(audio: &[f32], left: usize, right: usize) -> Vec<f32> {
    let n = audio.len();
    let mut out = Vec::with_capacity(n + left + right);
    if n < 2 {
        out.resize(left, 0.0);
        out.extend_from_slice(audio);
        out.resize(left + n + right, 0.0);
        return out;
    }

    let period = 2 * (n - 1);
    let reflect = |idx: isize| -> f32 {
        let m = idx.rem_euclid(period as isize) as usize;
        if m < n {
            audio[m]
        } else {
            audio[period - m]
        }
    };

    out.extend((0..left).map(|i| reflect(i as isize - left as isize)));
    out.extend_from_slice(audio);
    out.extend((0..right).map(|i| reflect((n + i) as isize)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflect_pad() {
        let padded = reflect_pad(&[1.0, 2.0, 3.0, 4.0], 2, 2);
        assert_eq!(padded, vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0]);
    }

    #[test]
    fn test_reflect_pad_wider_than_input() {
        let padded = reflect_pad(&[1.0, 2.0], 3, 0);
        assert_eq!(padded, vec![2.0, 1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_frame_count_matches_hop() {
        let stft = Stft::new(512, 128, 512);
        let audio = vec![0.0; 128 * 20];
        let frames = stft.magnitude(&audio).unwrap();
        assert_eq!(frames.len(), 20);
        assert_eq!(frames[0].len(), 257);
    }

    #[test]
    fn test_sine_peaks_at_its_bin() {
        let sr = 16000.0;
        let stft = Stft::new(512, 128, 512);
        let audio: Vec<f32> = (0..4096)
            .map(|i| (2.0 * PI * 1000.0 * i as f32 / sr).sin())
            .collect();
        let frames = stft.magnitude(&audio).unwrap();
        let frame = &frames[frames.len() / 2];
        let peak = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 32);
    }

    #[test]
    fn test_zero_hop_is_rejected() {
        assert!(Stft::new(512, 0, 512).magnitude(&[0.0; 1024]).is_err());
    }
}
