//! Frame-wise loudness

use anyhow::Result;

use crate::audio::reflect_pad;

/// RMS loudness per hop
#[derive(Debug, Clone, Copy)]
pub struct VolumeExtractor {
    hop_length: usize,
}

impl VolumeExtractor {
    /// Extractor with one value per `hop_length` samples
    pub fn new(hop_length: usize) -> Self {
        Self { hop_length }
    }

    /// One RMS value per hop, `len / hop_length` frames
    ///
    /// The squared signal is reflect-padded by `hop/2` on the left and
    /// `(hop+1)/2` on the right so each frame is centered on its hop.
    pub fn extract(&self, audio: &[f32]) -> Result<Vec<f32>> {
        let hop = self.hop_length;
        if hop == 0 {
            anyhow::bail!("hop_length must be non-zero");
        }

        let n_frames = audio.len() / hop;
        let squared: Vec<f32> = audio.iter().map(|x| x * x).collect();
        let padded = reflect_pad(&squared, hop / 2, (hop + 1) / 2);

        Ok(padded
            .chunks_exact(hop)
            .take(n_frames)
            .map(|frame| (frame.iter().sum::<f32>() / hop as f32).sqrt())
            .collect())
    }
}
