//! Extraction steps
//!
//! Each step turns one decoded source file into the bytes of one or more
//! artifacts. Steps are only invoked for kinds that are missing on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::Tensor;
use rand::Rng;

use super::artifact::ArtifactKind;
use super::resources::ExtractionResources;
use crate::audio::{AudioLoader, Resampler};
use crate::codec::{encode_f32, encode_f32_rows, encode_tensors};
use crate::config::RunSettings;
use crate::error::{PreprocessError, Result};

/// A decoded source file
#[derive(Debug, Clone)]
pub struct SourceAudio {
    /// File the samples came from
    pub path: PathBuf,
    /// Mono samples at `sample_rate`
    pub samples: Vec<f32>,
    /// Configured model rate the samples were resampled to
    pub sample_rate: u32,
    /// Rate stored in the file itself
    pub native_rate: u32,
}

impl SourceAudio {
    /// Decode `path` and resample it to `target_sr`
    pub fn load(path: &Path, target_sr: u32) -> Result<Self> {
        let decode_err = |e: anyhow::Error| PreprocessError::Decode {
            path: path.to_path_buf(),
            reason: format!("{e:#}"),
        };

        let (native, native_rate) = AudioLoader::decode(path).map_err(decode_err)?;
        let samples = Resampler::resample(&native, native_rate, target_sr).map_err(decode_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            samples,
            sample_rate: target_sr,
            native_rate,
        })
    }
}

/// Produced artifact bytes, tagged by kind
pub type ArtifactBytes = Vec<(ArtifactKind, Vec<u8>)>;

/// One transform from source audio to artifacts
pub trait ExtractionStep: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Kinds this step can produce
    fn kinds(&self) -> &'static [ArtifactKind];

    /// Produce the `missing` subset of [`ExtractionStep::kinds`]
    fn extract(
        &self,
        audio: &SourceAudio,
        resources: &ExtractionResources,
        missing: &[ArtifactKind],
    ) -> Result<ArtifactBytes>;
}

/// Content units at 16 kHz
pub struct EmbeddingStep;

impl ExtractionStep for EmbeddingStep {
    fn name(&self) -> &'static str {
        "embedding"
    }

    fn kinds(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Embedding]
    }

    fn extract(
        &self,
        audio: &SourceAudio,
        resources: &ExtractionResources,
        _missing: &[ArtifactKind],
    ) -> Result<ArtifactBytes> {
        let wav16k = Resampler::resample_to_16k(&audio.samples, audio.sample_rate)?;
        let units = resources.content_encoder.encode(&wav16k)?;
        let bytes = encode_tensors(&[("units", &units)], None)?;
        Ok(vec![(ArtifactKind::Embedding, bytes)])
    }
}

/// F0 with voicing, stored as a `2 x frames` array
pub struct PitchStep;

impl ExtractionStep for PitchStep {
    fn name(&self) -> &'static str {
        "pitch"
    }

    fn kinds(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Pitch]
    }

    fn extract(
        &self,
        audio: &SourceAudio,
        resources: &ExtractionResources,
        _missing: &[ArtifactKind],
    ) -> Result<ArtifactBytes> {
        let (f0, uv) = resources.f0_predictor.compute_f0_uv(&audio.samples)?;
        let frames = f0.len();
        let mut stacked = f0;
        stacked.extend(uv);
        Ok(vec![(ArtifactKind::Pitch, encode_f32(&stacked, &[2, frames])?)])
    }
}

/// Linear magnitude spectrogram, `(bins, frames)`
pub struct SpectrogramStep;

impl ExtractionStep for SpectrogramStep {
    fn name(&self) -> &'static str {
        "spectrogram"
    }

    fn kinds(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Spectrogram]
    }

    fn extract(
        &self,
        audio: &SourceAudio,
        resources: &ExtractionResources,
        _missing: &[ArtifactKind],
    ) -> Result<ArtifactBytes> {
        // Frames must line up with the other features, whatever the file's own rate
        let expected = resources.settings.model.data.sampling_rate;
        if audio.sample_rate != expected {
            return Err(PreprocessError::ConfigMismatch {
                path: audio.path.clone(),
                actual: audio.sample_rate,
                expected,
            });
        }

        let frames = resources.spectrogram.magnitude(&audio.samples)?;
        let n_bins = resources.spectrogram.n_bins();
        let n_frames = frames.len();
        let flat: Vec<f32> = frames.into_iter().flatten().collect();
        let spec = Tensor::from_vec(flat, (n_frames, n_bins), &resources.device)
            .and_then(|t| t.t())
            .map_err(anyhow::Error::from)?;

        let bytes = encode_tensors(&[("spec", &spec)], None)?;
        Ok(vec![(ArtifactKind::Spectrogram, bytes)])
    }
}

/// RMS loudness per hop
pub struct LoudnessStep;

impl ExtractionStep for LoudnessStep {
    fn name(&self) -> &'static str {
        "loudness"
    }

    fn kinds(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Loudness]
    }

    fn extract(
        &self,
        audio: &SourceAudio,
        resources: &ExtractionResources,
        _missing: &[ArtifactKind],
    ) -> Result<ArtifactBytes> {
        let volume = resources.volume.extract(&audio.samples)?;
        Ok(vec![(ArtifactKind::Loudness, encode_f32(&volume, &[volume.len()])?)])
    }
}

/// Vocoder mel, `[frames][n_mels]`
pub struct MelStep;

impl ExtractionStep for MelStep {
    fn name(&self) -> &'static str {
        "mel"
    }

    fn kinds(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Mel]
    }

    fn extract(
        &self,
        audio: &SourceAudio,
        resources: &ExtractionResources,
        _missing: &[ArtifactKind],
    ) -> Result<ArtifactBytes> {
        let mel = resources
            .mel
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("mel extractor not loaded"))?;
        let frames = mel.extract(&audio.samples, audio.sample_rate, 0.0)?;
        Ok(vec![(ArtifactKind::Mel, encode_f32_rows(&frames)?)])
    }
}

/// Randomly volume- and key-shifted mel plus the matching loudness
pub struct AugmentationStep;

impl AugmentationStep {
    /// Draw `(log10_vol_shift, keyshift)` for audio peaking at `max_abs`
    ///
    /// The volume shift never pushes the peak above full scale.
    pub fn draw_shifts<R: Rng>(rng: &mut R, max_abs: f32) -> (f32, f32) {
        let max_amp = max_abs + 1e-5;
        let max_shift = (1.0 / max_amp).log10().min(1.0);
        let log10_vol_shift = -1.0 + rng.gen::<f32>() * (max_shift + 1.0);
        let keyshift = rng.gen_range(-5.0f32..5.0);
        (log10_vol_shift, keyshift)
    }
}

impl ExtractionStep for AugmentationStep {
    fn name(&self) -> &'static str {
        "augmentation"
    }

    fn kinds(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::AugmentedMel, ArtifactKind::AugmentedLoudness]
    }

    fn extract(
        &self,
        audio: &SourceAudio,
        resources: &ExtractionResources,
        missing: &[ArtifactKind],
    ) -> Result<ArtifactBytes> {
        let mel = resources
            .mel
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("mel extractor not loaded"))?;

        let max_abs = audio.samples.iter().fold(0.0f32, |m, x| m.max(x.abs()));
        let (log10_vol_shift, keyshift) = Self::draw_shifts(&mut rand::thread_rng(), max_abs);
        let gain = 10f32.powf(log10_vol_shift);
        let shifted: Vec<f32> = audio.samples.iter().map(|x| x * gain).collect();

        let mut out = Vec::with_capacity(missing.len());
        if missing.contains(&ArtifactKind::AugmentedMel) {
            let frames = mel.extract(&shifted, audio.sample_rate, keyshift)?;
            let n_frames = frames.len();
            let flat: Vec<f32> = frames.into_iter().flatten().collect();
            let tensor = Tensor::from_vec(flat, (n_frames, mel.n_mels()), &resources.device)
                .map_err(anyhow::Error::from)?;
            let metadata = HashMap::from([("keyshift".to_string(), keyshift.to_string())]);
            let bytes = encode_tensors(&[("mel", &tensor)], Some(metadata))?;
            out.push((ArtifactKind::AugmentedMel, bytes));
        }
        if missing.contains(&ArtifactKind::AugmentedLoudness) {
            let volume = resources.volume.extract(&shifted)?;
            out.push((ArtifactKind::AugmentedLoudness, encode_f32(&volume, &[volume.len()])?));
        }
        Ok(out)
    }
}

/// Ordered list of steps a worker runs on every file
pub struct Pipeline {
    steps: Vec<Box<dyn ExtractionStep>>,
}

impl Pipeline {
    /// Pipeline running `steps` in order
    pub fn new(steps: Vec<Box<dyn ExtractionStep>>) -> Self {
        Self { steps }
    }

    /// The standard pipeline for these settings
    ///
    /// Embedding, pitch and spectrogram always run. Loudness runs with the
    /// diffusion pipeline or a volume-embedding model; mel and augmentation
    /// only with the diffusion pipeline.
    pub fn for_settings(settings: &RunSettings) -> Self {
        let mut steps: Vec<Box<dyn ExtractionStep>> =
            vec![Box::new(EmbeddingStep), Box::new(PitchStep), Box::new(SpectrogramStep)];
        if settings.extracts_loudness() {
            steps.push(Box::new(LoudnessStep));
        }
        if settings.use_diff {
            steps.push(Box::new(MelStep));
            steps.push(Box::new(AugmentationStep));
        }
        Self::new(steps)
    }

    /// Steps in run order
    pub fn steps(&self) -> &[Box<dyn ExtractionStep>] {
        &self.steps
    }

    /// Every kind this pipeline produces, in step order
    pub fn kinds(&self) -> Vec<ArtifactKind> {
        self.steps.iter().flat_map(|s| s.kinds().iter().copied()).collect()
    }
}
