//! Run configuration
//!
//! Hyperparameters are loaded once at startup from the model config
//! (`config.json`) and the diffusion config (`diffusion.yaml`). Both are parsed
//! with `serde_yaml`, which also accepts JSON. Every field has a default so a
//! partial file, or no file at all, still yields a usable configuration.

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PreprocessError, Result};
use crate::models::F0Method;

/// Audio framing parameters (`data` section of `config.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Model sample rate; every file is resampled to it
    pub sampling_rate: u32,
    /// Samples per feature frame
    pub hop_length: usize,
    /// Spectrogram FFT size
    pub filter_length: usize,
    /// Spectrogram window length
    pub win_length: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 44100,
            hop_length: 512,
            filter_length: 2048,
            win_length: 2048,
        }
    }
}

/// Model selection (`model` section of `config.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// Content encoder name, e.g. `vec768l12`
    pub speech_encoder: String,
    /// Whether the model consumes a loudness embedding
    pub vol_embedding: bool,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            speech_encoder: "vec768l12".to_string(),
            vol_embedding: false,
        }
    }
}

/// Model hyperparameters shared by every worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// `data` section
    pub data: DataConfig,
    /// `model` section
    pub model: ModelSection,
}

impl ModelConfig {
    /// Load from a JSON or YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_document(path.as_ref())
    }
}

/// Vocoder mel parameters (`vocoder` section of `diffusion.yaml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VocoderConfig {
    /// Vocoder family, `type` in the file
    #[serde(rename = "type")]
    pub kind: String,
    /// Checkpoint path, carried through but not loaded
    pub ckpt: String,
    /// Rate the mel is computed at
    pub sampling_rate: u32,
    /// FFT size
    pub n_fft: usize,
    /// Window length
    pub win_length: usize,
    /// Samples per mel frame
    pub hop_length: usize,
    /// Mel bands
    pub n_mels: usize,
    /// Lowest filterbank frequency in Hz
    pub fmin: f32,
    /// Highest filterbank frequency in Hz
    pub fmax: f32,
}

impl Default for VocoderConfig {
    fn default() -> Self {
        Self {
            kind: "nsf-hifigan".to_string(),
            ckpt: "pretrain/nsf_hifigan/model".to_string(),
            sampling_rate: 44100,
            n_fft: 2048,
            win_length: 2048,
            hop_length: 512,
            n_mels: 128,
            fmin: 40.0,
            fmax: 16000.0,
        }
    }
}

/// Shallow diffusion configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffusionConfig {
    /// `vocoder` section
    pub vocoder: VocoderConfig,
}

impl DiffusionConfig {
    /// Load from a YAML (or JSON) file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_document(path.as_ref())
    }
}

fn load_document<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| PreprocessError::io(path, e))?;
    serde_yaml::from_str(&content).map_err(|e| PreprocessError::Config {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// How a run with failed workers is reported to the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Any worker failure fails the run
    #[default]
    Strict,
    /// Failed chunks are logged and the run still succeeds
    AllowPartial,
}

/// Everything a worker needs to know, built once and shared read-only
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Model config (`config.json`)
    pub model: ModelConfig,
    /// Diffusion config (`diffusion.yaml`), read only with `use_diff`
    pub diffusion: DiffusionConfig,
    /// Run the larger shallow diffusion pipeline (loudness, mel, augmentation)
    pub use_diff: bool,
    /// Pitch estimator
    pub f0_method: F0Method,
    /// Skip extraction and only exercise the orchestration
    pub fake_processing: bool,
    /// Upper bound of the random per-file sleep in fake mode
    pub fake_delay: Duration,
    /// Number of compute devices to spread workers over; 0 binds to CPU
    pub device_count: usize,
    /// How worker failures affect the run result
    pub failure_policy: FailurePolicy,
    /// Progress polling interval
    pub poll_interval: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            diffusion: DiffusionConfig::default(),
            use_diff: false,
            f0_method: F0Method::default(),
            fake_processing: false,
            fake_delay: Duration::from_secs(1),
            device_count: 0,
            failure_policy: FailurePolicy::Strict,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl RunSettings {
    /// Whether the loudness step runs
    pub fn extracts_loudness(&self) -> bool {
        self.use_diff || self.model.model.vol_embedding
    }
}

/// Resolve a requested worker count, where 0 means "one per available core"
pub fn resolve_worker_count(requested: usize) -> NonZeroUsize {
    NonZeroUsize::new(requested).unwrap_or_else(|| {
        std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_model_config_from_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"data": {{"sampling_rate": 32000, "hop_length": 320}},
               "model": {{"speech_encoder": "vec256l9", "vol_embedding": true}},
               "train": {{"batch_size": 6}}}}"#
        )
        .unwrap();

        let config = ModelConfig::load(file.path()).unwrap();
        assert_eq!(config.data.sampling_rate, 32000);
        assert_eq!(config.data.hop_length, 320);
        assert_eq!(config.data.filter_length, 2048);
        assert_eq!(config.model.speech_encoder, "vec256l9");
        assert!(config.model.vol_embedding);
    }

    #[test]
    fn test_diffusion_config_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "vocoder:\n  type: nsf-hifigan\n  n_mels: 80\n  fmax: 8000").unwrap();

        let config = DiffusionConfig::load(file.path()).unwrap();
        assert_eq!(config.vocoder.kind, "nsf-hifigan");
        assert_eq!(config.vocoder.n_mels, 80);
        assert_eq!(config.vocoder.fmax, 8000.0);
        assert_eq!(config.vocoder.hop_length, 512);
    }

    #[test]
    fn test_missing_config_is_io_error() {
        let err = ModelConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, PreprocessError::Io { .. }));
    }

    #[test]
    fn test_loudness_follows_diff_or_vol_embedding() {
        let mut settings = RunSettings::default();
        assert!(!settings.extracts_loudness());
        settings.model.model.vol_embedding = true;
        assert!(settings.extracts_loudness());
        settings.model.model.vol_embedding = false;
        settings.use_diff = true;
        assert!(settings.extracts_loudness());
    }

    #[test]
    fn test_resolve_worker_count() {
        assert_eq!(resolve_worker_count(3).get(), 3);
        assert!(resolve_worker_count(0).get() >= 1);
    }
}
