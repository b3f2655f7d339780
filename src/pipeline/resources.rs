//! Per-worker extraction resources and device binding

use std::sync::Arc;

use candle_core::Device;
use tracing::debug;

use crate::audio::Stft;
use crate::config::RunSettings;
use crate::error::{PreprocessError, Result};
use crate::models::{
    f0_predictor, load_content_encoder, ContentEncoder, F0Predictor, MelExtractor, VolumeExtractor,
};

/// Open the compute device for a worker
///
/// `None` binds to the CPU; `Some(i)` opens CUDA device `i`.
pub fn bind_device(device_index: Option<usize>) -> Result<Device> {
    match device_index {
        None => Ok(Device::Cpu),
        Some(index) => Device::new_cuda(index).map_err(|e| PreprocessError::DeviceUnavailable {
            index,
            reason: e.to_string(),
        }),
    }
}

/// Number of CUDA devices visible to this process (0 without CUDA support)
pub fn probe_device_count() -> usize {
    if !candle_core::utils::cuda_is_available() {
        return 0;
    }
    let mut count = 0;
    while Device::new_cuda(count).is_ok() {
        count += 1;
    }
    count
}

/// Everything the extraction steps share within one worker
///
/// Built once at worker startup on the worker's device.
pub struct ExtractionResources {
    /// Run settings the resources were built from
    pub settings: Arc<RunSettings>,
    /// Bound compute device
    pub device: Device,
    /// Content unit encoder
    pub content_encoder: Box<dyn ContentEncoder>,
    /// Pitch estimator at the model rate
    pub f0_predictor: Box<dyn F0Predictor>,
    /// Loudness at the model hop
    pub volume: VolumeExtractor,
    /// Linear spectrogram at the model framing
    pub spectrogram: Stft,
    /// Present only when the diffusion pipeline is on
    pub mel: Option<MelExtractor>,
}

impl ExtractionResources {
    /// Bind the device and build every extractor
    pub fn load(settings: Arc<RunSettings>, device_index: Option<usize>) -> Result<Self> {
        let device = bind_device(device_index)?;
        debug!("Bound extraction device: {:?}", device);

        let data = &settings.model.data;
        let content_encoder = load_content_encoder(&settings.model.model.speech_encoder, &device)?;
        let f0_predictor = f0_predictor(settings.f0_method, data.sampling_rate, data.hop_length);
        let volume = VolumeExtractor::new(data.hop_length);
        let spectrogram = Stft::new(data.filter_length, data.hop_length, data.win_length);
        let mel = settings
            .use_diff
            .then(|| MelExtractor::new(&settings.diffusion.vocoder));

        Ok(Self {
            settings,
            device,
            content_encoder,
            f0_predictor,
            volume,
            spectrogram,
            mel,
        })
    }
}
