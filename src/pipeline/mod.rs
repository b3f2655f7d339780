//! Per-file feature extraction
//!
//! - ArtifactCache: artifact paths and the existence gate
//! - ExtractionStep: one source-to-artifacts transform
//! - ExtractionResources: extractors bound to a worker's device

mod artifact;
mod resources;
mod steps;

pub use artifact::{ArtifactCache, ArtifactKind};
pub use resources::{bind_device, probe_device_count, ExtractionResources};
pub use steps::{
    ArtifactBytes, AugmentationStep, EmbeddingStep, ExtractionStep, LoudnessStep, MelStep, Pipeline,
    PitchStep, SourceAudio, SpectrogramStep,
};
