//! Artifact payload encodings
//!
//! Array artifacts (pitch, loudness, mel) are NPY; tensor artifacts
//! (content embedding, spectrogram, augmented mel) are safetensors.

mod npy;
mod tensors;

pub use npy::{encode_f32, encode_f32_rows};
#[cfg(test)]
pub(crate) use npy::read_npy;
pub use tensors::{decode_tensors, encode_tensors, read_metadata};
