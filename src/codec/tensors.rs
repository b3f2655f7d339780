//! Safetensors encoding for tensor artifacts

use anyhow::Result;
use candle_core::{Device, Tensor};
use std::collections::HashMap;

/// Serialize named tensors, plus optional string metadata, to safetensors bytes
///
/// Tensors are moved to the CPU first; device-resident tensors are fine to pass.
pub fn encode_tensors(
    tensors: &[(&str, &Tensor)],
    metadata: Option<HashMap<String, String>>,
) -> Result<Vec<u8>> {
    let host: Vec<(&str, Tensor)> = tensors
        .iter()
        .map(|(name, tensor)| -> Result<(&str, Tensor)> {
            Ok((*name, tensor.to_device(&Device::Cpu)?.contiguous()?))
        })
        .collect::<Result<_>>()?;

    let bytes = safetensors::serialize(host.iter().map(|(name, t)| (*name, t)), &metadata)?;
    Ok(bytes)
}

/// Read the string metadata block of a safetensors payload
pub fn read_metadata(bytes: &[u8]) -> Result<HashMap<String, String>> {
    let (_, metadata) = safetensors::SafeTensors::read_metadata(bytes)?;
    Ok(metadata.metadata().clone().unwrap_or_default())
}

/// Decode every tensor of a safetensors payload onto `device`
pub fn decode_tensors(bytes: &[u8], device: &Device) -> Result<HashMap<String, Tensor>> {
    Ok(candle_core::safetensors::load_buffer(bytes, device)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_and_metadata_survive_encoding() {
        let device = Device::Cpu;
        let mel = Tensor::from_vec(vec![1f32, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), &device).unwrap();
        let mut metadata = HashMap::new();
        metadata.insert("keyshift".to_string(), "-2.5".to_string());

        let bytes = encode_tensors(&[("mel", &mel)], Some(metadata)).unwrap();

        let tensors = decode_tensors(&bytes, &device).unwrap();
        let decoded = &tensors["mel"];
        assert_eq!(decoded.dims(), &[2, 3]);
        assert_eq!(decoded.to_vec2::<f32>().unwrap(), vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        assert_eq!(read_metadata(&bytes).unwrap()["keyshift"], "-2.5");
    }
}
