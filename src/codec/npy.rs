//! NPY encoding for array artifacts
//!
//! Writes NumPy v1.0 `.npy` payloads of little-endian f32.

use anyhow::{Context, Result};

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Encode a little-endian f32 array with the given C-order shape
pub fn encode_f32(data: &[f32], shape: &[usize]) -> Result<Vec<u8>> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
        anyhow::bail!("shape {:?} does not match {} elements", shape, data.len());
    }

    let shape_str = match shape {
        [single] => format!("({},)", single),
        dims => format!(
            "({})",
            dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': {}, }}",
        shape_str
    );
    // Magic, version and length prefix take 10 bytes; pad so data is 64-byte aligned
    let unpadded = 10 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let header_len = u16::try_from(header.len()).context("NPY header too long")?;
    let mut out = Vec::with_capacity(10 + header.len() + data.len() * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for value in data {
        out.extend_from_slice(&value.to_le_bytes());
    }
    Ok(out)
}

/// Encode a row-major matrix of equal-length rows
pub fn encode_f32_rows(rows: &[Vec<f32>]) -> Result<Vec<u8>> {
    let width = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|row| row.len() != width) {
        anyhow::bail!("ragged rows cannot be encoded as NPY");
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    encode_f32(&flat, &[rows.len(), width])
}

/// Decoded `<f4` payload: C-order shape and values
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct NpyArray {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// Parse a v1.0 little-endian f32 payload, the only layout this crate writes
#[cfg(test)]
pub(crate) fn read_npy(bytes: &[u8]) -> Result<NpyArray> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC || bytes[6] != 1 {
        anyhow::bail!("not an NPY v1.0 payload");
    }
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let body = bytes.get(10 + header_len..).context("truncated NPY header")?;
    let header = std::str::from_utf8(&bytes[10..10 + header_len])?;

    if !header.contains("'descr': '<f4'") {
        anyhow::bail!("unsupported dtype in header {header:?}");
    }
    let shape = parse_shape(header)?;

    let count: usize = shape.iter().product();
    if body.len() != count * 4 {
        anyhow::bail!("expected {} data bytes, found {}", count * 4, body.len());
    }
    let values = body
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(NpyArray { shape, values })
}

#[cfg(test)]
fn parse_shape(header: &str) -> Result<Vec<usize>> {
    let tuple = header
        .split_once("'shape': (")
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(dims, _)| dims)
        .context("no shape tuple in header")?;
    tuple
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.parse::<usize>().with_context(|| format!("bad dimension {d:?}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shape() {
        let header = "{'descr': '<f4', 'fortran_order': False, 'shape': (100,), }";
        assert_eq!(parse_shape(header).unwrap(), vec![100]);
        let header = "{'descr': '<f4', 'fortran_order': False, 'shape': (1, 2, 3), }";
        assert_eq!(parse_shape(header).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_header_is_aligned() {
        let bytes = encode_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
        assert_eq!(bytes.len(), 10 + header_len + 6 * 4);
    }

    #[test]
    fn test_encoded_rows_read_back() {
        let bytes = encode_f32_rows(&[vec![0.5, 1.5], vec![2.5, 3.5], vec![4.5, 5.5]]).unwrap();
        let arr = read_npy(&bytes).unwrap();
        assert_eq!(arr.shape, vec![3, 2]);
        assert_eq!(arr.values, vec![0.5, 1.5, 2.5, 3.5, 4.5, 5.5]);
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let bytes = encode_f32(&[1.0, 2.0, 3.0], &[3]).unwrap();
        assert!(read_npy(&bytes[..bytes.len() - 4]).is_err());
        assert!(read_npy(b"garbage").is_err());
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        assert!(encode_f32(&[1.0, 2.0], &[3]).is_err());
        assert!(encode_f32_rows(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
