//! Chunking of the file list and device assignment

use std::num::NonZeroUsize;
use std::ops::Range;
use std::path::PathBuf;

/// Split `len` items into `workers` contiguous ranges
///
/// Worker `i` gets `[i*len/N, (i+1)*len/N)`. Ranges cover `0..len` exactly
/// and their sizes differ by at most one.
pub fn partition(len: usize, workers: NonZeroUsize) -> Vec<Range<usize>> {
    let n = workers.get() as u128;
    let total = len as u128;
    let bound = |i: u128| (i * total / n) as usize;
    (0..n).map(|i| bound(i)..bound(i + 1)).collect()
}

/// Device for `rank`, round-robin over `device_count` devices; `None` means CPU
pub fn device_index(rank: usize, device_count: usize) -> Option<usize> {
    (device_count > 0).then(|| rank % device_count)
}

/// One worker's assignment
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    /// Position in the worker pool
    pub rank: usize,
    /// CUDA device, `None` for CPU
    pub device_index: Option<usize>,
    /// Contiguous slice of the file list
    pub chunk: Vec<PathBuf>,
}

/// Build one handle per worker
pub fn assign(files: &[PathBuf], workers: NonZeroUsize, device_count: usize) -> Vec<WorkerHandle> {
    partition(files.len(), workers)
        .into_iter()
        .enumerate()
        .map(|(rank, range)| WorkerHandle {
            rank,
            device_index: device_index(rank, device_count),
            chunk: files[range].to_vec(),
        })
        .collect()
}
