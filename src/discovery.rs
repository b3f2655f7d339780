//! Dataset discovery

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{PreprocessError, Result};

/// Recursively collect `*.wav` files under `root`, sorted by path
///
/// Extension matching is case-insensitive. Unreadable entries are skipped.
pub fn discover_wavs(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(PreprocessError::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "input directory not found"),
        ));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
        })
        .collect();
    files.sort();

    debug!("Found {} wav files under {:?}", files.len(), root);
    Ok(files)
}

/// Shuffle so expensive speakers spread across chunks
///
/// A seed makes the order reproducible.
pub fn shuffle_files(files: &mut [PathBuf], seed: Option<u64>) {
    match seed {
        Some(seed) => files.shuffle(&mut StdRng::seed_from_u64(seed)),
        None => files.shuffle(&mut rand::thread_rng()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_discovers_nested_wavs_only() {
        let dir = tempfile::tempdir().unwrap();
        let speaker = dir.path().join("speaker_a");
        fs::create_dir_all(speaker.join("deeper")).unwrap();
        fs::write(speaker.join("1.wav"), b"").unwrap();
        fs::write(speaker.join("2.WAV"), b"").unwrap();
        fs::write(speaker.join("deeper").join("3.wav"), b"").unwrap();
        fs::write(speaker.join("1.wav.f0.npy"), b"").unwrap();
        fs::write(speaker.join("1.spec.pt"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let files = discover_wavs(dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        assert!(matches!(
            discover_wavs(Path::new("/no/such/dataset")),
            Err(PreprocessError::Io { .. })
        ));
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let files: Vec<PathBuf> = (0..20).map(|i| PathBuf::from(format!("{i}.wav"))).collect();
        let mut a = files.clone();
        let mut b = files.clone();
        shuffle_files(&mut a, Some(42));
        shuffle_files(&mut b, Some(42));
        assert_eq!(a, b);

        let mut sorted = a.clone();
        sorted.sort();
        let mut expected = files;
        expected.sort();
        assert_eq!(sorted, expected);
    }
}
