//! Artifact naming and the on-disk idempotency gate
//!
//! Every derived feature lives next to its source file. Presence of the
//! artifact path is the only completion marker, so writes go to a hidden
//! sibling first and are renamed into place.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PreprocessError, Result};

/// Kinds of derived feature files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    /// Content units (`.soft.pt`)
    Embedding,
    /// F0 and voicing (`.f0.npy`)
    Pitch,
    /// Linear magnitude spectrogram (`.spec.pt`)
    Spectrogram,
    /// Frame-wise loudness (`.vol.npy`)
    Loudness,
    /// Vocoder mel (`.mel.npy`)
    Mel,
    /// Key- and volume-shifted mel (`.aug_mel.npy`)
    AugmentedMel,
    /// Volume-shifted loudness (`.aug_vol.npy`)
    AugmentedLoudness,
}

impl ArtifactKind {
    /// Every kind, in pipeline order
    pub const ALL: [ArtifactKind; 7] = [
        ArtifactKind::Embedding,
        ArtifactKind::Pitch,
        ArtifactKind::Spectrogram,
        ArtifactKind::Loudness,
        ArtifactKind::Mel,
        ArtifactKind::AugmentedMel,
        ArtifactKind::AugmentedLoudness,
    ];

    /// Suffix appended to the source path
    pub fn suffix(self) -> &'static str {
        match self {
            ArtifactKind::Embedding => ".soft.pt",
            ArtifactKind::Pitch => ".f0.npy",
            ArtifactKind::Spectrogram => ".spec.pt",
            ArtifactKind::Loudness => ".vol.npy",
            ArtifactKind::Mel => ".mel.npy",
            ArtifactKind::AugmentedMel => ".aug_mel.npy",
            ArtifactKind::AugmentedLoudness => ".aug_vol.npy",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactKind::Embedding => "embedding",
            ArtifactKind::Pitch => "pitch",
            ArtifactKind::Spectrogram => "spectrogram",
            ArtifactKind::Loudness => "loudness",
            ArtifactKind::Mel => "mel",
            ArtifactKind::AugmentedMel => "augmented mel",
            ArtifactKind::AugmentedLoudness => "augmented loudness",
        };
        f.write_str(name)
    }
}

/// Filesystem-backed artifact store keyed by `(source, kind)`
pub struct ArtifactCache;

impl ArtifactCache {
    /// Artifact path for `source`
    ///
    /// Spectrograms replace a trailing `.wav` rather than appending to it.
    pub fn path(source: &Path, kind: ArtifactKind) -> PathBuf {
        if kind == ArtifactKind::Spectrogram {
            let is_wav = source
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
            if is_wav {
                return source.with_extension("spec.pt");
            }
        }

        let mut name = OsString::from(source.as_os_str());
        name.push(kind.suffix());
        PathBuf::from(name)
    }

    /// Whether the artifact already exists
    pub fn contains(source: &Path, kind: ArtifactKind) -> bool {
        Self::path(source, kind).is_file()
    }

    /// The subset of `kinds` not yet on disk, order preserved
    pub fn missing(source: &Path, kinds: &[ArtifactKind]) -> Vec<ArtifactKind> {
        kinds
            .iter()
            .copied()
            .filter(|kind| !Self::contains(source, *kind))
            .collect()
    }

    /// Persist an artifact atomically and return its final path
    pub fn store(source: &Path, kind: ArtifactKind, bytes: &[u8]) -> Result<PathBuf> {
        let target = Self::path(source, kind);
        let partial = partial_path(&target);

        fs::write(&partial, bytes).map_err(|e| PreprocessError::io(&partial, e))?;
        if let Err(e) = fs::rename(&partial, &target) {
            let _ = fs::remove_file(&partial);
            return Err(PreprocessError::io(&target, e));
        }
        Ok(target)
    }
}

/// Hidden sibling used while an artifact is being written
fn partial_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    if let Some(file_name) = target.file_name() {
        name.push(file_name);
    }
    name.push(".partial");
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_paths() {
        let source = Path::new("dataset/44k/spk/a.wav");
        assert_eq!(
            ArtifactCache::path(source, ArtifactKind::Embedding),
            PathBuf::from("dataset/44k/spk/a.wav.soft.pt")
        );
        assert_eq!(
            ArtifactCache::path(source, ArtifactKind::Pitch),
            PathBuf::from("dataset/44k/spk/a.wav.f0.npy")
        );
        assert_eq!(
            ArtifactCache::path(source, ArtifactKind::Spectrogram),
            PathBuf::from("dataset/44k/spk/a.spec.pt")
        );
        assert_eq!(
            ArtifactCache::path(source, ArtifactKind::AugmentedLoudness),
            PathBuf::from("dataset/44k/spk/a.wav.aug_vol.npy")
        );
    }

    #[test]
    fn test_spectrogram_path_without_wav_extension() {
        assert_eq!(
            ArtifactCache::path(Path::new("clips/b.flac"), ArtifactKind::Spectrogram),
            PathBuf::from("clips/b.flac.spec.pt")
        );
    }

    #[test]
    fn test_store_makes_artifact_visible() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.wav");

        assert_eq!(
            ArtifactCache::missing(&source, &[ArtifactKind::Pitch, ArtifactKind::Loudness]),
            vec![ArtifactKind::Pitch, ArtifactKind::Loudness]
        );

        let stored = ArtifactCache::store(&source, ArtifactKind::Loudness, b"vol").unwrap();
        assert_eq!(fs::read(&stored).unwrap(), b"vol");
        assert!(ArtifactCache::contains(&source, ArtifactKind::Loudness));
        assert_eq!(
            ArtifactCache::missing(&source, &[ArtifactKind::Pitch, ArtifactKind::Loudness]),
            vec![ArtifactKind::Pitch]
        );

        // No temporary file left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_store_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("nope").join("a.wav");
        let err = ArtifactCache::store(&source, ArtifactKind::Pitch, b"x").unwrap_err();
        assert!(matches!(err, PreprocessError::Io { .. }));
    }
}
