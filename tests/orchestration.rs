//! Integration tests for dispatching a dataset over workers
//!
//! Uses the thread backend with hidden progress and small WAV fixtures
//! synthesized on the fly.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use voxprep::config::{DataConfig, VocoderConfig};
use voxprep::pipeline::{LoudnessStep, PitchStep};
use voxprep::{
    ArtifactCache, ArtifactKind, Dispatcher, FailurePolicy, Pipeline, PreprocessError, RunSettings,
};

fn write_tone(path: &Path, sample_rate: u32, freq: f32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..sample_rate / 2 {
        let t = i as f32 / sample_rate as f32;
        let s = (2.0 * std::f32::consts::PI * freq * t).sin() * 0.3;
        writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn dataset(dir: &Path, count: usize) -> Vec<PathBuf> {
    let speaker = dir.join("speaker");
    fs::create_dir_all(&speaker).unwrap();
    (0..count)
        .map(|i| {
            let path = speaker.join(format!("{i:03}.wav"));
            write_tone(&path, 16000, 150.0 + 10.0 * i as f32);
            path
        })
        .collect()
}

fn small_settings() -> RunSettings {
    let mut settings = RunSettings {
        poll_interval: Duration::from_millis(10),
        ..RunSettings::default()
    };
    settings.model.data = DataConfig {
        sampling_rate: 16000,
        hop_length: 160,
        filter_length: 512,
        win_length: 512,
    };
    settings.model.model.speech_encoder = "vec256l9".to_string();
    settings.diffusion.vocoder = VocoderConfig {
        sampling_rate: 16000,
        n_fft: 512,
        win_length: 512,
        hop_length: 160,
        n_mels: 40,
        fmin: 40.0,
        fmax: 8000.0,
        ..VocoderConfig::default()
    };
    settings
}

fn fake_settings() -> RunSettings {
    RunSettings {
        fake_processing: true,
        fake_delay: Duration::from_millis(5),
        ..small_settings()
    }
}

fn light_pipeline(_: &RunSettings) -> Pipeline {
    Pipeline::new(vec![Box::new(PitchStep), Box::new(LoudnessStep)])
}

fn file_count(dir: &Path) -> usize {
    walk(dir).len()
}

fn walk(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            out.extend(walk(&path));
        } else {
            out.push(path);
        }
    }
    out
}

#[test]
fn test_fake_mode_parity() {
    let dir = tempfile::tempdir().unwrap();
    let files = dataset(dir.path(), 10);

    let report = Dispatcher::new(fake_settings())
        .hidden_progress()
        .dispatch(&files, 3)
        .unwrap();

    let mut sizes: Vec<usize> = report.outcomes.iter().map(|o| o.expected).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![3, 3, 4]);
    assert_eq!(report.progress.total_completed(), 10);
    assert!(report.is_success());
    assert_eq!(report.written(), 0);
    // Only the source files themselves
    assert_eq!(file_count(dir.path()), 10);
}

#[test]
fn test_second_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let files = dataset(dir.path(), 5);
    let settings = RunSettings {
        use_diff: true,
        ..small_settings()
    };

    let first = Dispatcher::new(settings.clone())
        .hidden_progress()
        .dispatch(&files, 2)
        .unwrap();
    first.check(FailurePolicy::Strict).unwrap();
    assert_eq!(first.written(), 5 * ArtifactKind::ALL.len());
    for file in &files {
        for kind in ArtifactKind::ALL {
            assert!(ArtifactCache::contains(file, kind), "{kind} missing for {file:?}");
        }
    }

    let second = Dispatcher::new(settings)
        .hidden_progress()
        .dispatch(&files, 3)
        .unwrap();
    second.check(FailurePolicy::Strict).unwrap();
    assert_eq!(second.written(), 0);
    assert_eq!(second.cached(), 5 * ArtifactKind::ALL.len());
    assert_eq!(second.progress.total_completed(), 5);
}

#[test]
fn test_default_pipeline_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let files = dataset(dir.path(), 2);

    let report = Dispatcher::new(small_settings())
        .hidden_progress()
        .dispatch(&files, 1)
        .unwrap();
    report.check(FailurePolicy::Strict).unwrap();

    for file in &files {
        assert!(ArtifactCache::contains(file, ArtifactKind::Embedding));
        assert!(ArtifactCache::contains(file, ArtifactKind::Pitch));
        assert!(ArtifactCache::contains(file, ArtifactKind::Spectrogram));
        assert!(!ArtifactCache::contains(file, ArtifactKind::Loudness));
        assert!(!ArtifactCache::contains(file, ArtifactKind::Mel));
    }
}

#[test]
fn test_failure_is_isolated_to_one_worker() {
    let dir = tempfile::tempdir().unwrap();
    let files = dataset(dir.path(), 12);
    // Worker 2 owns files 6..9; break the middle one
    fs::write(&files[7], b"not a wav file").unwrap();

    let report = Dispatcher::new(small_settings())
        .with_pipeline(light_pipeline)
        .hidden_progress()
        .dispatch(&files, 4)
        .unwrap();

    let failed: Vec<usize> = report.failures().map(|o| o.rank).collect();
    assert_eq!(failed, vec![2]);
    for outcome in &report.outcomes {
        if outcome.rank == 2 {
            assert!(matches!(outcome.result, Err(PreprocessError::Decode { .. })));
            assert_eq!(outcome.reported, 1);
        } else {
            assert_eq!(outcome.reported, outcome.expected);
            assert_eq!(outcome.result.as_ref().unwrap().written, 6);
        }
    }

    assert!(ArtifactCache::contains(&files[6], ArtifactKind::Pitch));
    assert!(!ArtifactCache::contains(&files[8], ArtifactKind::Pitch));
    assert!(ArtifactCache::contains(&files[11], ArtifactKind::Pitch));

    assert!(matches!(
        report.check(FailurePolicy::Strict),
        Err(PreprocessError::WorkerFailed { rank: 2, .. })
    ));
    assert!(report.check(FailurePolicy::AllowPartial).is_ok());
}

#[test]
fn test_foreign_rate_file_is_resampled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("other_rate.wav");
    write_tone(&path, 22050, 200.0);

    let report = Dispatcher::new(small_settings())
        .hidden_progress()
        .dispatch(std::slice::from_ref(&path), 1)
        .unwrap();
    report.check(FailurePolicy::Strict).unwrap();

    // Half a second at 16 kHz, hop 160
    let spec = fs::read(ArtifactCache::path(&path, ArtifactKind::Spectrogram)).unwrap();
    let tensors = voxprep::codec::decode_tensors(&spec, &candle_core::Device::Cpu).unwrap();
    assert_eq!(tensors["spec"].dims(), &[257, 50]);
    assert!(ArtifactCache::contains(&path, ArtifactKind::Pitch));
}

#[test]
fn test_progress_counts_every_file() {
    let dir = tempfile::tempdir().unwrap();
    let files = dataset(dir.path(), 7);

    let report = Dispatcher::new(small_settings())
        .with_pipeline(light_pipeline)
        .hidden_progress()
        .dispatch(&files, 3)
        .unwrap();

    assert_eq!(report.progress.total_completed(), files.len());
    assert_eq!(report.progress.total_expected(), files.len());
    for outcome in &report.outcomes {
        assert_eq!(outcome.result.as_ref().unwrap().files, outcome.reported);
    }
}

#[test]
fn test_devices_assigned_round_robin() {
    let dir = tempfile::tempdir().unwrap();
    let files = dataset(dir.path(), 8);
    let settings = RunSettings {
        device_count: 2,
        ..fake_settings()
    };

    let report = Dispatcher::new(settings)
        .hidden_progress()
        .dispatch(&files, 4)
        .unwrap();

    let devices: Vec<Option<usize>> = report.outcomes.iter().map(|o| o.device_index).collect();
    assert_eq!(devices, vec![Some(0), Some(1), Some(0), Some(1)]);
}

#[test]
fn test_cancellation_stops_workers() {
    let files: Vec<PathBuf> = (0..40).map(|i| PathBuf::from(format!("{i}.wav"))).collect();
    let settings = RunSettings {
        fake_delay: Duration::from_millis(100),
        ..fake_settings()
    };

    let dispatcher = Dispatcher::new(settings).hidden_progress();
    let token = dispatcher.cancellation_token();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        token.cancel();
    });

    let report = dispatcher.dispatch(&files, 2).unwrap();
    assert!(report.was_cancelled());
    assert!(report.progress.total_completed() < files.len());
    assert!(matches!(
        report.check(FailurePolicy::AllowPartial),
        Err(PreprocessError::Cancelled)
    ));
}

#[test]
fn test_invalid_partitions_are_rejected() {
    let dispatcher = Dispatcher::new(fake_settings()).hidden_progress();
    assert!(matches!(
        dispatcher.dispatch(&[], 2),
        Err(PreprocessError::InvalidPartition(_))
    ));
    assert!(matches!(
        dispatcher.dispatch(&[PathBuf::from("a.wav")], 0),
        Err(PreprocessError::InvalidPartition(_))
    ));
}
