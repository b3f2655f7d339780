//! Sequential per-chunk extraction loop

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info};

use super::cancel::CancellationToken;
use crate::config::RunSettings;
use crate::error::{PreprocessError, Result};
use crate::pipeline::{ArtifactCache, ExtractionResources, Pipeline, SourceAudio};

/// Sink for per-file completion signals
pub trait ReportChannel {
    /// Signal one completed file; delivery failures are ignored
    fn report(&self);
}

impl ReportChannel for Sender<()> {
    fn report(&self) {
        let _ = self.send(());
    }
}

/// Reports to a parent process as one `+` line per file on stdout
pub struct StdoutReporter;

impl ReportChannel for StdoutReporter {
    fn report(&self) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "+");
        let _ = out.flush();
    }
}

/// Counts for a finished chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Files processed
    pub files: usize,
    /// Artifacts computed and written
    pub written: usize,
    /// Artifacts skipped because they already existed
    pub cached: usize,
}

/// One worker bound to one rank and device
pub struct Worker {
    rank: usize,
    device_index: Option<usize>,
    settings: Arc<RunSettings>,
    pipeline: Pipeline,
    cancel: CancellationToken,
}

impl Worker {
    /// Worker for one rank; nothing is loaded until [`Worker::run`]
    pub fn new(
        rank: usize,
        device_index: Option<usize>,
        settings: Arc<RunSettings>,
        pipeline: Pipeline,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rank,
            device_index,
            settings,
            pipeline,
            cancel,
        }
    }

    /// Process `chunk` in order, signalling `report` once per file
    ///
    /// The first error abandons the rest of the chunk.
    pub fn run(&self, chunk: &[PathBuf], report: &dyn ReportChannel) -> Result<WorkerSummary> {
        if self.settings.fake_processing {
            return self.run_fake(chunk, report);
        }

        let resources = ExtractionResources::load(self.settings.clone(), self.device_index)?;
        info!(
            "Worker {} ready on {:?} ({} files)",
            self.rank,
            resources.device,
            chunk.len()
        );

        let mut summary = WorkerSummary::default();
        for path in chunk {
            if self.cancel.is_cancelled() {
                return Err(PreprocessError::Cancelled);
            }
            self.process_file(path, &resources, &mut summary)?;
            summary.files += 1;
            report.report();
        }

        debug!(
            "Worker {} done: {} files, {} written, {} cached",
            self.rank, summary.files, summary.written, summary.cached
        );
        Ok(summary)
    }

    fn process_file(
        &self,
        path: &Path,
        resources: &ExtractionResources,
        summary: &mut WorkerSummary,
    ) -> Result<()> {
        let mut audio: Option<SourceAudio> = None;

        for step in self.pipeline.steps() {
            let kinds = step.kinds();
            let missing = ArtifactCache::missing(path, kinds);
            summary.cached += kinds.len() - missing.len();
            if missing.is_empty() {
                continue;
            }

            // Decode at most once per file, and only if something is missing
            let source = match audio {
                Some(ref decoded) => decoded,
                None => &*audio.insert(SourceAudio::load(
                    path,
                    self.settings.model.data.sampling_rate,
                )?),
            };

            let artifacts = step
                .extract(source, resources, &missing)
                .map_err(|e| match e {
                    PreprocessError::Extraction(err) => PreprocessError::Extraction(
                        err.context(format!("{} failed on {}", step.name(), path.display())),
                    ),
                    other => other,
                })?;

            for (kind, bytes) in artifacts {
                if missing.contains(&kind) {
                    ArtifactCache::store(path, kind, &bytes)?;
                    summary.written += 1;
                }
            }
        }
        Ok(())
    }

    fn run_fake(&self, chunk: &[PathBuf], report: &dyn ReportChannel) -> Result<WorkerSummary> {
        let mut rng = rand::thread_rng();
        let mut summary = WorkerSummary::default();

        for path in chunk {
            if self.cancel.is_cancelled() {
                return Err(PreprocessError::Cancelled);
            }
            std::thread::sleep(self.settings.fake_delay.mul_f64(rng.gen::<f64>()));
            debug!("Worker {} (fake) {}", self.rank, path.display());
            summary.files += 1;
            report.report();
        }
        Ok(summary)
    }
}
