//! Partition, spawn, observe, join

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{info, warn};

use super::cancel::CancellationToken;
use super::partition::{assign, WorkerHandle};
use super::process::{ChildWorker, ProcessSpawner};
use super::progress::{ProgressAggregator, ProgressSnapshot};
use super::worker::{Worker, WorkerSummary};
use crate::config::{FailurePolicy, RunSettings};
use crate::error::{PreprocessError, Result};
use crate::pipeline::Pipeline;

/// Builds the step list each worker runs
pub type PipelineFactory = Arc<dyn Fn(&RunSettings) -> Pipeline + Send + Sync>;

enum Backend {
    Threads,
    Processes(ProcessSpawner),
}

/// Resolution of one worker
#[derive(Debug)]
pub struct WorkerOutcome {
    /// Worker rank
    pub rank: usize,
    /// CUDA device the worker was bound to, `None` for CPU
    pub device_index: Option<usize>,
    /// Files in the worker's chunk
    pub expected: usize,
    /// Completion signals received from the worker
    pub reported: usize,
    /// Summary on success, or why the chunk was abandoned
    pub result: Result<WorkerSummary>,
}

/// Everything known about a finished dispatch
#[derive(Debug)]
pub struct DispatchReport {
    /// One outcome per worker, by rank
    pub outcomes: Vec<WorkerOutcome>,
    /// Final state of the progress aggregator
    pub progress: ProgressSnapshot,
}

impl DispatchReport {
    /// Outcomes whose worker did not complete its chunk
    pub fn failures(&self) -> impl Iterator<Item = &WorkerOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// Whether every worker completed its chunk
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Whether any worker stopped because of cancellation
    pub fn was_cancelled(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o.result, Err(PreprocessError::Cancelled)))
    }

    /// Artifacts written across all successful workers
    pub fn written(&self) -> usize {
        self.summaries().map(|s| s.written).sum()
    }

    /// Artifacts found on disk across all successful workers
    pub fn cached(&self) -> usize {
        self.summaries().map(|s| s.cached).sum()
    }

    fn summaries(&self) -> impl Iterator<Item = &WorkerSummary> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Apply `policy` to the outcomes
    ///
    /// Cancellation is always an error. Worker failures are an error only
    /// under [`FailurePolicy::Strict`], reported for the lowest failed rank.
    pub fn check(&self, policy: FailurePolicy) -> Result<()> {
        if self.was_cancelled() {
            return Err(PreprocessError::Cancelled);
        }
        let Some(failed) = self.failures().next() else {
            return Ok(());
        };
        match policy {
            FailurePolicy::AllowPartial => Ok(()),
            FailurePolicy::Strict => {
                let reason = match &failed.result {
                    // Already names the rank
                    Err(PreprocessError::WorkerFailed { reason, .. }) => reason.clone(),
                    Err(other) => other.to_string(),
                    Ok(_) => String::new(),
                };
                Err(PreprocessError::WorkerFailed {
                    rank: failed.rank,
                    reason,
                })
            }
        }
    }
}

/// Splits a file list over a fixed pool of workers and waits for all of them
pub struct Dispatcher {
    settings: Arc<RunSettings>,
    backend: Backend,
    pipeline: PipelineFactory,
    cancel: CancellationToken,
    show_progress: bool,
}

impl Dispatcher {
    /// Thread-backed dispatcher running the standard pipeline
    pub fn new(settings: RunSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            backend: Backend::Threads,
            pipeline: Arc::new(Pipeline::for_settings),
            cancel: CancellationToken::new(),
            show_progress: true,
        }
    }

    /// Run each worker as a child process
    pub fn with_processes(mut self, spawner: ProcessSpawner) -> Self {
        self.backend = Backend::Processes(spawner);
        self
    }

    /// Replace the step list of thread workers
    pub fn with_pipeline<F>(mut self, factory: F) -> Self
    where
        F: Fn(&RunSettings) -> Pipeline + Send + Sync + 'static,
    {
        self.pipeline = Arc::new(factory);
        self
    }

    /// Do not draw progress bars
    pub fn hidden_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Token that stops this dispatcher's workers when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Settings every worker receives
    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Partition `files` over `worker_count` workers and block until every
    /// worker has resolved
    ///
    /// A failing worker only ends its own chunk; the report carries every
    /// worker's outcome.
    pub fn dispatch(&self, files: &[PathBuf], worker_count: usize) -> Result<DispatchReport> {
        if files.is_empty() {
            return Err(PreprocessError::InvalidPartition("no input files".to_string()));
        }
        let workers = NonZeroUsize::new(worker_count).ok_or_else(|| {
            PreprocessError::InvalidPartition("worker count must be at least 1".to_string())
        })?;

        let handles = assign(files, workers, self.settings.device_count);
        info!(
            "Dispatching {} files over {} workers ({} devices)",
            files.len(),
            workers,
            self.settings.device_count
        );

        match &self.backend {
            Backend::Threads => self.dispatch_threads(handles),
            Backend::Processes(spawner) => self.dispatch_processes(spawner, handles),
        }
    }

    fn aggregator(&self) -> ProgressAggregator {
        let interval = self.settings.poll_interval;
        let aggregator = if self.show_progress {
            ProgressAggregator::new(interval)
        } else {
            ProgressAggregator::hidden(interval)
        };
        aggregator.with_cancellation(self.cancel.clone())
    }

    fn dispatch_threads(&self, handles: Vec<WorkerHandle>) -> Result<DispatchReport> {
        let expected: Vec<usize> = handles.iter().map(|h| h.chunk.len()).collect();
        let mut channels: Vec<Receiver<()>> = Vec::with_capacity(handles.len());
        let mut running: Vec<(usize, Option<usize>, Result<JoinHandle<Result<WorkerSummary>>>)> =
            Vec::with_capacity(handles.len());

        for handle in handles {
            let (tx, rx) = mpsc::channel();
            channels.push(rx);

            let worker = Worker::new(
                handle.rank,
                handle.device_index,
                self.settings.clone(),
                (self.pipeline)(&self.settings),
                self.cancel.clone(),
            );
            let chunk = handle.chunk;
            let spawned = std::thread::Builder::new()
                .name(format!("worker-{}", handle.rank))
                .spawn(move || worker.run(&chunk, &tx))
                .map_err(|e| PreprocessError::WorkerFailed {
                    rank: handle.rank,
                    reason: format!("failed to start thread: {e}"),
                });
            running.push((handle.rank, handle.device_index, spawned));
        }

        let progress = self.aggregator().observe(&channels, &expected);

        let outcomes = running
            .into_iter()
            .map(|(rank, device_index, spawned)| {
                let result = spawned.and_then(|join| {
                    join.join().unwrap_or_else(|_| {
                        Err(PreprocessError::WorkerFailed {
                            rank,
                            reason: "worker panicked".to_string(),
                        })
                    })
                });
                self.outcome(rank, device_index, &expected, &progress, result)
            })
            .collect();

        Ok(DispatchReport { outcomes, progress })
    }

    fn dispatch_processes(
        &self,
        spawner: &ProcessSpawner,
        handles: Vec<WorkerHandle>,
    ) -> Result<DispatchReport> {
        let expected: Vec<usize> = handles.iter().map(|h| h.chunk.len()).collect();
        let mut channels: Vec<Receiver<()>> = Vec::with_capacity(handles.len());
        let mut running: Vec<(usize, Option<usize>, Result<ChildWorker>)> =
            Vec::with_capacity(handles.len());

        for handle in &handles {
            let (tx, rx) = mpsc::channel();
            channels.push(rx);
            running.push((handle.rank, handle.device_index, spawner.spawn(handle, tx)));
        }

        let progress = self.aggregator().observe(&channels, &expected);

        if self.cancel.is_cancelled() {
            warn!("Run cancelled, stopping worker processes");
            for (_, _, child) in running.iter_mut() {
                if let Ok(child) = child {
                    child.kill();
                }
            }
        }

        let outcomes = running
            .into_iter()
            .map(|(rank, device_index, child)| {
                let result = child.and_then(ChildWorker::wait).map_err(|e| {
                    if self.cancel.is_cancelled() {
                        PreprocessError::Cancelled
                    } else {
                        e
                    }
                });
                self.outcome(rank, device_index, &expected, &progress, result)
            })
            .collect();

        Ok(DispatchReport { outcomes, progress })
    }

    fn outcome(
        &self,
        rank: usize,
        device_index: Option<usize>,
        expected: &[usize],
        progress: &ProgressSnapshot,
        result: Result<WorkerSummary>,
    ) -> WorkerOutcome {
        match &result {
            Ok(summary) => info!(
                "Worker {} finished: {} files, {} written, {} cached",
                rank, summary.files, summary.written, summary.cached
            ),
            Err(e) => warn!("Worker {} failed: {}", rank, e),
        }
        WorkerOutcome {
            rank,
            device_index,
            expected: expected[rank],
            reported: progress.completed[rank],
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(failure: PreprocessError) -> DispatchReport {
        DispatchReport {
            outcomes: vec![
                WorkerOutcome {
                    rank: 0,
                    device_index: None,
                    expected: 2,
                    reported: 2,
                    result: Ok(WorkerSummary {
                        files: 2,
                        written: 6,
                        cached: 0,
                    }),
                },
                WorkerOutcome {
                    rank: 1,
                    device_index: None,
                    expected: 2,
                    reported: 0,
                    result: Err(failure),
                },
            ],
            progress: ProgressSnapshot {
                completed: vec![2, 0],
                expected: vec![2, 2],
            },
        }
    }

    #[test]
    fn test_strict_check_names_rank_once() {
        let failed = report(PreprocessError::WorkerFailed {
            rank: 1,
            reason: "exited with status 1".to_string(),
        });
        let err = failed.check(FailurePolicy::Strict).unwrap_err();
        assert_eq!(err.to_string(), "worker 1 failed: exited with status 1");
        assert!(failed.check(FailurePolicy::AllowPartial).is_ok());
    }

    #[test]
    fn test_strict_check_wraps_other_errors() {
        let failed = report(PreprocessError::InvalidPartition("boom".to_string()));
        let err = failed.check(FailurePolicy::Strict).unwrap_err();
        assert!(matches!(err, PreprocessError::WorkerFailed { rank: 1, .. }));
        assert!(err.to_string().contains("boom"));
    }
}
