//! Live aggregation of per-worker completion signals

use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::cancel::CancellationToken;

/// Per-worker completed counts at the end of observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Signals received from each worker, by rank
    pub completed: Vec<usize>,
    /// Chunk size of each worker, by rank
    pub expected: Vec<usize>,
}

impl ProgressSnapshot {
    /// Signals received across all workers
    pub fn total_completed(&self) -> usize {
        self.completed.iter().sum()
    }

    /// Files across all chunks
    pub fn total_expected(&self) -> usize {
        self.expected.iter().sum()
    }

    /// Whether every file has been signalled
    pub fn is_complete(&self) -> bool {
        self.total_completed() >= self.total_expected()
    }
}

/// Polls worker channels on a fixed tick and renders one bar per worker
pub struct ProgressAggregator {
    interval: Duration,
    multi: MultiProgress,
    cancel: Option<CancellationToken>,
}

impl ProgressAggregator {
    /// Render to stderr
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            multi: MultiProgress::new(),
            cancel: None,
        }
    }

    /// Track progress without drawing anything
    pub fn hidden(interval: Duration) -> Self {
        Self {
            interval,
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            cancel: None,
        }
    }

    /// Stop observing once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Poll `channels` until every expected signal arrived, every channel
    /// disconnected, or the run was cancelled
    ///
    /// `channels[i]` belongs to the worker of rank `i`, which is expected to
    /// send `expected[i]` signals.
    pub fn observe(&self, channels: &[Receiver<()>], expected: &[usize]) -> ProgressSnapshot {
        let bar_style = ProgressStyle::with_template("{msg:>10} [{bar:30.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        let total_style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.green/white} {pos}/{len} files ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());

        let bars: Vec<ProgressBar> = expected
            .iter()
            .enumerate()
            .map(|(rank, &total)| {
                let bar = self.multi.add(ProgressBar::new(total as u64));
                bar.set_style(bar_style.clone());
                bar.set_message(format!("Worker {}", rank + 1));
                bar
            })
            .collect();
        let total_expected: usize = expected.iter().sum();
        let overall = self.multi.add(ProgressBar::new(total_expected as u64));
        overall.set_style(total_style);

        let mut completed = vec![0usize; channels.len()];
        let mut connected = vec![true; channels.len()];

        loop {
            for (rank, rx) in channels.iter().enumerate() {
                if !connected[rank] {
                    continue;
                }
                loop {
                    match rx.try_recv() {
                        Ok(()) => completed[rank] += 1,
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            connected[rank] = false;
                            break;
                        }
                    }
                }
                if let Some(bar) = bars.get(rank) {
                    bar.set_position(completed[rank] as u64);
                }
            }

            let done: usize = completed.iter().sum();
            overall.set_position(done as u64);

            let cancelled = self.cancel.as_ref().is_some_and(|c| c.is_cancelled());
            if done >= total_expected || connected.iter().all(|c| !c) || cancelled {
                break;
            }
            std::thread::sleep(self.interval);
        }

        for (rank, bar) in bars.iter().enumerate() {
            if completed.get(rank).copied().unwrap_or(0) >= expected[rank] {
                bar.finish();
            } else {
                bar.abandon();
            }
        }
        overall.finish();

        ProgressSnapshot {
            completed,
            expected: expected.to_vec(),
        }
    }
}
