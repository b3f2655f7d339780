//! Parallel batch orchestration
//!
//! The [`Dispatcher`] splits the file list into one contiguous chunk per
//! worker and assigns devices round-robin by rank. Each [`Worker`] runs its
//! chunk sequentially and sends one `()` per finished file on its own
//! unbounded channel. The [`ProgressAggregator`] drains those channels on a
//! fixed tick from the dispatching thread.

mod cancel;
mod dispatcher;
mod partition;
mod process;
mod progress;
mod worker;

pub use cancel::CancellationToken;
pub use dispatcher::{DispatchReport, Dispatcher, PipelineFactory, WorkerOutcome};
pub use partition::{assign, device_index, partition, WorkerHandle};
pub use process::{read_chunk, summary_line, ProcessSpawner, PROGRESS_LINE, SUMMARY_PREFIX};
pub use progress::{ProgressAggregator, ProgressSnapshot};
pub use worker::{ReportChannel, StdoutReporter, Worker, WorkerSummary};
