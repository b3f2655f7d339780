//! Child-process worker backend
//!
//! Each worker runs as a child process (normally this binary's hidden
//! `worker` subcommand). The parent writes the chunk to the child's stdin as
//! raw path bytes, each terminated by NUL, so any file name the filesystem
//! allows survives the trip. The child prints `+` per completed file and
//! finishes with `= <written> <cached>`.

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use super::partition::WorkerHandle;
use super::worker::WorkerSummary;
use crate::error::{PreprocessError, Result};

/// Line a child prints after each completed file
pub const PROGRESS_LINE: &str = "+";
/// Prefix of the child's final summary line
pub const SUMMARY_PREFIX: &str = "=";

/// Path separator on a child's stdin
const CHUNK_DELIMITER: u8 = b'\0';

/// Serialize a chunk for a child's stdin
fn encode_chunk(chunk: &[PathBuf]) -> Vec<u8> {
    let mut listing = Vec::new();
    for path in chunk {
        listing.extend_from_slice(&path_bytes(path));
        listing.push(CHUNK_DELIMITER);
    }
    listing
}

/// Read the chunk a parent wrote with the worker protocol
pub fn read_chunk<R: BufRead>(reader: R) -> io::Result<Vec<PathBuf>> {
    reader
        .split(CHUNK_DELIMITER)
        .filter(|entry| !matches!(entry, Ok(bytes) if bytes.is_empty()))
        .map(|entry| entry.map(path_from_bytes))
        .collect()
}

#[cfg(unix)]
fn path_bytes(path: &std::path::Path) -> std::borrow::Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    std::borrow::Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(OsString::from_vec(bytes))
}

// Paths produced by directory walks are valid Unicode on Windows in practice
#[cfg(not(unix))]
fn path_bytes(path: &std::path::Path) -> std::borrow::Cow<'_, [u8]> {
    std::borrow::Cow::Owned(path.to_string_lossy().into_owned().into_bytes())
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

/// Format the summary line a child prints before exiting
pub fn summary_line(summary: &WorkerSummary) -> String {
    format!("{SUMMARY_PREFIX} {} {}", summary.written, summary.cached)
}

fn parse_summary(line: &str) -> Option<(usize, usize)> {
    let mut fields = line.strip_prefix(SUMMARY_PREFIX)?.split_whitespace();
    let written = fields.next()?.parse().ok()?;
    let cached = fields.next()?.parse().ok()?;
    Some((written, cached))
}

/// How to launch a worker process
///
/// `--rank <R>` and, when bound to a device, `--device <D>` are appended to
/// the configured arguments.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessSpawner {
    /// Spawner for `program` with no extra arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Spawner for the running executable
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| PreprocessError::io("current executable", e))?;
        Ok(Self::new(exe))
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub(crate) fn spawn(&self, handle: &WorkerHandle, progress: Sender<()>) -> Result<ChildWorker> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--rank")
            .arg(handle.rank.to_string());
        if let Some(device) = handle.device_index {
            command.arg("--device").arg(device.to_string());
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = command
            .spawn()
            .map_err(|e| PreprocessError::io(&self.program, e))?;
        debug!("Spawned worker {} as pid {}", handle.rank, child.id());

        let rank = handle.rank;
        let failed = |reason: String| PreprocessError::WorkerFailed { rank, reason };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&encode_chunk(&handle.chunk)) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(failed(format!("failed to send chunk: {e}")));
            }
        }

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(failed("child stdout unavailable".to_string()));
        };

        let reader = std::thread::Builder::new()
            .name(format!("worker-{rank}-reader"))
            .spawn(move || read_signals(BufReader::new(stdout), &progress))
            .map_err(|e| failed(format!("failed to start reader thread: {e}")))?;

        Ok(ChildWorker {
            rank,
            child,
            reader,
        })
    }
}

/// Forward `+` lines as signals; return the file count and parsed summary
fn read_signals<R: BufRead>(reader: R, progress: &Sender<()>) -> (usize, Option<(usize, usize)>) {
    let mut files = 0;
    let mut summary = None;
    for line in reader.lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line == PROGRESS_LINE {
            files += 1;
            let _ = progress.send(());
        } else if let Some(parsed) = parse_summary(line) {
            summary = Some(parsed);
        } else if !line.is_empty() {
            debug!("Ignoring worker output: {}", line);
        }
    }
    (files, summary)
}

/// A running worker process
pub(crate) struct ChildWorker {
    rank: usize,
    child: Child,
    reader: JoinHandle<(usize, Option<(usize, usize)>)>,
}

impl ChildWorker {
    pub(crate) fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("Worker {} already exited: {}", self.rank, e);
        }
    }

    /// Wait for exit and turn the exit status and summary line into an outcome
    pub(crate) fn wait(mut self) -> Result<WorkerSummary> {
        let status = self
            .child
            .wait()
            .map_err(|e| PreprocessError::WorkerFailed {
                rank: self.rank,
                reason: format!("wait failed: {e}"),
            })?;
        let (files, summary) = self.reader.join().unwrap_or_else(|_| {
            warn!("Output reader for worker {} panicked", self.rank);
            (0, None)
        });

        if !status.success() {
            return Err(PreprocessError::WorkerFailed {
                rank: self.rank,
                reason: describe_exit(status),
            });
        }
        let (written, cached) = summary.ok_or_else(|| PreprocessError::WorkerFailed {
            rank: self.rank,
            reason: "exited without a summary".to_string(),
        })?;
        Ok(WorkerSummary {
            files,
            written,
            cached,
        })
    }
}

fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with status {code}"),
        None => "terminated by signal".to_string(),
    }
}
