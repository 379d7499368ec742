//! Handles to running transcoder processes.

use liveforged_common::StreamId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Number of stderr lines kept per job for failure diagnostics.
pub const STDERR_TAIL_LINES: usize = 20;

/// Process-wide unique job number.
pub type JobId = u64;

/// How a transcoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed by one (unix only).
    pub signal: Option<i32>,
    /// Whether the supervisor asked the process to stop.
    pub stop_requested: bool,
}

impl ExitInfo {
    pub fn from_status(status: ExitStatus, stop_requested: bool) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            stop_requested,
        }
    }

    /// Exit code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The process ended on its own with a failure status.
    ///
    /// ffmpeg exits with 255 when it handles SIGTERM, so any exit following a
    /// stop request counts as expected.
    pub fn is_abnormal(&self) -> bool {
        !self.stop_requested && !self.success()
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Lifecycle of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobStatus {
    /// Set while the process is being spawned. Internal to the supervisor:
    /// `Supervisor::start` only returns handles that are already `Running`.
    Starting,
    Running,
    Exited(ExitInfo),
}

impl JobStatus {
    pub fn is_exited(&self) -> bool {
        matches!(self, Self::Exited(_))
    }
}

/// Shared reference to a supervised transcoder process.
///
/// Cloning is cheap. The supervisor's monitor task owns the process itself;
/// a handle can only observe it and ask it to stop.
#[derive(Debug, Clone)]
pub struct JobHandle {
    inner: Arc<JobInner>,
}

#[derive(Debug)]
struct JobInner {
    job_id: JobId,
    stream_id: StreamId,
    output_dir: PathBuf,
    pid: Option<u32>,
    status: watch::Receiver<JobStatus>,
    stop_tx: mpsc::UnboundedSender<Duration>,
    ready: Arc<AtomicBool>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

impl JobHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        job_id: JobId,
        stream_id: StreamId,
        output_dir: PathBuf,
        pid: Option<u32>,
        status: watch::Receiver<JobStatus>,
        stop_tx: mpsc::UnboundedSender<Duration>,
        ready: Arc<AtomicBool>,
        stderr_tail: Arc<Mutex<VecDeque<String>>>,
    ) -> Self {
        Self {
            inner: Arc::new(JobInner {
                job_id,
                stream_id,
                output_dir,
                pid,
                status,
                stop_tx,
                ready,
                stderr_tail,
            }),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.inner.job_id
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.inner.stream_id
    }

    /// Directory the process writes into.
    pub fn output_dir(&self) -> &Path {
        &self.inner.output_dir
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    pub fn status(&self) -> JobStatus {
        *self.inner.status.borrow()
    }

    pub fn is_running(&self) -> bool {
        !self.status().is_exited()
    }

    /// Whether the transcoder has written its first playlist.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Last lines the process wrote to stderr.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.inner.stderr_tail.lock().iter().cloned().collect()
    }

    /// Ask the process to terminate: SIGTERM now, kill after `grace`.
    ///
    /// Repeated requests can only shorten the deadline. Requests against an
    /// exited job are dropped.
    pub fn request_stop(&self, grace: Duration) {
        let _ = self.inner.stop_tx.send(grace);
    }

    /// Wait until the process has exited and been reaped.
    pub async fn wait(&self) -> ExitInfo {
        let mut rx = self.inner.status.clone();
        loop {
            if let JobStatus::Exited(info) = *rx.borrow_and_update() {
                return info;
            }
            if rx.changed().await.is_err() {
                // The monitor always publishes Exited before it goes away.
                return match *rx.borrow() {
                    JobStatus::Exited(info) => info,
                    _ => ExitInfo {
                        code: None,
                        signal: None,
                        stop_requested: false,
                    },
                };
            }
        }
    }
}
