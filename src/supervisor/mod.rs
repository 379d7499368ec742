//! Transcoder process supervision.
//!
//! The supervisor owns every running transcoder. Each job gets a monitor task
//! that owns the child process, drains its output, handles stop requests with
//! graceful-then-forceful escalation, and reports exactly one
//! [`JobEvent::Exited`] when the process is gone.
//!
//! At most one job exists per stream: a slot is reserved in the job table
//! before spawning and released only after the process has been reaped.

mod command;
mod job;
mod readiness;

pub use command::{TranscodeCommand, TranscodeSettings};
pub use job::{ExitInfo, JobHandle, JobId, JobStatus, STDERR_TAIL_LINES};
pub use readiness::ManifestWatch;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use liveforged_common::{Error, Result, StreamId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How long the monitor waits for output pipes to close after the process
/// has been reaped. Grandchildren can hold them open.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Notification from the supervisor about a job.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// The transcoder produced its first playlist.
    Ready { stream_id: StreamId, job_id: JobId },
    /// The process exited and its slot has been released.
    Exited {
        stream_id: StreamId,
        job_id: JobId,
        exit: ExitInfo,
        stderr_tail: Vec<String>,
    },
}

impl JobEvent {
    pub fn stream_id(&self) -> &StreamId {
        match self {
            Self::Ready { stream_id, .. } | Self::Exited { stream_id, .. } => stream_id,
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            Self::Ready { job_id, .. } | Self::Exited { job_id, .. } => *job_id,
        }
    }
}

/// Result of stopping every job at service shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Jobs that exited within the deadline.
    pub stopped: usize,
    /// Jobs still running when the deadline passed; they were sent a kill.
    pub timed_out: usize,
}

enum Slot {
    Reserved,
    Live(JobHandle),
}

struct SupervisorInner {
    jobs: DashMap<StreamId, Slot>,
    events_tx: mpsc::UnboundedSender<JobEvent>,
    next_job_id: AtomicU64,
}

/// Starts, stops, and watches transcoder processes.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    /// Create a supervisor reporting job events on `events_tx`.
    pub fn new(events_tx: mpsc::UnboundedSender<JobEvent>) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                jobs: DashMap::new(),
                events_tx,
                next_job_id: AtomicU64::new(1),
            }),
        }
    }

    /// Create a supervisor together with the receiving end of its events.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Spawn the transcoder for `id`.
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// [`Error::DuplicateJob`] if the stream already has a job and with
    /// [`Error::Spawn`] if the executable cannot be launched. Spawn failures
    /// are never retried here.
    pub fn start(
        &self,
        id: &StreamId,
        output_dir: &Path,
        settings: &TranscodeSettings,
    ) -> Result<JobHandle> {
        match self.inner.jobs.entry(id.clone()) {
            Entry::Occupied(_) => return Err(Error::DuplicateJob(id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(Slot::Reserved);
            }
        }

        self.spawn_job(id, output_dir, settings).inspect_err(|_| {
            self.inner
                .jobs
                .remove_if(id, |_, slot| matches!(slot, Slot::Reserved));
        })
    }

    fn spawn_job(
        &self,
        id: &StreamId,
        output_dir: &Path,
        settings: &TranscodeSettings,
    ) -> Result<JobHandle> {
        let job_id = self.inner.next_job_id.fetch_add(1, Ordering::Relaxed);
        let cmd = settings.command(id, output_dir);
        debug!(stream_id = %id, job_id, "Transcoder args: {:?}", cmd.args);

        let (status_tx, status_rx) = watch::channel(JobStatus::Starting);
        let ready = Arc::new(AtomicBool::new(false));

        // Arm readiness before spawning so the first playlist write is seen.
        let watch_guard = {
            let events_tx = self.inner.events_tx.clone();
            let stream_id = id.clone();
            match ManifestWatch::start(&cmd.manifest_path, ready.clone(), move || {
                info!(stream_id = %stream_id, job_id, "Transcoder produced first playlist");
                let _ = events_tx.send(JobEvent::Ready {
                    stream_id: stream_id.clone(),
                    job_id,
                });
            }) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    warn!(stream_id = %id, "Readiness detection unavailable: {:#}", e);
                    None
                }
            }
        };

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .current_dir(output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::spawn(cmd.program_name(), e.to_string()))?;

        let pid = child.id();
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(drain_output(id.clone(), "stdout", stdout, None)));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(drain_output(
                id.clone(),
                "stderr",
                stderr,
                Some(stderr_tail.clone()),
            )));
        }

        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        let handle = JobHandle::new(
            job_id,
            id.clone(),
            output_dir.to_path_buf(),
            pid,
            status_rx,
            stop_tx,
            ready,
            stderr_tail,
        );
        let _ = status_tx.send(JobStatus::Running);

        info!(
            stream_id = %id,
            job_id,
            pid = ?pid,
            program = %cmd.program_name(),
            "Transcoder started"
        );

        // Publish the handle before the monitor can observe an exit, so the
        // monitor always finds its own slot to release.
        self.inner
            .jobs
            .insert(id.clone(), Slot::Live(handle.clone()));

        tokio::spawn(monitor(
            self.inner.clone(),
            handle.clone(),
            child,
            status_tx,
            stop_rx,
            drains,
            watch_guard,
        ));

        Ok(handle)
    }

    /// Stop a job and wait for it to exit.
    ///
    /// Sends SIGTERM, escalates to a kill after `grace`. Calling this on an
    /// exited job returns its exit immediately.
    pub async fn stop(&self, handle: &JobHandle, grace: Duration) -> ExitInfo {
        handle.request_stop(grace);
        handle.wait().await
    }

    /// Live job for a stream, if any.
    pub fn job(&self, id: &StreamId) -> Option<JobHandle> {
        self.inner.jobs.get(id).and_then(|slot| match slot.value() {
            Slot::Live(handle) => Some(handle.clone()),
            Slot::Reserved => None,
        })
    }

    /// All live jobs.
    pub fn live_jobs(&self) -> Vec<JobHandle> {
        self.inner
            .jobs
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Live(handle) => Some(handle.clone()),
                Slot::Reserved => None,
            })
            .collect()
    }

    /// Number of occupied job slots, including reservations.
    pub fn len(&self) -> usize {
        self.inner.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.jobs.is_empty()
    }

    /// Stop every live job concurrently.
    ///
    /// Waits at most `total` for all of them; anything still running then is
    /// killed without further waiting.
    pub async fn shutdown(&self, grace: Duration, total: Duration) -> ShutdownReport {
        let jobs = self.live_jobs();
        if jobs.is_empty() {
            return ShutdownReport::default();
        }

        info!(count = jobs.len(), "Stopping all transcoding jobs");
        for job in &jobs {
            job.request_stop(grace);
        }

        let all = join_all(jobs.iter().map(|job| job.wait()));
        match tokio::time::timeout(total, all).await {
            Ok(exits) => ShutdownReport {
                stopped: exits.len(),
                timed_out: 0,
            },
            Err(_) => {
                let remaining: Vec<_> = jobs.iter().filter(|job| job.is_running()).collect();
                for job in &remaining {
                    error!(
                        stream_id = %job.stream_id(),
                        job_id = job.job_id(),
                        "Job did not stop before shutdown deadline, killing"
                    );
                    job.request_stop(Duration::ZERO);
                }
                ShutdownReport {
                    stopped: jobs.len() - remaining.len(),
                    timed_out: remaining.len(),
                }
            }
        }
    }
}

async fn drain_output<R>(
    stream_id: StreamId,
    channel: &'static str,
    reader: R,
    tail: Option<Arc<Mutex<VecDeque<String>>>>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // Transcoders echo stream metadata verbatim, which need not be UTF-8.
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(|c: char| c == '\n' || c == '\r');
                debug!(
                    target: "liveforged::transcoder",
                    stream_id = %stream_id,
                    channel,
                    "{}",
                    line
                );
                if let Some(ref tail) = tail {
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.to_string());
                }
            }
            Err(e) => {
                debug!(stream_id = %stream_id, channel, "Output read failed: {}", e);
                break;
            }
        }
    }
}

async fn monitor(
    inner: Arc<SupervisorInner>,
    handle: JobHandle,
    mut child: Child,
    status_tx: watch::Sender<JobStatus>,
    mut stop_rx: mpsc::UnboundedReceiver<Duration>,
    drains: Vec<tokio::task::JoinHandle<()>>,
    watch_guard: Option<ManifestWatch>,
) {
    let stream_id = handle.stream_id().clone();
    let job_id = handle.job_id();
    let mut stop_requested = false;
    let mut kill_at: Option<Instant> = None;
    let mut killed = false;
    let mut stop_open = true;

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            request = stop_rx.recv(), if stop_open => {
                let Some(grace) = request else {
                    stop_open = false;
                    continue;
                };
                if !stop_requested {
                    stop_requested = true;
                    info!(stream_id = %stream_id, job_id, grace_ms = grace.as_millis() as u64, "Stopping transcoder");
                    terminate_gracefully(&mut child);
                }
                let deadline = Instant::now() + grace;
                kill_at = Some(kill_at.map_or(deadline, |at| at.min(deadline)));
            }
            _ = tokio::time::sleep_until(kill_at.unwrap_or_else(Instant::now)), if kill_at.is_some() && !killed => {
                warn!(stream_id = %stream_id, job_id, "Transcoder ignored SIGTERM, killing");
                killed = true;
                if let Err(e) = child.start_kill() {
                    warn!(stream_id = %stream_id, job_id, "Failed to kill transcoder: {}", e);
                }
            }
        }
    };

    let exit = match status {
        Ok(status) => ExitInfo::from_status(status, stop_requested),
        Err(e) => {
            error!(stream_id = %stream_id, job_id, "Failed to wait for transcoder: {}", e);
            ExitInfo {
                code: None,
                signal: None,
                stop_requested,
            }
        }
    };
    drop(watch_guard);

    let _ = status_tx.send(JobStatus::Exited(exit));
    inner.jobs.remove_if(&stream_id, |_, slot| {
        matches!(slot, Slot::Live(live) if live.job_id() == job_id)
    });

    for drain in drains {
        let abort = drain.abort_handle();
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            abort.abort();
        }
    }

    if exit.is_abnormal() {
        warn!(stream_id = %stream_id, job_id, %exit, "Transcoder exited abnormally");
    } else {
        info!(stream_id = %stream_id, job_id, %exit, "Transcoder exited");
    }

    let _ = inner.events_tx.send(JobEvent::Exited {
        stream_id,
        job_id,
        exit,
        stderr_tail: handle.stderr_tail(),
    });
}

#[cfg(unix)]
fn terminate_gracefully(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // No pid means the child was already reaped; the wait branch fires next.
    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(pid, "Failed to send SIGTERM: {}", e);
        }
    }
}

#[cfg(not(unix))]
fn terminate_gracefully(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!("Failed to stop transcoder: {}", e);
    }
}
