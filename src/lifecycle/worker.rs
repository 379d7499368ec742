//! Per-stream worker.
//!
//! A worker owns the [`StreamRecord`] of one identifier and applies its
//! events strictly in arrival order. It never blocks on the filesystem:
//! directory preparation runs on the blocking pool and reports back on a
//! private channel, so an `Unpublish` that arrives meanwhile can cancel the
//! start.

use chrono::Utc;
use liveforged_common::{Error, Result, StreamId};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::ControllerSettings;
use crate::registry::{transition, Action, LifecycleEvent, Registry, StreamRecord, StreamState};
use crate::storage::DirectoryManager;
use crate::supervisor::{ExitInfo, JobEvent, JobId, Supervisor};

/// Message routed to a worker by the dispatcher.
#[derive(Debug)]
pub(super) enum WorkerMsg {
    Publish,
    Unpublish,
    Job(JobEvent),
    Shutdown,
}

impl WorkerMsg {
    pub(super) fn kind(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Unpublish => "unpublish",
            Self::Job(JobEvent::Ready { .. }) => "job ready",
            Self::Job(JobEvent::Exited { .. }) => "job exit",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Sent whenever a worker settles in `Idle` with nothing in flight.
#[derive(Debug)]
pub(super) struct IdleNotice {
    pub id: StreamId,
    /// Dispatcher messages handled so far.
    pub processed: u64,
}

/// Shared dependencies of all workers.
pub(super) struct WorkerContext {
    pub settings: ControllerSettings,
    pub supervisor: Supervisor,
    pub directories: Arc<DirectoryManager>,
    pub registry: Registry,
}

pub(super) struct StreamWorker {
    ctx: Arc<WorkerContext>,
    record: StreamRecord,
    rx: mpsc::UnboundedReceiver<WorkerMsg>,
    prepared_tx: mpsc::UnboundedSender<Result<PathBuf>>,
    prepared_rx: mpsc::UnboundedReceiver<Result<PathBuf>>,
    notices: mpsc::UnboundedSender<IdleNotice>,
    processed: u64,
    reported: u64,
    prepare_in_flight: bool,
    shutting_down: bool,
}

impl StreamWorker {
    pub(super) fn new(
        ctx: Arc<WorkerContext>,
        id: StreamId,
        rx: mpsc::UnboundedReceiver<WorkerMsg>,
        notices: mpsc::UnboundedSender<IdleNotice>,
    ) -> Self {
        // A retired worker always leaves an Idle record behind.
        let record = match ctx.registry.get(&id) {
            Some(record) if record.state == StreamState::Idle => record,
            _ => {
                let output_dir = ctx.directories.path_for(&id);
                StreamRecord::new(id, output_dir)
            }
        };
        let (prepared_tx, prepared_rx) = mpsc::unbounded_channel();

        Self {
            ctx,
            record,
            rx,
            prepared_tx,
            prepared_rx,
            notices,
            processed: 0,
            reported: 0,
            prepare_in_flight: false,
            shutting_down: false,
        }
    }

    pub(super) async fn run(mut self) {
        let mut open = true;

        loop {
            if self.is_settled() {
                if !open {
                    break;
                }
                if self.processed != self.reported {
                    self.reported = self.processed;
                    let _ = self.notices.send(IdleNotice {
                        id: self.record.id.clone(),
                        processed: self.processed,
                    });
                }
            }

            tokio::select! {
                biased;

                msg = self.rx.recv(), if open => match msg {
                    Some(msg) => {
                        self.processed += 1;
                        self.handle(msg).await;
                    }
                    None => {
                        open = false;
                        self.on_closed().await;
                    }
                },
                Some(result) = self.prepared_rx.recv() => self.on_prepared(result).await,
            }
        }

        debug!(stream_id = %self.record.id, "Stream worker finished");
    }

    fn is_settled(&self) -> bool {
        self.record.state == StreamState::Idle && !self.prepare_in_flight
    }

    async fn handle(&mut self, msg: WorkerMsg) {
        match msg {
            WorkerMsg::Publish => self.on_publish(),
            WorkerMsg::Unpublish => self.on_unpublish(),
            WorkerMsg::Job(JobEvent::Ready { job_id, .. }) => self.on_ready(job_id),
            WorkerMsg::Job(JobEvent::Exited {
                job_id,
                exit,
                stderr_tail,
                ..
            }) => self.on_exited(job_id, exit, stderr_tail).await,
            WorkerMsg::Shutdown => self.on_shutdown(),
        }
        self.publish_snapshot();
    }

    fn apply(&mut self, event: LifecycleEvent) -> Action {
        let from = self.record.state;
        let (to, action) = transition(from, event);
        self.record.state = to;
        self.record.last_event_at = Utc::now();
        if from != to {
            debug!(
                stream_id = %self.record.id,
                %from,
                %to,
                ?event,
                "Stream state changed"
            );
        }
        action
    }

    fn publish_snapshot(&self) {
        self.ctx.registry.put(self.record.clone());
    }

    fn on_publish(&mut self) {
        if self.shutting_down {
            warn!(stream_id = %self.record.id, "Ignoring publish during shutdown");
            return;
        }

        match self.apply(LifecycleEvent::Publish) {
            Action::PrepareDirectory => {
                self.record.attempt += 1;
                self.record.last_error = None;
                info!(
                    stream_id = %self.record.id,
                    attempt = self.record.attempt,
                    "Stream published"
                );
                self.spawn_prepare();
            }
            Action::IgnoreDuplicate => {
                debug!(
                    stream_id = %self.record.id,
                    state = %self.record.state,
                    "Ignoring duplicate publish"
                );
            }
            _ => {}
        }
    }

    /// Prepare the output directory off the worker.
    ///
    /// Only one preparation runs at a time. A publish that arrives while an
    /// earlier, cancelled preparation is still running adopts its result; the
    /// directory is the same for every attempt.
    fn spawn_prepare(&mut self) {
        if self.prepare_in_flight {
            return;
        }
        self.prepare_in_flight = true;

        let directories = self.ctx.directories.clone();
        let id = self.record.id.clone();
        let tx = self.prepared_tx.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || directories.prepare(&id))
                .await
                .unwrap_or_else(|e| Err(Error::internal(format!("directory task failed: {}", e))));
            let _ = tx.send(result);
        });
    }

    async fn on_prepared(&mut self, result: Result<PathBuf>) {
        self.prepare_in_flight = false;

        if self.record.state != StreamState::Publishing {
            debug!(
                stream_id = %self.record.id,
                state = %self.record.state,
                "Discarding directory preparation for cancelled start"
            );
            if result.is_ok() && self.record.state == StreamState::Idle {
                self.remove_output(self.ctx.settings.retain_segments).await;
            }
            return;
        }

        match result {
            Ok(dir) => {
                if self.apply(LifecycleEvent::DirectoryReady) == Action::StartJob {
                    self.start_job(dir).await;
                }
            }
            Err(e) => {
                self.apply(LifecycleEvent::StartFailed);
                error!(
                    stream_id = %self.record.id,
                    error_kind = e.kind(),
                    "Failed to prepare output directory: {}",
                    e
                );
                self.record.last_error = Some(e.to_string());
            }
        }
        self.publish_snapshot();
    }

    async fn start_job(&mut self, dir: PathBuf) {
        let id = self.record.id.clone();
        match self
            .ctx
            .supervisor
            .start(&id, &dir, &self.ctx.settings.transcode)
        {
            Ok(job) => {
                info!(
                    stream_id = %id,
                    job_id = job.job_id(),
                    pid = ?job.pid(),
                    output_dir = %job.output_dir().display(),
                    "Transcoding started"
                );
                self.record.output_dir = job.output_dir().to_path_buf();
                self.record.last_exit = None;
                self.record.attach_job(job);
            }
            Err(e) => {
                self.apply(LifecycleEvent::StartFailed);
                if matches!(e, Error::DuplicateJob(_)) {
                    error!(
                        stream_id = %id,
                        error_kind = e.kind(),
                        "Job table out of sync with stream state: {}",
                        e
                    );
                } else {
                    error!(
                        stream_id = %id,
                        error_kind = e.kind(),
                        "Failed to start transcoder: {}",
                        e
                    );
                }
                self.record.last_error = Some(e.to_string());
                self.remove_output(self.ctx.settings.retain_on_failure).await;
            }
        }
    }

    fn on_unpublish(&mut self) {
        match self.apply(LifecycleEvent::Unpublish) {
            Action::CancelPendingStart => {
                info!(
                    stream_id = %self.record.id,
                    "Stream unpublished before transcoding started"
                );
            }
            Action::StopJob => {
                if let Some(ref job) = self.record.job {
                    info!(
                        stream_id = %self.record.id,
                        job_id = job.job_id(),
                        "Stream unpublished, stopping transcoder"
                    );
                    job.request_stop(self.ctx.settings.grace_timeout);
                }
            }
            _ => {
                debug!(
                    stream_id = %self.record.id,
                    state = %self.record.state,
                    "Ignoring unpublish"
                );
            }
        }
    }

    fn on_ready(&mut self, job_id: JobId) {
        if self.record.job.is_some() && self.record.job_id == Some(job_id) {
            self.record.ready = true;
        } else {
            debug!(stream_id = %self.record.id, job_id, "Ignoring readiness of stale job");
        }
    }

    async fn on_exited(&mut self, job_id: JobId, exit: ExitInfo, stderr_tail: Vec<String>) {
        let current = self.record.job.as_ref().map(|job| job.job_id());
        if current != Some(job_id) {
            debug!(stream_id = %self.record.id, job_id, "Ignoring exit of stale job");
            return;
        }

        let was = self.record.state;
        if self.apply(LifecycleEvent::JobExited) != Action::Cleanup {
            return;
        }
        let job = self.record.detach_job();
        self.record.last_exit = Some(exit);

        let failed = was == StreamState::Transcoding && exit.is_abnormal();
        if failed {
            error!(
                stream_id = %self.record.id,
                job_id,
                %exit,
                "Transcoder exited unexpectedly:\n{}",
                stderr_tail.join("\n")
            );
            self.record.last_error = Some(format!("transcoder exited unexpectedly ({})", exit));
        } else if was == StreamState::Transcoding && !exit.stop_requested {
            info!(stream_id = %self.record.id, job_id, "Transcoder finished on its own");
        } else {
            info!(stream_id = %self.record.id, job_id, %exit, "Stream stopped");
        }

        if job.is_some_and(|job| job.is_running()) {
            warn!(
                stream_id = %self.record.id,
                job_id,
                "Skipping output cleanup, transcoder still running"
            );
            return;
        }

        let retain = if failed {
            self.ctx.settings.retain_on_failure
        } else {
            self.ctx.settings.retain_segments
        };
        self.remove_output(retain).await;
    }

    fn on_shutdown(&mut self) {
        self.shutting_down = true;
        if matches!(
            self.record.state,
            StreamState::Publishing | StreamState::Transcoding
        ) {
            self.on_unpublish();
        }
    }

    /// The dispatcher went away without a shutdown request. Stop whatever is
    /// running and wait for it, since no more job events will be routed here.
    async fn on_closed(&mut self) {
        // A retired worker has nothing left to report, and a successor may
        // already own the record.
        if self.record.state == StreamState::Idle {
            return;
        }
        self.on_shutdown();
        if let Some(job) = self.record.job.clone() {
            let exit = job.wait().await;
            self.on_exited(job.job_id(), exit, job.stderr_tail()).await;
        }
        self.publish_snapshot();
    }

    async fn remove_output(&self, retain: bool) {
        let directories = self.ctx.directories.clone();
        let id = self.record.id.clone();
        match tokio::task::spawn_blocking(move || directories.cleanup(&id, retain)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(stream_id = %self.record.id, "Failed to clean up output: {}", e);
            }
            Err(e) => {
                warn!(stream_id = %self.record.id, "Cleanup task failed: {}", e);
            }
        }
    }
}
