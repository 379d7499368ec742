//! Stream lifecycle controller.
//!
//! Ingest notifications and supervisor job events enter through a single
//! dispatcher task, which routes them to one worker task per stream
//! identifier. Events for the same stream are therefore applied in arrival
//! order, while different streams progress independently: a slow directory
//! or a stubborn transcoder on one stream never delays another.
//!
//! Workers are created on the first publish and retired once they settle in
//! `Idle`. Retirement compares the number of messages the dispatcher routed
//! to a worker with the number the worker reports having handled, so a
//! message that is still queued is never lost.

mod worker;

use liveforged_common::{Error, Result, StreamId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::registry::Registry;
use crate::storage::DirectoryManager;
use crate::supervisor::{JobEvent, ShutdownReport, Supervisor, TranscodeSettings};
use worker::{IdleNotice, StreamWorker, WorkerContext, WorkerMsg};

/// Capacity of the ingest queue. Senders wait when it is full.
const CONTROL_QUEUE: usize = 1024;

/// Tunables of the lifecycle controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub transcode: TranscodeSettings,
    /// Time a transcoder gets between SIGTERM and kill.
    pub grace_timeout: Duration,
    /// Upper bound on the whole shutdown sequence.
    pub shutdown_timeout: Duration,
    pub retain_segments: bool,
    pub retain_on_failure: bool,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            transcode: TranscodeSettings::from_config(config),
            grace_timeout: config.supervisor.grace_timeout(),
            shutdown_timeout: config.supervisor.shutdown_timeout(),
            retain_segments: config.output.retain_segments,
            retain_on_failure: config.output.retain_on_failure,
        }
    }
}

/// Notification from the ingest server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    Publish(StreamId),
    Unpublish(StreamId),
}

impl IngestEvent {
    pub fn stream_id(&self) -> &StreamId {
        match self {
            Self::Publish(id) | Self::Unpublish(id) => id,
        }
    }
}

enum ControlMsg {
    Ingest(IngestEvent),
    Shutdown(oneshot::Sender<ShutdownReport>),
}

/// Cloneable entry point into a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControlMsg>,
}

impl ControllerHandle {
    /// Validate `raw_id` and submit a publish for it.
    ///
    /// Invalid identifiers are rejected before anything is queued.
    pub async fn publish(&self, raw_id: &str) -> Result<StreamId> {
        let id = StreamId::parse(raw_id)?;
        self.send(IngestEvent::Publish(id.clone())).await?;
        Ok(id)
    }

    /// Validate `raw_id` and submit an unpublish for it.
    pub async fn unpublish(&self, raw_id: &str) -> Result<StreamId> {
        let id = StreamId::parse(raw_id)?;
        self.send(IngestEvent::Unpublish(id.clone())).await?;
        Ok(id)
    }

    pub async fn send(&self, event: IngestEvent) -> Result<()> {
        self.tx
            .send(ControlMsg::Ingest(event))
            .await
            .map_err(|_| Error::internal("lifecycle controller is not running"))
    }

    /// Stop accepting events, stop every transcoder, and wait for all streams
    /// to settle.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ControlMsg::Shutdown(reply_tx))
            .await
            .map_err(|_| Error::internal("lifecycle controller is not running"))?;
        reply_rx
            .await
            .map_err(|_| Error::internal("lifecycle controller exited during shutdown"))
    }
}

/// Owns the per-stream state machines.
pub struct LifecycleController {
    ctx: Arc<WorkerContext>,
    job_rx: mpsc::UnboundedReceiver<JobEvent>,
    control_tx: mpsc::Sender<ControlMsg>,
    control_rx: mpsc::Receiver<ControlMsg>,
}

impl LifecycleController {
    pub fn new(
        settings: ControllerSettings,
        directories: DirectoryManager,
        registry: Registry,
    ) -> Self {
        let (supervisor, job_rx) = Supervisor::channel();
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);
        Self {
            ctx: Arc::new(WorkerContext {
                settings,
                supervisor,
                directories: Arc::new(directories),
                registry,
            }),
            job_rx,
            control_tx,
            control_rx,
        }
    }

    pub fn from_config(config: &Config, registry: Registry) -> Self {
        Self::new(
            ControllerSettings::from_config(config),
            DirectoryManager::new(&config.output.root),
            registry,
        )
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            tx: self.control_tx.clone(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.ctx.registry
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.ctx.supervisor
    }

    /// Run the controller on a new task.
    pub fn spawn(self) -> (ControllerHandle, tokio::task::JoinHandle<ShutdownReport>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Process events until shutdown is requested or every handle is dropped.
    pub async fn run(self) -> ShutdownReport {
        let Self {
            ctx,
            job_rx,
            control_tx,
            control_rx,
        } = self;
        // Only external handles keep the controller alive.
        drop(control_tx);

        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        Dispatcher {
            ctx,
            job_rx,
            control_rx,
            workers: HashMap::new(),
            tasks: JoinSet::new(),
            notice_tx,
            notice_rx,
        }
        .run()
        .await
    }
}

struct WorkerSlot {
    tx: mpsc::UnboundedSender<WorkerMsg>,
    sent: u64,
}

struct Dispatcher {
    ctx: Arc<WorkerContext>,
    job_rx: mpsc::UnboundedReceiver<JobEvent>,
    control_rx: mpsc::Receiver<ControlMsg>,
    workers: HashMap<StreamId, WorkerSlot>,
    tasks: JoinSet<()>,
    notice_tx: mpsc::UnboundedSender<IdleNotice>,
    notice_rx: mpsc::UnboundedReceiver<IdleNotice>,
}

impl Dispatcher {
    async fn run(mut self) -> ShutdownReport {
        info!("Lifecycle controller started");

        let reply = loop {
            tokio::select! {
                msg = self.control_rx.recv() => match msg {
                    Some(ControlMsg::Ingest(event)) => self.route_ingest(event),
                    Some(ControlMsg::Shutdown(reply)) => break Some(reply),
                    None => break None,
                },
                Some(event) = self.job_rx.recv() => self.route_job(event),
                Some(notice) = self.notice_rx.recv() => self.retire(notice),
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.reap(joined);
                }
            }
        };

        let report = self.shutdown().await;
        if let Some(reply) = reply {
            let _ = reply.send(report.clone());
        }
        report
    }

    fn route_ingest(&mut self, event: IngestEvent) {
        match event {
            IngestEvent::Publish(id) => self.route(id, WorkerMsg::Publish, true),
            // No worker means the stream is Idle.
            IngestEvent::Unpublish(id) => self.route(id, WorkerMsg::Unpublish, false),
        }
    }

    fn route_job(&mut self, event: JobEvent) {
        let id = event.stream_id().clone();
        self.route(id, WorkerMsg::Job(event), false);
    }

    fn route(&mut self, id: StreamId, msg: WorkerMsg, spawn: bool) {
        let slot = match self.workers.entry(id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                if !spawn {
                    debug!(stream_id = %id, "No active stream, ignoring {}", msg.kind());
                    return;
                }
                let (tx, rx) = mpsc::unbounded_channel();
                let worker =
                    StreamWorker::new(self.ctx.clone(), id.clone(), rx, self.notice_tx.clone());
                self.tasks.spawn(worker.run());
                entry.insert(WorkerSlot { tx, sent: 0 })
            }
        };

        slot.sent += 1;
        if let Err(mpsc::error::SendError(msg)) = slot.tx.send(msg) {
            error!(stream_id = %id, "Stream worker is gone, dropping {}", msg.kind());
            self.workers.remove(&id);
        }
    }

    fn retire(&mut self, notice: IdleNotice) {
        let settled = self
            .workers
            .get(&notice.id)
            .is_some_and(|slot| slot.sent == notice.processed);
        if settled {
            self.workers.remove(&notice.id);
            debug!(stream_id = %notice.id, "Retired idle stream worker");
        }
    }

    fn reap(&mut self, joined: std::result::Result<(), JoinError>) {
        if let Err(e) = joined {
            if e.is_panic() {
                error!("Stream worker panicked: {}", e);
            }
            // Forget workers whose task is gone.
            self.workers.retain(|_, slot| !slot.tx.is_closed());
        }
    }

    async fn shutdown(mut self) -> ShutdownReport {
        let settings = &self.ctx.settings;
        let deadline = Instant::now() + settings.shutdown_timeout;
        info!(
            streams = self.workers.len(),
            "Lifecycle controller shutting down"
        );

        for slot in self.workers.values_mut() {
            slot.sent += 1;
            let _ = slot.tx.send(WorkerMsg::Shutdown);
        }

        let stop_all = {
            let supervisor = self.ctx.supervisor.clone();
            let grace = settings.grace_timeout;
            let total = settings.shutdown_timeout;
            tokio::spawn(async move { supervisor.shutdown(grace, total).await })
        };

        // Keep routing job events so stopping streams observe their exits.
        while !self.workers.is_empty() {
            tokio::select! {
                Some(event) = self.job_rx.recv() => self.route_job(event),
                Some(notice) = self.notice_rx.recv() => self.retire(notice),
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.reap(joined);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(
                        remaining = self.workers.len(),
                        "Streams did not settle before the shutdown deadline"
                    );
                    break;
                }
            }
        }

        // Closing the remaining channels ends every worker.
        self.workers.clear();
        let drained = tokio::time::timeout_at(deadline, async {
            while let Some(joined) = self.tasks.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Stream worker panicked: {}", e);
                    }
                }
            }
        })
        .await;
        if drained.is_err() {
            self.tasks.abort_all();
        }

        let report = match stop_all.await {
            Ok(report) => report,
            Err(e) => {
                error!("Supervisor shutdown task failed: {}", e);
                ShutdownReport::default()
            }
        };
        info!(
            stopped = report.stopped,
            timed_out = report.timed_out,
            "Lifecycle controller stopped"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_invalid_id_is_rejected_before_queueing() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.output.root = root.path().to_path_buf();
        let controller = LifecycleController::from_config(&config, Registry::new());
        let handle = controller.handle();

        let err = handle.publish("../etc").await.unwrap_err();
        assert_matches!(err, Error::Validation(_));
        let err = handle.unpublish("").await.unwrap_err();
        assert_matches!(err, Error::Validation(_));

        assert!(controller.registry().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_with_no_streams() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.output.root = root.path().to_path_buf();
        let (handle, task) = LifecycleController::from_config(&config, Registry::new()).spawn();

        let report = handle.shutdown().await.unwrap();
        assert_eq!(report, ShutdownReport::default());
        assert_eq!(task.await.unwrap(), report);

        let err = handle.publish("cam1").await.unwrap_err();
        assert_matches!(err, Error::Internal(_));
    }

    #[tokio::test]
    async fn test_unpublish_for_unknown_stream_is_ignored() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.output.root = root.path().to_path_buf();
        let controller = LifecycleController::from_config(&config, Registry::new());
        let registry = controller.registry().clone();
        let (handle, _task) = controller.spawn();

        handle.unpublish("ghost").await.unwrap();
        handle.shutdown().await.unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.supervisor.grace_timeout_secs = 3;
        config.output.retain_segments = true;
        let settings = ControllerSettings::from_config(&config);
        assert_eq!(settings.grace_timeout, Duration::from_secs(3));
        assert!(settings.retain_segments);
        assert!(settings.retain_on_failure);
    }
}
