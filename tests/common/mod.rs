//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which runs a real [`LifecycleController`] over a
//! temporary output root. The transcoder is `/bin/sh` running a small script
//! that behaves like ffmpeg: it writes a playlist next to the manifest path
//! (always the last argument) and runs until signalled.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::Router;
use liveforged::config::Config;
use liveforged::lifecycle::{ControllerHandle, LifecycleController};
use liveforged::registry::{Registry, StreamRecord, StreamState};
use liveforged::server::{create_router, AppContext};
use liveforged::supervisor::{ShutdownReport, Supervisor};
use liveforged_common::StreamId;
use tempfile::TempDir;

/// Writes a playlist and a segment, then runs until SIGTERM and exits 0.
pub const WELL_BEHAVED: &str = r#"for last; do :; done
trap 'exit 0' TERM
dir=$(dirname "$last")
echo 'segment' > "$dir/segment_00000.ts"
printf '#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXTINF:2.0,\nsegment_00000.ts\n' > "$last"
while true; do sleep 0.05; done"#;

/// Writes a playlist, then dies on its own like a transcoder losing its input.
pub const CRASHING: &str = r#"for last; do :; done
echo '#EXTM3U' > "$last"
sleep 0.3
echo 'rtmp://127.0.0.1:1935/live: Connection refused' >&2
exit 137"#;

pub const STARTS_LOG: &str = "starts.log";

/// A well-behaved transcoder that also appends one line per start to
/// `<log_dir>/starts.log`.
pub fn counting_script(log_dir: &Path) -> String {
    format!(
        "echo $$ >> '{}'\n{}",
        log_dir.join(STARTS_LOG).display(),
        WELL_BEHAVED
    )
}

pub fn id(name: &str) -> StreamId {
    StreamId::parse(name).unwrap()
}

/// Test harness around a running controller.
pub struct TestHarness {
    pub root: TempDir,
    pub config: Config,
    pub registry: Registry,
    pub supervisor: Supervisor,
    pub controller: ControllerHandle,
}

impl TestHarness {
    /// Harness with the well-behaved fake transcoder.
    pub fn new() -> Self {
        Self::with_script(WELL_BEHAVED)
    }

    pub fn with_script(script: &str) -> Self {
        let script = script.to_string();
        Self::with_config(move |config| {
            config.transcode.command_args = vec![
                "-c".to_string(),
                script,
                "fake-transcoder".to_string(),
            ];
        })
    }

    /// Harness with a fake transcoder, after applying `customize`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let root = tempfile::tempdir().expect("failed to create temp dir");

        let mut config = Config::default();
        config.output.root = root.path().join("live");
        config.transcode.command = PathBuf::from("/bin/sh");
        config.transcode.command_args = vec![
            "-c".to_string(),
            WELL_BEHAVED.to_string(),
            "fake-transcoder".to_string(),
        ];
        config.supervisor.grace_timeout_secs = 2;
        config.supervisor.shutdown_timeout_secs = 10;
        customize(&mut config);

        let registry = Registry::new();
        let controller = LifecycleController::from_config(&config, registry.clone());
        let supervisor = controller.supervisor().clone();
        let (handle, _task) = controller.spawn();

        Self {
            root,
            config,
            registry,
            supervisor,
            controller: handle,
        }
    }

    /// Fresh router over this harness.
    pub fn app(&self) -> Router {
        create_router(AppContext::new(
            self.config.clone(),
            self.controller.clone(),
            self.registry.clone(),
        ))
    }

    pub fn output_dir(&self, name: &str) -> PathBuf {
        self.config.output.root.join(name)
    }

    /// Poll the registry until `pred` holds for the stream's record.
    pub async fn wait_for<F>(&self, name: &str, what: &str, pred: F) -> StreamRecord
    where
        F: Fn(&StreamRecord) -> bool,
    {
        let stream_id = id(name);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(record) = self.registry.get(&stream_id) {
                if pred(&record) {
                    return record;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "timed out waiting for {} to be {}; last record: {:?}",
                    name,
                    what,
                    self.registry.get(&stream_id)
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Wait until the stream is transcoding and has produced a playlist.
    pub async fn wait_ready(&self, name: &str) -> StreamRecord {
        self.wait_for(name, "ready", |r| {
            r.state == StreamState::Transcoding && r.ready
        })
        .await
    }

    /// Wait until the stream is idle after a job has run.
    pub async fn wait_exited(&self, name: &str) -> StreamRecord {
        self.wait_for(name, "idle after exit", |r| {
            r.state == StreamState::Idle && r.last_exit.is_some()
        })
        .await
    }

    /// Wait until no transcoder process is left.
    pub async fn wait_no_jobs(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while !self.supervisor.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                panic!("jobs still live: {}", self.supervisor.len());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Shut the controller down and return its report.
    ///
    /// The report is sent once every stream has settled.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.controller.shutdown().await.expect("shutdown failed")
    }

    /// Wait until the stream is idle with no process left, and stays so.
    pub async fn wait_settled(&self, name: &str) {
        let stream_id = id(name);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        let mut stable = 0;
        while stable < 5 {
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "{} did not settle; record: {:?}, live jobs: {}",
                    name,
                    self.registry.get(&stream_id),
                    self.supervisor.len()
                );
            }
            let idle = self.registry.state(&stream_id) == StreamState::Idle;
            if idle && self.supervisor.is_empty() {
                stable += 1;
            } else {
                stable = 0;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
