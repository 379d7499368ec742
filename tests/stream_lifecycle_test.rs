//! Stream lifecycle integration tests.
//!
//! Drive a real controller with fake transcoder processes and check the
//! publish/unpublish/exit/shutdown behavior end to end.

#![cfg(unix)]

mod common;

use common::{counting_script, id, TestHarness, CRASHING, STARTS_LOG, WELL_BEHAVED};
use futures::future::join_all;
use liveforged::registry::StreamState;
use liveforged::supervisor::ShutdownReport;
use std::time::Duration;

#[tokio::test]
async fn publish_starts_transcoder_and_becomes_ready() {
    let harness = TestHarness::new();

    let stream_id = harness.controller.publish("cam1").await.unwrap();
    assert_eq!(stream_id, id("cam1"));

    let record = harness.wait_ready("cam1").await;
    assert_eq!(record.attempt, 1);
    assert!(record.pid.is_some());
    assert!(record.job_id.is_some());
    assert!(record.started_at.is_some());
    assert_eq!(record.output_dir, harness.output_dir("cam1"));
    assert!(harness.output_dir("cam1").join("index.m3u8").exists());

    let job = harness.supervisor.job(&id("cam1")).unwrap();
    assert_eq!(Some(job.job_id()), record.job_id);

    harness.shutdown().await;
}

#[tokio::test]
async fn duplicate_publishes_start_one_transcoder() {
    let logs = tempfile::tempdir().unwrap();
    let harness = TestHarness::with_script(&counting_script(logs.path()));

    let publishes = (0..5).map(|_| harness.controller.publish("cam1"));
    for result in join_all(publishes).await {
        result.unwrap();
    }

    let record = harness.wait_ready("cam1").await;
    harness.controller.publish("cam1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let starts = std::fs::read_to_string(logs.path().join(STARTS_LOG)).unwrap();
    assert_eq!(starts.lines().count(), 1);
    assert_eq!(harness.supervisor.live_jobs().len(), 1);

    let after = harness.registry.get(&id("cam1")).unwrap();
    assert_eq!(after.attempt, 1);
    assert_eq!(after.job_id, record.job_id);
    assert_eq!(after.state, StreamState::Transcoding);

    harness.shutdown().await;
}

#[tokio::test]
async fn unsolicited_exit_returns_to_idle_without_restart() {
    let harness = TestHarness::with_script(CRASHING);

    harness.controller.publish("cam1").await.unwrap();
    let record = harness.wait_exited("cam1").await;

    let exit = record.last_exit.unwrap();
    assert_eq!(exit.code, Some(137));
    assert!(!exit.stop_requested);
    assert!(record.job_id.is_some());
    assert!(record.pid.is_none());
    assert!(record
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("exit code 137")));

    // Output is kept for diagnosis after a failure.
    assert!(harness.output_dir("cam1").join("index.m3u8").exists());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(harness.supervisor.is_empty());
    let later = harness.registry.get(&id("cam1")).unwrap();
    assert_eq!(later.state, StreamState::Idle);
    assert_eq!(later.attempt, 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn failure_output_is_removed_when_not_retained() {
    let harness = TestHarness::with_config(|config| {
        config.output.retain_on_failure = false;
        config.transcode.command_args = vec![
            "-c".to_string(),
            CRASHING.to_string(),
            "fake-transcoder".to_string(),
        ];
    });

    harness.controller.publish("cam1").await.unwrap();
    harness.wait_exited("cam1").await;
    assert!(!harness.output_dir("cam1").exists());

    harness.shutdown().await;
}

#[tokio::test]
async fn unpublish_stops_transcoder_and_removes_output() {
    let harness = TestHarness::new();

    harness.controller.publish("cam1").await.unwrap();
    harness.wait_ready("cam1").await;

    harness.controller.unpublish("cam1").await.unwrap();
    let record = harness.wait_exited("cam1").await;

    let exit = record.last_exit.unwrap();
    assert!(exit.stop_requested);
    assert!(exit.success());
    assert!(record.last_error.is_none());
    assert!(!harness.output_dir("cam1").exists());
    assert!(harness.supervisor.is_empty());

    harness.shutdown().await;
}

#[tokio::test]
async fn retained_output_survives_unpublish() {
    let harness = TestHarness::with_config(|config| {
        config.output.retain_segments = true;
    });

    harness.controller.publish("cam1").await.unwrap();
    harness.wait_ready("cam1").await;
    harness.controller.unpublish("cam1").await.unwrap();
    harness.wait_exited("cam1").await;

    assert!(harness.output_dir("cam1").join("segment_00000.ts").exists());

    harness.shutdown().await;
}

#[tokio::test]
async fn republish_after_stop_starts_fresh_job() {
    let harness = TestHarness::with_config(|config| {
        config.output.retain_segments = true;
    });

    harness.controller.publish("cam1").await.unwrap();
    let first = harness.wait_ready("cam1").await;
    harness.controller.unpublish("cam1").await.unwrap();
    harness.wait_exited("cam1").await;

    harness.controller.publish("cam1").await.unwrap();
    let second = harness
        .wait_for("cam1", "ready again", |r| {
            r.state == StreamState::Transcoding && r.ready && r.job_id != first.job_id
        })
        .await;
    assert_eq!(second.attempt, 2);
    assert!(second.last_exit.is_none());

    harness.shutdown().await;
}

#[tokio::test]
async fn exit_before_unpublish_ends_idle() {
    let harness = TestHarness::with_script(
        r#"for last; do :; done
echo '#EXTM3U' > "$last"
exit 0"#,
    );

    harness.controller.publish("cam1").await.unwrap();
    let record = harness.wait_exited("cam1").await;
    assert!(record.last_exit.unwrap().success());
    // A clean unsolicited exit is not a failure.
    assert!(record.last_error.is_none());

    harness.controller.unpublish("cam1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.registry.state(&id("cam1")), StreamState::Idle);

    harness.shutdown().await;
}

#[tokio::test]
async fn rapid_publish_unpublish_settles_idle() {
    let harness = TestHarness::new();

    for _ in 0..20 {
        harness.controller.publish("cam1").await.unwrap();
        harness.controller.unpublish("cam1").await.unwrap();
    }

    harness.wait_settled("cam1").await;
    let record = harness.registry.get(&id("cam1")).unwrap();
    assert!(record.attempt >= 1);
    assert!(record.job.is_none());

    harness.shutdown().await;
}

#[tokio::test]
async fn stopping_stream_does_not_delay_others() {
    // Only the stream named "slow" ignores SIGTERM.
    let script = format!(
        "case \"$*\" in *\"/live/slow \"*) trap '' TERM ;; esac\n{}",
        WELL_BEHAVED.replace("trap 'exit 0' TERM\n", "")
    );
    let harness = TestHarness::with_config(|config| {
        config.supervisor.grace_timeout_secs = 3;
        config.transcode.command_args =
            vec!["-c".to_string(), script, "fake-transcoder".to_string()];
    });

    harness.controller.publish("slow").await.unwrap();
    harness.wait_ready("slow").await;
    harness.controller.unpublish("slow").await.unwrap();
    harness
        .wait_for("slow", "stopping", |r| r.state == StreamState::Stopping)
        .await;

    harness.controller.publish("fast").await.unwrap();
    harness.wait_ready("fast").await;
    assert_eq!(harness.registry.state(&id("slow")), StreamState::Stopping);

    let slow = harness.wait_exited("slow").await;
    assert_eq!(slow.last_exit.unwrap().signal, Some(9));

    harness.shutdown().await;
}

#[tokio::test]
async fn spawn_failure_returns_to_idle_and_allows_retry() {
    let harness = TestHarness::with_config(|config| {
        config.transcode.command = "/nonexistent/transcoder-12345".into();
    });

    harness.controller.publish("cam1").await.unwrap();
    let record = harness
        .wait_for("cam1", "failed", |r| {
            r.state == StreamState::Idle && r.last_error.is_some()
        })
        .await;
    assert!(record.job_id.is_none());
    assert!(record
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("Failed to spawn")));
    assert!(harness.supervisor.is_empty());

    harness.controller.publish("cam1").await.unwrap();
    harness
        .wait_for("cam1", "second attempt", |r| {
            r.attempt == 2 && r.state == StreamState::Idle && r.last_error.is_some()
        })
        .await;

    harness.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_every_stream() {
    let harness = TestHarness::new();

    for name in ["cam1", "cam2"] {
        harness.controller.publish(name).await.unwrap();
    }
    harness.wait_ready("cam1").await;
    harness.wait_ready("cam2").await;

    let registry = harness.registry.clone();
    let supervisor = harness.supervisor.clone();
    let cam1_dir = harness.output_dir("cam1");

    let report = harness.shutdown().await;
    assert_eq!(
        report,
        ShutdownReport {
            stopped: 2,
            timed_out: 0
        }
    );
    assert!(supervisor.is_empty());
    for name in ["cam1", "cam2"] {
        let record = registry.get(&id(name)).unwrap();
        assert_eq!(record.state, StreamState::Idle);
        assert!(record.last_exit.is_some_and(|e| e.stop_requested));
    }
    assert!(!cam1_dir.exists());
}

#[tokio::test]
async fn publish_after_shutdown_is_refused() {
    let harness = TestHarness::new();
    let controller = harness.controller.clone();

    harness.shutdown().await;
    assert!(controller.publish("cam1").await.is_err());
}
