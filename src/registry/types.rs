use chrono::{DateTime, Utc};
use liveforged_common::StreamId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::supervisor::{ExitInfo, JobHandle, JobId};

/// Lifecycle state of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    #[default]
    Idle,
    Publishing,
    Transcoding,
    Stopping,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Publishing => "publishing",
            Self::Transcoding => "transcoding",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Inputs to the stream state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Publish,
    DirectoryReady,
    /// Directory preparation or job spawn failed.
    StartFailed,
    Unpublish,
    JobExited,
}

/// What the controller must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    PrepareDirectory,
    StartJob,
    CancelPendingStart,
    AbortStart,
    StopJob,
    Cleanup,
    /// Publish for a stream that is already active.
    IgnoreDuplicate,
    /// Event does not apply in the current state.
    Ignore,
}

/// The stream state machine.
///
/// | From        | Event          | To          | Action             |
/// |-------------|----------------|-------------|--------------------|
/// | Idle        | Publish        | Publishing  | PrepareDirectory   |
/// | Publishing  | DirectoryReady | Transcoding | StartJob           |
/// | Publishing  | Unpublish      | Idle        | CancelPendingStart |
/// | Publishing  | StartFailed    | Idle        | AbortStart         |
/// | Transcoding | StartFailed    | Idle        | AbortStart         |
/// | Transcoding | Unpublish      | Stopping    | StopJob            |
/// | Transcoding | JobExited      | Idle        | Cleanup            |
/// | Stopping    | JobExited      | Idle        | Cleanup            |
/// | non-Idle    | Publish        | unchanged   | IgnoreDuplicate    |
///
/// Every other combination leaves the state unchanged and is ignored.
pub fn transition(state: StreamState, event: LifecycleEvent) -> (StreamState, Action) {
    use Action as A;
    use LifecycleEvent as E;
    use StreamState as S;

    match (state, event) {
        (S::Idle, E::Publish) => (S::Publishing, A::PrepareDirectory),
        (_, E::Publish) => (state, A::IgnoreDuplicate),

        (S::Publishing, E::DirectoryReady) => (S::Transcoding, A::StartJob),
        (S::Publishing, E::Unpublish) => (S::Idle, A::CancelPendingStart),
        (S::Publishing | S::Transcoding, E::StartFailed) => (S::Idle, A::AbortStart),

        (S::Transcoding, E::Unpublish) => (S::Stopping, A::StopJob),
        (S::Transcoding | S::Stopping, E::JobExited) => (S::Idle, A::Cleanup),

        _ => (state, A::Ignore),
    }
}

/// Snapshot of one stream's lifecycle, as stored in the registry.
#[derive(Debug, Clone, Serialize)]
pub struct StreamRecord {
    pub id: StreamId,
    pub state: StreamState,
    pub output_dir: PathBuf,
    /// Number of publishes accepted for this identifier.
    pub attempt: u64,
    pub job_id: Option<JobId>,
    pub pid: Option<u32>,
    /// Whether the current job has written its first playlist.
    pub ready: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_event_at: DateTime<Utc>,
    pub last_exit: Option<ExitInfo>,
    pub last_error: Option<String>,
    /// Present only while `Transcoding` or `Stopping`.
    #[serde(skip)]
    pub job: Option<JobHandle>,
}

impl StreamRecord {
    pub fn new(id: StreamId, output_dir: PathBuf) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            output_dir,
            attempt: 0,
            job_id: None,
            pid: None,
            ready: false,
            started_at: None,
            last_event_at: Utc::now(),
            last_exit: None,
            last_error: None,
            job: None,
        }
    }

    pub(crate) fn attach_job(&mut self, job: JobHandle) {
        self.job_id = Some(job.job_id());
        self.pid = job.pid();
        self.ready = job.is_ready();
        self.started_at = Some(Utc::now());
        self.job = Some(job);
    }

    pub(crate) fn detach_job(&mut self) -> Option<JobHandle> {
        self.pid = None;
        self.ready = false;
        self.job.take()
    }
}
