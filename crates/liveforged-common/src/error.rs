//! Common error types used throughout liveforged.
//!
//! Every failure the lifecycle controller can observe while bringing a stream
//! up or down maps onto one of these variants. None of them are fatal to the
//! orchestrator: the controller logs them and returns the stream to `Idle`.

use std::path::PathBuf;

use crate::ids::StreamId;

/// Common error type for liveforged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A stream identifier was malformed. Raised before any side effect.
    #[error("Invalid stream identifier: {0}")]
    Validation(String),

    /// The output directory for a stream is unusable.
    #[error("Output directory {}: {message}", path.display())]
    Directory { path: PathBuf, message: String },

    /// The transcoder executable could not be launched.
    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    /// A second job was requested for a stream that already has a live one.
    #[error("A transcoding job is already running for stream {0}")]
    DuplicateJob(StreamId),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new Validation error.
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new Directory error.
    pub fn directory(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Directory {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new Spawn error.
    pub fn spawn(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Spawn {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Short machine-readable name of the variant, logged as the `error_kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Directory { .. } => "directory",
            Self::Spawn { .. } => "spawn",
            Self::DuplicateJob(_) => "duplicate_job",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
