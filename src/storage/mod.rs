//! Per-stream output directory management.
//!
//! Every stream writes into `<root>/<stream_id>/`. The directory manager only
//! touches the filesystem; ordering against the transcoder (never clean up
//! while a job is writing) is the caller's responsibility.

use liveforged_common::paths::is_hls_output;
use liveforged_common::{Error, Result, StreamId};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const WRITE_PROBE: &str = ".write-probe";

/// Creates, validates, and removes stream output directories.
#[derive(Debug, Clone)]
pub struct DirectoryManager {
    root: PathBuf,
}

impl DirectoryManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output directory for a stream. Purely derived from the id.
    pub fn path_for(&self, id: &StreamId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Create the output directory for `id` if needed and make it ready for a
    /// fresh job.
    ///
    /// Idempotent: an existing directory from a crashed run is reused, but
    /// playlist and segment files left in it are removed so that neither
    /// viewers nor readiness detection mistake them for new output.
    pub fn prepare(&self, id: &StreamId) -> Result<PathBuf> {
        let dir = self.path_for(id);

        match std::fs::symlink_metadata(&dir) {
            Ok(meta) if meta.is_dir() => {
                let removed = self.remove_stale_output(&dir)?;
                if removed > 0 {
                    info!(
                        stream_id = %id,
                        removed,
                        "Removed stale output from previous run"
                    );
                }
            }
            Ok(_) => {
                return Err(Error::directory(&dir, "path exists and is not a directory"));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::create_dir_all(&dir)
                    .map_err(|e| Error::directory(&dir, format!("failed to create: {}", e)))?;
                debug!(stream_id = %id, path = %dir.display(), "Created output directory");
            }
            Err(e) => {
                return Err(Error::directory(&dir, e.to_string()));
            }
        }

        // Permission bits do not tell the whole story (read-only mounts,
        // ACLs), so probe with a real write.
        let probe = dir.join(WRITE_PROBE);
        std::fs::write(&probe, b"")
            .map_err(|e| Error::directory(&dir, format!("not writable: {}", e)))?;
        let _ = std::fs::remove_file(&probe);

        Ok(dir)
    }

    /// Remove output for a finished stream.
    ///
    /// With `retain_segments` the directory is left untouched. A missing
    /// directory is not an error.
    pub fn cleanup(&self, id: &StreamId, retain_segments: bool) -> Result<()> {
        let dir = self.path_for(id);

        if retain_segments {
            debug!(stream_id = %id, "Retaining output directory");
            return Ok(());
        }

        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(stream_id = %id, path = %dir.display(), "Removed output directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::directory(&dir, format!("failed to remove: {}", e))),
        }
    }

    fn remove_stale_output(&self, dir: &Path) -> Result<usize> {
        let mut removed = 0;
        let entries = std::fs::read_dir(dir).map_err(|e| Error::directory(dir, e.to_string()))?;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() || !is_hls_output(&path) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove stale file {:?}: {}", path, e),
            }
        }

        Ok(removed)
    }
}
