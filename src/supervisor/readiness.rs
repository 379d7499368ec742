//! Readiness detection: a job is ready once its playlist exists.

use anyhow::{Context, Result};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Watches one output directory for the first manifest write.
///
/// The callback runs at most once, on the watcher's thread. Dropping the
/// guard stops watching.
pub struct ManifestWatch {
    _watcher: RecommendedWatcher,
}

impl ManifestWatch {
    pub fn start<F>(manifest_path: &Path, fired: Arc<AtomicBool>, on_ready: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let dir: PathBuf = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .context("Manifest path has no parent directory")?;
        let manifest_name: OsString = manifest_path
            .file_name()
            .map(|n| n.to_os_string())
            .context("Manifest path has no file name")?;

        let on_ready = Arc::new(on_ready);
        let fire = {
            let fired = fired.clone();
            let on_ready = on_ready.clone();
            move || {
                if !fired.swap(true, Ordering::AcqRel) {
                    on_ready();
                }
            }
        };

        let handler_fire = fire.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    if !(event.kind.is_create() || event.kind.is_modify()) {
                        return;
                    }
                    let hit = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(manifest_name.as_os_str()));
                    if hit {
                        handler_fire();
                    }
                }
            },
            Config::default(),
        )
        .context("Failed to create manifest watcher")?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch output directory: {:?}", dir))?;

        // The process may have written the manifest before the watch was armed.
        if manifest_path.exists() {
            fire();
        }

        Ok(Self { _watcher: watcher })
    }
}
