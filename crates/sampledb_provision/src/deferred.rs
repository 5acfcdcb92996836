//! Removal of directories that could not be deleted right away.
//!
//! A working directory can survive its teardown, for example when the engine
//! still holds a file open. Such directories are recorded here and removed
//! once more when the process shuts down.
use std::{
    path::PathBuf,
    sync::{Arc, LazyLock},
};

use parking_lot::Mutex;

use crate::remove::remove_directory;

/// A list of directories to remove at shutdown.
#[derive(Debug, Default)]
pub struct DeferredRemovals {
    paths: Mutex<Vec<PathBuf>>,
}

static PROCESS_REMOVALS: LazyLock<Arc<DeferredRemovals>> =
    LazyLock::new(|| Arc::new(DeferredRemovals::default()));

impl DeferredRemovals {
    /// Creates an empty, standalone list. Nothing drains it implicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process wide list, which is drained when the process
    /// exits normally.
    pub fn process() -> Arc<Self> {
        install_exit_hook();
        PROCESS_REMOVALS.clone()
    }

    /// Records `path` for removal. Scheduling the same path twice is a no-op.
    pub fn schedule(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut paths = self.paths.lock();
        if !paths.contains(&path) {
            tracing::debug!("scheduled {} for removal at exit", path.display());
            paths.push(path);
        }
    }

    /// The paths that are currently waiting for removal.
    pub fn pending(&self) -> Vec<PathBuf> {
        self.paths.lock().clone()
    }

    /// Tries to remove every scheduled path and clears the list.
    ///
    /// Returns the paths that still could not be removed. They are not
    /// retried again.
    pub fn drain(&self) -> Vec<PathBuf> {
        let paths = std::mem::take(&mut *self.paths.lock());
        paths
            .into_iter()
            .filter(|path| !remove_directory(path))
            .collect()
    }

    /// Returns a guard that drains this list when dropped.
    pub fn guard(self: &Arc<Self>) -> ExitGuard {
        ExitGuard(self.clone())
    }
}

/// Drains a [`DeferredRemovals`] list when dropped.
///
/// Keep one alive in `main` to clean up on every regular return path, the
/// exit hook only runs when the process terminates through `exit`.
#[must_use]
pub struct ExitGuard(Arc<DeferredRemovals>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        for path in self.0.drain() {
            tracing::warn!("failed to remove {} before exiting", path.display());
        }
    }
}

#[cfg(unix)]
fn install_exit_hook() {
    use std::sync::Once;

    static INSTALLED: Once = Once::new();

    extern "C" fn drain_process_removals() {
        // Unwinding out of an `extern "C"` function aborts the process.
        let _ = std::panic::catch_unwind(|| PROCESS_REMOVALS.drain());
    }

    INSTALLED.call_once(|| {
        // SAFETY: `drain_process_removals` has the signature `atexit` expects
        // and does not unwind.
        if unsafe { libc::atexit(drain_process_removals) } != 0 {
            tracing::warn!("failed to register the exit hook, leftover directories are not removed");
        }
    });
}

#[cfg(not(unix))]
fn install_exit_hook() {}
