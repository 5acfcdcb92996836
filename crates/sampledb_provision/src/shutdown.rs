use std::path::Path;

/// Error type returned by [`EngineShutdown`] implementations.
pub type ShutdownError = Box<dyn std::error::Error + Send + Sync>;

/// Hook into the database engine that has the working copy open.
///
/// Called with the engine's shutdown descriptor and the working directory
/// that is about to be removed, so the engine can release its file handles.
/// A failure does not stop the teardown.
///
/// The hook runs while the provisioner holds its lock. It must not call back
/// into the [`crate::Provisioner`], everything it needs is passed in.
pub trait EngineShutdown: Send + Sync {
    fn shutdown(&self, descriptor: &str, working_dir: &Path) -> Result<(), ShutdownError>;
}

impl<F> EngineShutdown for F
where
    F: Fn(&str, &Path) -> Result<(), ShutdownError> + Send + Sync,
{
    fn shutdown(&self, descriptor: &str, working_dir: &Path) -> Result<(), ShutdownError> {
        self(descriptor, working_dir)
    }
}

/// Used when no engine is attached to the working copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEngine;

impl EngineShutdown for NoEngine {
    fn shutdown(&self, _descriptor: &str, _working_dir: &Path) -> Result<(), ShutdownError> {
        Ok(())
    }
}
