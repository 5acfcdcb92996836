use std::{path::PathBuf, sync::Arc};

use miette::Diagnostic;
use sampledb_extract::ExtractError;
use thiserror::Error;

/// Errors that prevent a working copy from being provisioned.
///
/// Whenever one of these is returned the provisioner is left without a
/// working copy and nothing that was created for the attempt remains on disk
/// (unless it had to be handed to deferred removal).
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum ProvisionError {
    #[error("the bundled archive '{0}' could not be found")]
    #[diagnostic(help(
        "embed the archive in the application or add the directory that contains it to the search path"
    ))]
    ArchiveNotFound(String),

    #[error("failed to open the bundled archive '{name}'")]
    OpenArchive {
        name: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("failed to create the working directory {}", path.display())]
    CreateWorkingDir {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("failed to extract the bundled archive '{name}'")]
    Extract {
        name: String,
        #[source]
        source: ExtractError,
    },
}

/// Problems encountered while tearing a working copy down.
///
/// These are never returned as errors, the releasing caller cannot do
/// anything about them. They are logged and collected in the
/// [`crate::TeardownReport`].
#[derive(Debug, Clone, Error)]
pub enum TeardownWarning {
    #[error("failed to shut down the database engine: {0}")]
    Shutdown(Arc<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Remove(Arc<std::io::Error>),

    #[error("{} could not be removed completely, it is scheduled for removal at exit", .0.display())]
    Deferred(PathBuf),

    #[error("{} could not be removed completely and is left behind", .0.display())]
    Leaked(PathBuf),
}
