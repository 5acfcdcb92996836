use std::sync::Arc;

use thiserror::Error;

/// Errors emitted while unpacking an archive.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Io(Arc<std::io::Error>),

    #[error("invalid zip archive: {0}")]
    InvalidZip(String),

    #[error("failed to read entry {index} of the zip archive: {reason}")]
    ZipEntry { index: usize, reason: String },

    #[error("archive entry '{0}' would be written outside of the destination directory")]
    UnsafeEntryPath(String),
}

impl From<std::io::Error> for ExtractError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
