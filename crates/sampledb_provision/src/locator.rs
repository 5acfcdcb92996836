//! Lookup of the bundled archive by its logical name.
use std::{
    collections::HashMap,
    io::{BufReader, Cursor, ErrorKind, Read, Seek},
    path::{Path, PathBuf},
    sync::Arc,
};

use sampledb_consts::consts;

/// A readable, seekable handle to an archive.
pub trait ArchiveReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> ArchiveReader for T {}

/// Resolves logical resource names such as `db/BirtSample.jar` to readers.
///
/// Returns `Ok(None)` when the resource is not known to this locator, which
/// lets the next locator in line have a go. Errors are reserved for
/// resources that exist but cannot be read.
pub trait ResourceLocator: Send + Sync {
    fn open(&self, name: &str) -> std::io::Result<Option<Box<dyn ArchiveReader>>>;
}

/// Resources packaged with the application itself, usually through
/// `include_bytes!`.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedResources {
    resources: HashMap<String, Arc<[u8]>>,
}

impl EmbeddedResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource under the given logical name.
    #[must_use]
    pub fn with_resource(mut self, name: &str, contents: impl Into<Arc<[u8]>>) -> Self {
        self.resources
            .insert(normalize_name(name).to_string(), contents.into());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(normalize_name(name))
    }
}

impl ResourceLocator for EmbeddedResources {
    fn open(&self, name: &str) -> std::io::Result<Option<Box<dyn ArchiveReader>>> {
        Ok(self
            .resources
            .get(normalize_name(name))
            .map(|contents| Box::new(Cursor::new(contents.clone())) as Box<dyn ArchiveReader>))
    }
}

/// An ordered list of directories the logical name is resolved against.
#[derive(Debug, Clone, Default)]
pub struct SearchPath {
    roots: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Returns the first existing file for `name` below one of the roots.
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        self.roots
            .iter()
            .map(|root| resolve_in(root, name))
            .find(|candidate| candidate.is_file())
    }
}

impl ResourceLocator for SearchPath {
    fn open(&self, name: &str) -> std::io::Result<Option<Box<dyn ArchiveReader>>> {
        for root in &self.roots {
            let candidate = resolve_in(root, name);
            if !candidate.is_file() {
                continue;
            }
            match fs_err::File::open(&candidate) {
                Ok(file) => {
                    tracing::debug!("found '{name}' at {}", candidate.display());
                    return Ok(Some(Box::new(BufReader::new(file))));
                }
                // Raced with a removal, keep looking.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

/// Strips leading delimiters so `/db/x.jar` and `db/x.jar` name the same
/// resource.
fn normalize_name(name: &str) -> &str {
    name.trim_start_matches(consts::FILE_DELIM)
}

fn resolve_in(root: &Path, name: &str) -> PathBuf {
    normalize_name(name)
        .split(consts::FILE_DELIM)
        .filter(|segment| !segment.is_empty())
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}
