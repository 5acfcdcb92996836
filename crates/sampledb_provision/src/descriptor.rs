use std::path::Path;

use sampledb_consts::consts;

/// How connection descriptors for the sample database are spelled.
///
/// A descriptor is derived from the working directory alone: a provisioned
/// copy is addressed as `<scheme><working-dir>/<database-name>`, without a
/// working copy the `fallback` descriptor is used, which points the engine at
/// the read-only database inside the bundled archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorFormat {
    pub scheme: String,
    pub database_name: String,
    pub fallback: String,
    /// Passed to the [`crate::EngineShutdown`] hook on teardown.
    pub shutdown: String,
}

impl Default for DescriptorFormat {
    fn default() -> Self {
        Self {
            scheme: consts::JDBC_DERBY.to_string(),
            database_name: consts::SAMPLE_DB_NAME.to_string(),
            fallback: consts::JDBC_DERBY_CLASSPATH_SAMPLE.to_string(),
            shutdown: consts::JDBC_DERBY_SHUTDOWN.to_string(),
        }
    }
}

impl DescriptorFormat {
    /// Returns the descriptor for the given working directory, or the
    /// fallback descriptor if there is none.
    pub fn resolve(&self, working_dir: Option<&Path>) -> String {
        match working_dir {
            Some(dir) => format!(
                "{}{}{}{}",
                self.scheme,
                dir.display(),
                consts::FILE_DELIM,
                self.database_name
            ),
            None => self.fallback.clone(),
        }
    }
}
