use std::{
    collections::BTreeSet as Set,
    path::{Path, PathBuf},
    str::FromStr,
};

use itertools::Itertools;
use miette::{IntoDiagnostic, miette};
use sampledb_consts::consts;
use serde::{Deserialize, Serialize};

/// Settings that control where and how the working copy of the sample
/// database is provisioned.
///
/// Every field is optional, use the accessor methods to get the value with
/// defaults applied.
#[derive(Clone, Default, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Directory below which working directories are created. Defaults to
    /// the system temp directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    /// Prefix of the working directory names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir_prefix: Option<String>,

    /// Logical name of the bundled archive, e.g. `db/BirtSample.jar`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,

    /// Directories searched for the archive when it is not embedded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_path: Vec<PathBuf>,

    /// Size of the buffer used to copy archive entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,

    /// Whether directories that could not be removed are retried when the
    /// process exits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer_on_exit: Option<bool>,

    /// The locations this config was loaded from.
    #[serde(skip)]
    pub loaded_from: Vec<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("no file was found at {0}")]
    FileNotFound(PathBuf),
    #[error("failed to read config from '{0}'")]
    ReadError(std::io::Error),
    #[error("failed to parse config of {1}: {0}")]
    ParseError(miette::Report, PathBuf),
    #[error("validation error of {1}: {0}")]
    ValidationError(miette::Report, PathBuf),
    #[error("invalid environment override: {0}")]
    EnvironmentError(miette::Report),
}

impl Config {
    /// Parse the given toml string and return a Config instance.
    ///
    /// # Returns
    ///
    /// The parsed config, and the unused keys
    ///
    /// # Errors
    ///
    /// Parsing errors
    pub fn from_toml(toml: &str) -> miette::Result<(Config, Set<String>)> {
        let de = toml_edit::de::Deserializer::from_str(toml).into_diagnostic()?;

        let mut unused_keys = Set::new();
        let config: Config = serde_ignored::deserialize(de, |path| {
            unused_keys.insert(path.to_string());
        })
        .into_diagnostic()?;

        Ok((config, unused_keys))
    }

    /// Load the config from the given path.
    ///
    /// # Errors
    ///
    /// I/O errors, parsing errors or validation errors
    pub fn from_path(path: &Path) -> Result<Config, ConfigError> {
        tracing::debug!("Loading config from {}", path.display());
        let s = match fs_err::read_to_string(path) {
            Ok(content) => content,
            Err(e)
                if e.kind() == std::io::ErrorKind::NotFound
                    || e.kind() == std::io::ErrorKind::NotADirectory =>
            {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(ConfigError::ReadError(e)),
        };

        let (mut config, unused_keys) =
            Config::from_toml(&s).map_err(|e| ConfigError::ParseError(e, path.to_path_buf()))?;

        if !unused_keys.is_empty() {
            tracing::warn!(
                "Ignoring '{}' in {}",
                console::style(unused_keys.iter().join(", ")).yellow(),
                path.display()
            );
        }

        config.loaded_from.push(path.to_path_buf());

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e, path.to_path_buf()))?;

        Ok(config)
    }

    /// Reads the overrides from the `SAMPLEDB_*` environment variables.
    pub fn from_env() -> Config {
        let temp_dir = std::env::var_os(consts::ENV_TEMP_DIR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let search_path = std::env::var_os(consts::ENV_SEARCH_PATH)
            .map(|paths| {
                std::env::split_paths(&paths)
                    .filter(|p| !p.as_os_str().is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Config {
            temp_dir,
            search_path,
            ..Config::default()
        }
    }

    /// Load the config file at `path` (if given) and layer the environment
    /// overrides on top of it.
    ///
    /// A missing file is not an error, the defaults are used instead.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        if let Some(path) = path {
            match Self::from_path(path) {
                Ok(c) => config = config.merge_config(c),
                Err(ConfigError::FileNotFound(_)) => {
                    tracing::debug!("No config found at {}, using defaults", path.display())
                }
                Err(e) => return Err(e),
            }
        }

        let config = config.merge_config(Self::from_env());
        config.validate().map_err(ConfigError::EnvironmentError)?;
        Ok(config)
    }

    /// Validate the config.
    pub fn validate(&self) -> miette::Result<()> {
        if let Some(temp_dir) = &self.temp_dir
            && !temp_dir.is_absolute()
        {
            return Err(miette!(
                "The `temp-dir` path must be an absolute path: {}",
                temp_dir.display()
            ));
        }

        if self.buffer_size == Some(0) {
            return Err(miette!("The `buffer-size` must be larger than zero"));
        }

        if let Some(prefix) = &self.dir_prefix
            && (prefix.is_empty() || prefix.contains(['/', '\\']))
        {
            return Err(miette!(
                "The `dir-prefix` must be a non-empty file name: '{prefix}'"
            ));
        }

        Ok(())
    }

    /// Merge the given config into the current one. The given config has
    /// higher priority.
    #[must_use]
    pub fn merge_config(mut self, other: Config) -> Self {
        self.loaded_from.extend(other.loaded_from);

        Self {
            temp_dir: other.temp_dir.or(self.temp_dir),
            dir_prefix: other.dir_prefix.or(self.dir_prefix),
            archive: other.archive.or(self.archive),
            search_path: if other.search_path.is_empty() {
                self.search_path
            } else {
                other.search_path
            },
            buffer_size: other.buffer_size.or(self.buffer_size),
            defer_on_exit: other.defer_on_exit.or(self.defer_on_exit),
            loaded_from: self.loaded_from,
        }
    }

    /// The directory below which working directories are created.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn dir_prefix(&self) -> &str {
        self.dir_prefix
            .as_deref()
            .unwrap_or(consts::WORKING_DIR_PREFIX)
    }

    /// The logical name the bundled archive is looked up by.
    pub fn archive(&self) -> String {
        self.archive
            .clone()
            .unwrap_or_else(consts::default_archive_name)
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
            .unwrap_or(consts::DEFAULT_COPY_BUFFER_SIZE)
    }

    pub fn defer_on_exit(&self) -> bool {
        self.defer_on_exit.unwrap_or(true)
    }
}
