use std::sync::LazyLock;

use console::Style;

/// Directory inside the bundled resources that holds the database archive.
pub const SAMPLE_DB_HOME_DIR: &str = "db";
pub const SAMPLE_DB_ARCHIVE_FILE: &str = "BirtSample.jar";
pub const SAMPLE_DB_SCHEMA: &str = "ClassicModels";
pub const SAMPLE_DB_NAME: &str = "BirtSample";

pub const FILE_DELIM: &str = "/";

pub const JDBC_DERBY: &str = "jdbc:derby:";
pub const JDBC_DERBY_CLASSPATH_SAMPLE: &str = "jdbc:derby:classpath:BirtSample";
pub const JDBC_DERBY_SHUTDOWN: &str = "jdbc:derby:;shutdown=true";

/// Prefix of every working directory created below the temp directory.
pub const WORKING_DIR_PREFIX: &str = "BIRTSampleDB";

/// Size of the buffer used to copy archive entries to disk.
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 4 * 1024;

pub const CONFIG_FILE: &str = "sampledb.toml";
pub const SAMPLEDB_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const ENV_TEMP_DIR: &str = "SAMPLEDB_TEMP_DIR";
pub const ENV_SEARCH_PATH: &str = "SAMPLEDB_SEARCH_PATH";
pub const ENV_CONFIG: &str = "SAMPLEDB_CONFIG";

pub const CLAP_GLOBAL_OPTIONS: &str = "Global Options";

/// The logical name under which the bundled archive is looked up.
pub fn default_archive_name() -> String {
    format!("{SAMPLE_DB_HOME_DIR}{FILE_DELIM}{SAMPLE_DB_ARCHIVE_FILE}")
}

pub static DESCRIPTOR_STYLE: LazyLock<Style> = LazyLock::new(|| Style::new().cyan());
pub static PATH_STYLE: LazyLock<Style> = LazyLock::new(|| Style::new().bold());
pub static WARNING_STYLE: LazyLock<Style> = LazyLock::new(|| Style::new().yellow());
