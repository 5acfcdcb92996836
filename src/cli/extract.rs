use std::path::PathBuf;

use clap::Parser;
use miette::{Context, IntoDiagnostic};
use sampledb_consts::consts;
use sampledb_extract::{ExtractOptions, extract_zip_file};

use super::GlobalOptions;

/// Unpacks a zip or jar archive into a directory.
#[derive(Debug, Parser)]
pub struct Args {
    /// The archive to unpack
    pub archive: PathBuf,

    /// The directory to unpack into, created if it does not exist
    pub destination: PathBuf,
}

pub fn execute(args: Args, global_options: &GlobalOptions) -> miette::Result<()> {
    let config = global_options.load_config()?;
    let options = ExtractOptions {
        buffer_size: config.buffer_size(),
    };

    let summary = extract_zip_file(&args.archive, &args.destination, &options)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to extract {}", args.archive.display()))?;

    eprintln!(
        "{}Extracted {} files ({} bytes) and {} directories into {}",
        console::style(console::Emoji("✔ ", "")).green(),
        summary.files,
        summary.bytes,
        summary.directories,
        consts::PATH_STYLE.apply_to(args.destination.display())
    );
    Ok(())
}
