use std::path::{Path, PathBuf};

use clap::Parser;
use sampledb_consts::consts;
use sampledb_provision::{DeferredRemovals, remove_directory};

/// Removes a leftover working directory, continuing past failures.
///
/// Whatever cannot be removed right away is retried once more before the
/// command exits.
#[derive(Debug, Parser)]
pub struct Args {
    /// The directory to remove
    pub directory: PathBuf,
}

pub fn execute(args: Args) -> miette::Result<()> {
    if remove_directory(&args.directory) {
        eprintln!(
            "{}Removed {}",
            console::style(console::Emoji("✔ ", "")).green(),
            consts::PATH_STYLE.apply_to(args.directory.display())
        );
        return Ok(());
    }

    DeferredRemovals::process().schedule(&args.directory);
    Err(incomplete_removal(&args.directory))
}

fn incomplete_removal(directory: &Path) -> miette::Report {
    miette::miette!(
        help = "the entries listed above are retried once more before exiting",
        "{} could not be removed completely",
        directory.display()
    )
}
