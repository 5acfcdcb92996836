use std::{path::PathBuf, sync::mpsc};

use clap::Parser;
use miette::{Context, IntoDiagnostic};
use sampledb_config::Config;
use sampledb_consts::consts;
use sampledb_provision::{Provisioner, SearchPath};

use super::GlobalOptions;

/// Provisions a working copy of the sample database, prints how to reach it
/// and removes it again.
#[derive(Debug, Parser)]
pub struct Args {
    /// A directory that contains `db/BirtSample.jar`, can be given multiple
    /// times. Takes precedence over the configured search path.
    #[clap(long = "archive-dir", value_name = "DIR")]
    pub archive_dir: Vec<PathBuf>,

    /// Keep the working copy until Ctrl-C is pressed
    #[clap(long)]
    pub hold: bool,
}

pub fn execute(args: Args, global_options: &GlobalOptions) -> miette::Result<()> {
    let config = global_options.load_config()?.merge_config(Config {
        search_path: args.archive_dir,
        ..Config::default()
    });

    let mut provisioner = Provisioner::from_config(&config);
    if config.search_path().is_empty() {
        let cwd = std::env::current_dir()
            .into_diagnostic()
            .wrap_err("failed to determine the current directory")?;
        provisioner = provisioner.with_locator(SearchPath::new([cwd]));
    }

    let descriptor = provisioner.acquire()?;
    let working_dir = provisioner.working_dir().unwrap_or_default();
    println!("{}", consts::DESCRIPTOR_STYLE.apply_to(&descriptor));
    eprintln!(
        "{}Provisioned {} at {}",
        console::style(console::Emoji("✔ ", "")).green(),
        provisioner.archive(),
        consts::PATH_STYLE.apply_to(working_dir.display())
    );

    if args.hold {
        wait_for_ctrl_c()?;
    }

    let Some(report) = provisioner.release() else {
        return Ok(());
    };
    for warning in &report.warnings {
        eprintln!(
            "{}{}",
            consts::WARNING_STYLE.apply_to("warning: "),
            warning
        );
    }
    if report.is_clean() {
        eprintln!(
            "{}Removed {}",
            console::style(console::Emoji("✔ ", "")).green(),
            consts::PATH_STYLE.apply_to(report.working_dir.display())
        );
    }
    Ok(())
}

fn wait_for_ctrl_c() -> miette::Result<()> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .into_diagnostic()
    .wrap_err("failed to install the Ctrl-C handler")?;

    eprintln!("Holding the working copy, press Ctrl-C to release it");
    rx.recv()
        .into_diagnostic()
        .wrap_err("the Ctrl-C handler went away")
}
