//! # sampledb CLI
//!
//! - The [`Command`] enum defines the available sub commands.
//! - [`execute_command`] matches on [`Command`] and calls the corresponding logic.
#![deny(clippy::dbg_macro, clippy::unwrap_used)]

use std::{env, path::PathBuf};

use clap::{
    Parser,
    builder::styling::{AnsiColor, Color, Style},
};
use miette::IntoDiagnostic;
use sampledb_config::Config;
use sampledb_consts::consts;
use sampledb_provision::DeferredRemovals;
use tracing::level_filters::LevelFilter;

pub mod descriptor;
pub mod extract;
pub mod provision;
pub mod remove;

#[derive(Parser, Debug)]
#[command(
    name = "sampledb",
    version(consts::SAMPLEDB_VERSION),
    about = "Provision private working copies of the bundled sample database"
)]
#[clap(arg_required_else_help = true, styles = get_styles())]
pub struct Args {
    #[command(subcommand)]
    command: Command,

    #[clap(flatten)]
    global_options: GlobalOptions,
}

#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Increase logging verbosity (-v for warnings, -vv for info, -vvv for debug, -vvvv for trace)
    #[clap(short, long, action = clap::ArgAction::Count, global = true, help_heading = consts::CLAP_GLOBAL_OPTIONS)]
    verbose: u8,

    /// Decrease logging verbosity (quiet mode)
    #[clap(short, long, action = clap::ArgAction::Count, global = true, help_heading = consts::CLAP_GLOBAL_OPTIONS)]
    quiet: u8,

    /// The configuration file to use, defaults to `sampledb.toml` in the
    /// current directory
    #[clap(long, global = true, env = consts::ENV_CONFIG, help_heading = consts::CLAP_GLOBAL_OPTIONS)]
    config: Option<PathBuf>,
}

impl GlobalOptions {
    /// Loads the configuration file and the environment overrides.
    pub fn load_config(&self) -> miette::Result<Config> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(consts::CONFIG_FILE));
        Config::load(Some(&path)).into_diagnostic()
    }
}

impl Args {
    /// Determine the log level filter based on verbose and quiet counts.
    fn log_level_filter(&self) -> LevelFilter {
        match (self.global_options.quiet, self.global_options.verbose) {
            // Quiet mode overrides verbose
            (q, _) if q > 0 => LevelFilter::OFF,
            (_, 0) => LevelFilter::ERROR,
            (_, 1) => LevelFilter::WARN,
            (_, 2) => LevelFilter::INFO,
            (_, 3) => LevelFilter::DEBUG,
            (_, _) => LevelFilter::TRACE,
        }
    }
}

#[derive(Parser, Debug)]
pub enum Command {
    Extract(extract::Args),
    Provision(provision::Args),
    Remove(remove::Args),
    Descriptor(descriptor::Args),
}

pub fn execute() -> miette::Result<()> {
    let args = Args::parse();

    let use_colors = console::colors_enabled_stderr();
    let in_ci = matches!(env::var("CI").as_deref(), Ok("1" | "true"));
    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::default()
                .color(use_colors)
                .wrap_lines(!in_ci)
                .build(),
        )
    }))?;

    setup_logging(&args, use_colors)?;

    // Directories that survived their teardown are retried on the way out.
    let _exit_guard = DeferredRemovals::process().guard();

    execute_command(args.command, &args.global_options)
}

fn setup_logging(args: &Args, use_colors: bool) -> miette::Result<()> {
    use tracing_subscriber::{
        EnvFilter, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
    };

    let (level_filter, sampledb_level) = match args.log_level_filter() {
        LevelFilter::OFF => (LevelFilter::OFF, LevelFilter::OFF),
        LevelFilter::ERROR => (LevelFilter::ERROR, LevelFilter::WARN),
        LevelFilter::WARN => (LevelFilter::WARN, LevelFilter::INFO),
        LevelFilter::INFO => (LevelFilter::INFO, LevelFilter::DEBUG),
        LevelFilter::DEBUG => (LevelFilter::DEBUG, LevelFilter::TRACE),
        LevelFilter::TRACE => (LevelFilter::TRACE, LevelFilter::TRACE),
    };

    let directives = format!(
        "sampledb={sampledb_level},sampledb_config={sampledb_level},sampledb_extract={sampledb_level},sampledb_provision={sampledb_level}"
    );

    // Explicit -v/-q flags win over RUST_LOG.
    let cli_verbosity_set = args.global_options.verbose > 0 || args.global_options.quiet > 0;
    let directives = match env::var("RUST_LOG") {
        Ok(env_directives) if !cli_verbosity_set && !env_directives.is_empty() => {
            format!("{directives},{env_directives}")
        }
        _ => directives,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .parse(&directives)
        .into_diagnostic()?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(use_colors)
        .with_target(sampledb_level >= LevelFilter::DEBUG)
        .with_writer(std::io::stderr)
        .without_time();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
    Ok(())
}

/// Maps command enum variants to their actual function handlers.
pub fn execute_command(command: Command, global_options: &GlobalOptions) -> miette::Result<()> {
    match command {
        Command::Extract(cmd) => extract::execute(cmd, global_options),
        Command::Provision(cmd) => provision::execute(cmd, global_options),
        Command::Remove(cmd) => remove::execute(cmd),
        Command::Descriptor(cmd) => descriptor::execute(cmd),
    }
}

pub fn get_styles() -> clap::builder::Styles {
    let heading = Style::new()
        .bold()
        .underline()
        .fg_color(Some(Color::Ansi(AnsiColor::BrightGreen)));
    clap::builder::Styles::styled()
        .usage(heading)
        .header(heading)
        .literal(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightCyan))))
        .error(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
}
