//! udisks-glue: run commands when removable media comes and goes.
//!
//! Without a subcommand the program watches the UDisks service and runs the
//! configured hooks. `check` validates a configuration, `replay` drives the
//! rules from a recorded event file instead of the system bus.

mod daemon;
mod error;
mod replay;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::error::Result;

/// Runs commands on UDisks device events.
#[derive(Parser)]
#[command(name = "udisks-glue")]
#[command(about = "Run commands when removable media is inserted, mounted, unmounted or removed", long_about = None)]
struct Cli {
    /// Configuration file to use instead of the default locations.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Stay in the foreground instead of detaching.
    #[arg(short, long)]
    foreground: bool,

    /// Log debug messages.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print the rules it defines.
    Check,

    /// Feed recorded device events through the rules.
    ///
    /// Each line of the file is a JSON object such as
    /// `{"event": "changed", "path": "/org/freedesktop/UDisks/devices/sdb1",
    /// "properties": {"DeviceIsMounted": true}}`.
    Replay {
        /// JSON lines event file.
        file: PathBuf,

        /// Print commands instead of running them.
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config_path = udisks_glue_core::config::locate(cli.config.as_deref())?;

    match cli.command {
        None => daemon::run(&config_path, cli.foreground),
        Some(Commands::Check) => daemon::check(&config_path),
        Some(Commands::Replay { file, dry_run }) => replay::run(&config_path, &file, dry_run),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", snafu::Report::from_error(e));
        std::process::exit(1);
    }
}
