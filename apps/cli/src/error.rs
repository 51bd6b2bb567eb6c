//! Errors of the command line front end.

use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(transparent)]
    Core { source: udisks_glue_core::Error },

    #[snafu(display("failed to daemonize"))]
    Daemonize { source: nix::Error },

    #[snafu(display("failed to block termination signals"))]
    SignalMask { source: nix::Error },

    #[snafu(display("device monitor exited"))]
    MonitorExited,

    #[snafu(display("failed to read events from {}", path.display()))]
    ReplayRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("invalid event on line {line}"))]
    ReplayParse {
        line: usize,
        source: serde_json::Error,
    },

    #[snafu(display("unsupported value for {name} on line {line}: {value}"))]
    ReplayValue {
        line: usize,
        name: String,
        value: String,
    },
}

pub type Result<T> = std::result::Result<T, CliError>;
