//! Unified error types for the udisks-glue-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error`) appears in different contexts.

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The bus could not deliver a device property.
    #[snafu(display("unable to get property \"{name}\" of {path}: {message}"))]
    PropertyFetch {
        path: String,
        name: String,
        message: String,
    },

    /// A property was delivered with a different type than requested.
    #[snafu(display("property \"{name}\" is {found}, expected {expected}"))]
    PropertyType {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The bus delivered a value that has no property representation.
    #[snafu(display("failed to convert bus value: {message}"))]
    BusParse { message: String },

    /// A D-Bus operation other than a property read failed.
    #[snafu(display("failed to {operation}"))]
    Dbus {
        operation: String,
        source: zbus::Error,
    },

    /// The service refused to mount a device.
    #[snafu(display("failed to mount {path}: {message}"))]
    Mount { path: String, message: String },

    /// Failed to execute a system command.
    #[snafu(display("failed to execute command '{command}'"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// Command executed but returned non-zero exit code.
    #[snafu(display("command '{command}' exited with code {code}: {stderr}"))]
    CommandExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Configuration file cannot be read.
    #[snafu(display("failed to read configuration at {}", path.display()))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration file is not valid.
    #[snafu(display("failed to parse configuration at {}", path.display()))]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// No configuration file was given and none of the defaults exist.
    #[snafu(display("unable to find the configuration file (tried {})", tried.join(", ")))]
    ConfigNotFound { tried: Vec<String> },

    /// A match references a filter that was never defined.
    #[snafu(display("unknown filter {filter}"))]
    UnknownFilter { filter: String },
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for command execution errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;

    /// Add context for configuration read errors.
    fn config_read_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandExecutionSnafu {
            command: command.into(),
        })
    }

    fn config_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(ConfigReadSnafu { path: path.into() })
    }
}
