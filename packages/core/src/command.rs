//! Command template expansion and execution.
//!
//! Templates are plain shell command lines with `%device_file` and
//! `%mount_point` tokens. Substitution is literal: no quoting is applied, the
//! expanded line is handed to the shell as-is.

use std::fmt;
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::error::{Error, IoResultExt, Result};

/// Token replaced by the device file (e.g. `/dev/sdb1`).
pub const DEVICE_FILE_TOKEN: &str = "%device_file";

/// Token replaced by the mount point (e.g. `/media/disk`).
pub const MOUNT_POINT_TOKEN: &str = "%mount_point";

/// Shell used when `$SHELL` is not set.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Lifecycle hook a command template is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    PostInsertion,
    PostMount,
    PostUnmount,
    PostRemoval,
}

impl CommandKind {
    /// Name of the configuration key holding the template.
    pub fn config_key(&self) -> &'static str {
        match self {
            Self::PostInsertion => "post_insertion_command",
            Self::PostMount => "post_mount_command",
            Self::PostUnmount => "post_unmount_command",
            Self::PostRemoval => "post_removal_command",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

/// Substitutes the device tokens of `template`.
///
/// Without a mount point the `%mount_point` token is left untouched.
pub fn expand(template: &str, device_file: &str, mount_point: Option<&str>) -> String {
    let expanded = template.replace(DEVICE_FILE_TOKEN, device_file);
    match mount_point {
        Some(mount_point) => expanded.replace(MOUNT_POINT_TOKEN, mount_point),
        None => expanded,
    }
}

/// Runs expanded command lines.
pub trait CommandRunner {
    fn run(&self, command: &str) -> Result<()>;
}

/// Runs commands through the user's shell and waits for them to finish.
///
/// The shell is taken from `$SHELL` once, at construction.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellRunner {
    pub fn new() -> Self {
        let shell = std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SHELL.to_string());
        Self { shell }
    }

    /// Creates a runner that uses a specific shell.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<()> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .command_context(command)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(Error::CommandExit {
                command: command.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }
}

/// Expands templates and hands them to a [`CommandRunner`].
///
/// Failures are logged and swallowed: hooks are side effects and never gate
/// a state transition.
pub struct Dispatcher {
    runner: Box<dyn CommandRunner>,
}

impl Dispatcher {
    pub fn new(runner: impl CommandRunner + 'static) -> Self {
        Self {
            runner: Box::new(runner),
        }
    }

    /// Expands and runs `template` for a device.
    pub fn dispatch(
        &self,
        kind: CommandKind,
        template: &str,
        device_file: &str,
        mount_point: Option<&str>,
    ) {
        let command = expand(template, device_file, mount_point);
        info!(hook = %kind, "Running command: {}", command);
        if let Err(e) = self.runner.run(&command) {
            warn!(hook = %kind, "{}", e);
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
