//! Daemon mode and configuration check.
//!
//! The daemon subscribes to the UDisks signals, picks up every device that
//! already exists, then handles signals one at a time until the monitor
//! goes away or a termination signal arrives. Hooks run synchronously, in
//! signal order.

use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use nix::sys::signal::{SigSet, Signal};
use snafu::ResultExt;
use tracing::{info, warn};
use udisks_glue_core::udisks::SignalMonitor;
use udisks_glue_core::{
    CommandKind, Config, DeviceBus, DeviceEvent, DeviceTracker, Dispatcher, Match, MatchRegistry,
    ShellRunner, UdisksClient,
};

use crate::error::{DaemonizeSnafu, MonitorExitedSnafu, Result, SignalMaskSnafu};

/// Input of the daemon loop, fed by the monitor and signal threads.
enum Input {
    Device(udisks_glue_core::Result<DeviceEvent>),
    MonitorClosed,
    Terminate(Signal),
}

/// Loads the configuration and runs until the signal monitor exits or the
/// process is asked to terminate.
pub fn run(config_path: &Path, foreground: bool) -> Result<()> {
    let matches = Config::load(config_path)?.build()?;
    info!(
        "Loaded {} match rules from {}",
        matches.rules().len(),
        config_path.display()
    );

    if !foreground {
        nix::unistd::daemon(false, false).context(DaemonizeSnafu)?;
    }

    // Blocked before any thread exists so that every thread inherits the mask.
    let signals = termination_signals();
    signals.thread_block().context(SignalMaskSnafu)?;

    let (tx, rx) = mpsc::channel();
    wait_for_termination(signals, tx.clone());

    let runner = ShellRunner::new();
    info!("Running commands with {}", runner.shell());
    let client = UdisksClient::system()?;

    // Subscribe before enumerating so no device slips in between.
    forward_events(SignalMonitor::new(client.connection())?, tx);
    let mut tracker = DeviceTracker::new(client, matches, Dispatcher::new(runner));
    let tracked = tracker.load_existing()?;
    info!("Tracking {} devices", tracked);

    drive(&mut tracker, &rx)
}

fn termination_signals() -> SigSet {
    let mut signals = SigSet::empty();
    for signal in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGQUIT] {
        signals.add(signal);
    }
    signals
}

fn wait_for_termination(signals: SigSet, tx: Sender<Input>) {
    thread::spawn(move || match signals.wait() {
        Ok(signal) => {
            let _ = tx.send(Input::Terminate(signal));
        }
        Err(e) => warn!("Failed to wait for termination signals: {}", e),
    });
}

fn forward_events(monitor: SignalMonitor, tx: Sender<Input>) {
    thread::spawn(move || {
        for event in monitor {
            if tx.send(Input::Device(event)).is_err() {
                return;
            }
        }
        let _ = tx.send(Input::MonitorClosed);
    });
}

/// Handles inputs in arrival order until termination or monitor loss.
fn drive<B: DeviceBus>(tracker: &mut DeviceTracker<B>, inputs: &Receiver<Input>) -> Result<()> {
    for input in inputs {
        match input {
            Input::Device(Ok(event)) => tracker.handle(&event),
            Input::Device(Err(e)) => {
                warn!("{}", e);
                break;
            }
            Input::MonitorClosed => break,
            Input::Terminate(signal) => {
                info!("Received {}, exiting", signal.as_str());
                tracker.shutdown();
                return Ok(());
            }
        }
    }

    tracker.shutdown();
    MonitorExitedSnafu.fail()
}

/// Validates the configuration and prints its rules.
pub fn check(config_path: &Path) -> Result<()> {
    let matches = Config::load(config_path)?.build()?;
    println!("{}: OK", config_path.display());
    print!("{}", summary(&matches));
    Ok(())
}

fn summary(matches: &MatchRegistry) -> String {
    let mut out = format!("{} filters\n", matches.filters().len());
    for (index, rule) in matches.rules().iter().enumerate() {
        out.push_str(&format!("match #{} ({})\n", index + 1, rule.name()));
        describe(&mut out, rule);
    }
    match matches.default_match() {
        Some(default) => {
            out.push_str("default\n");
            describe(&mut out, default);
        }
        None => out.push_str("no default match\n"),
    }
    out
}

fn describe(out: &mut String, rule: &Match) {
    for kind in [
        CommandKind::PostInsertion,
        CommandKind::PostMount,
        CommandKind::PostUnmount,
        CommandKind::PostRemoval,
    ] {
        if let Some(command) = rule.command(kind) {
            out.push_str(&format!("  {} = {}\n", kind, command));
        }
    }
    if let Some(automount) = rule.automount() {
        let filesystem = if automount.filesystem.is_empty() {
            "auto"
        } else {
            automount.filesystem.as_str()
        };
        out.push_str(&format!(
            "  automount = {} [{}]\n",
            filesystem,
            automount.options.join(",")
        ));
    }
}
