//! Replays recorded device events against a configuration.
//!
//! Events are read from a JSON lines file. Each record updates the simulated
//! device's properties, then the event is handled exactly as the daemon
//! would handle the matching signal.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use snafu::ResultExt;
use tracing::info;
use udisks_glue_core::{
    CommandRunner, Config, DeviceEvent, DeviceTracker, Dispatcher, MemoryBus, PropertyValue,
    ShellRunner,
};

use crate::error::{CliError, ReplayParseSnafu, ReplayReadSnafu, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum EventKind {
    Added,
    Changed,
    Removed,
}

/// One line of a replay file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Record {
    event: EventKind,
    path: String,
    #[serde(default)]
    properties: BTreeMap<String, serde_json::Value>,
}

/// Logs commands instead of running them.
struct DryRun;

impl CommandRunner for DryRun {
    fn run(&self, command: &str) -> udisks_glue_core::Result<()> {
        println!("would run: {}", command);
        Ok(())
    }
}

pub fn run(config_path: &Path, events_path: &Path, dry_run: bool) -> Result<()> {
    let matches = Config::load(config_path)?.build()?;
    let dispatcher = if dry_run {
        Dispatcher::new(DryRun)
    } else {
        Dispatcher::new(ShellRunner::new())
    };
    let mut tracker = DeviceTracker::new(MemoryBus::new(), matches, dispatcher);

    let file = File::open(events_path).context(ReplayReadSnafu {
        path: events_path,
    })?;
    let handled = replay(&mut tracker, BufReader::new(file), events_path)?;
    info!("Replayed {} events", handled);

    for tobj in tracker.tracked() {
        println!(
            "{} {} {}",
            tobj.device_file(),
            tobj.status(),
            tobj.known_mount_point().unwrap_or("-")
        );
    }
    Ok(())
}

/// Applies every record of `reader` to the tracker's bus and tracker.
fn replay(
    tracker: &mut DeviceTracker<MemoryBus>,
    reader: impl BufRead,
    path: &Path,
) -> Result<usize> {
    let mut handled = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = line.context(ReplayReadSnafu { path })?;
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let number = index + 1;
        let record: Record =
            serde_json::from_str(&line).context(ReplayParseSnafu { line: number })?;

        for (name, value) in &record.properties {
            let value = property_value(value).ok_or_else(|| CliError::ReplayValue {
                line: number,
                name: name.clone(),
                value: value.to_string(),
            })?;
            tracker.bus().set(&record.path, name, value);
        }

        let event = match record.event {
            EventKind::Added => DeviceEvent::Added(record.path),
            EventKind::Changed => DeviceEvent::Changed(record.path),
            EventKind::Removed => {
                tracker.bus().remove_device(&record.path);
                DeviceEvent::Removed(record.path)
            }
        };
        tracker.handle(&event);
        handled += 1;
    }
    Ok(handled)
}

/// Maps a JSON value onto the closest bus type.
///
/// Non-negative integers become `uint32` when they fit, which is what the
/// track counters use.
fn property_value(value: &serde_json::Value) -> Option<PropertyValue> {
    use serde_json::Value;

    match value {
        Value::Bool(b) => Some(PropertyValue::Bool(*b)),
        Value::String(s) => Some(PropertyValue::String(s.clone())),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .map(PropertyValue::StringList),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(match u32::try_from(u) {
                    Ok(small) => PropertyValue::U32(small),
                    Err(_) => PropertyValue::U64(u),
                })
            } else {
                let i = n.as_i64()?;
                Some(match i32::try_from(i) {
                    Ok(small) => PropertyValue::I32(small),
                    Err(_) => PropertyValue::I64(i),
                })
            }
        }
        Value::Null | Value::Object(_) => None,
    }
}
