//! Per-device lifecycle state machine.
//!
//! A [`TrackedObject`] follows one device object path through
//! `NoMedia → Inserted → Mounted` and back, firing the hooks of its match on
//! every transition. State inputs (media availability, mount state, mount
//! paths) are always read live from the bus; rule evaluation goes through the
//! object's private [`PropertyCache`].

use std::fmt;

use tracing::{debug, info, warn};

use crate::cache::PropertyCache;
use crate::command::{CommandKind, Dispatcher};
use crate::error::Result;
use crate::matches::{MatchKey, MatchRegistry};
use crate::property::{DeviceBus, DeviceRef, names};

/// Upper bound on transitions applied for a single signal.
const MAX_STEPS: usize = 4;

/// Lifecycle status of a tracked device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Device present, no usable medium (empty card reader or drive tray).
    NoMedia,
    /// Medium present, not mounted.
    Inserted,
    /// Medium present and mounted at a known path.
    Mounted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoMedia => "no media",
            Self::Inserted => "inserted",
            Self::Mounted => "mounted",
        })
    }
}

/// Everything a tracked object needs from its surroundings.
pub struct Context<'a, B> {
    pub bus: &'a B,
    pub matches: &'a MatchRegistry,
    pub dispatcher: &'a Dispatcher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchSlot {
    Unresolved,
    Resolved(Option<MatchKey>),
}

/// State of one observed device.
#[derive(Debug)]
pub struct TrackedObject {
    path: String,
    status: Status,
    device_file: String,
    mount_point: Option<String>,
    cache: PropertyCache,
    matched: MatchSlot,
}

impl TrackedObject {
    /// Starts tracking the device at `path`.
    ///
    /// The initial status is taken from the current property snapshot, so a
    /// device that is already mounted starts out `Mounted` without firing any
    /// hook. A device that starts out `Inserted` gets its post-insertion hook
    /// and, if configured, an automount attempt.
    ///
    /// Returns `Ok(None)` for system-internal devices, which are never
    /// tracked.
    pub fn create<B: DeviceBus>(path: &str, ctx: &Context<'_, B>) -> Result<Option<Self>> {
        let device = DeviceRef::new(path, ctx.bus);
        if device.fetch_bool(names::DEVICE_IS_SYSTEM_INTERNAL)? {
            return Ok(None);
        }
        let device_file = device.fetch_string(names::DEVICE_FILE)?;

        let mut tobj = Self {
            path: path.to_string(),
            status: Status::NoMedia,
            device_file,
            mount_point: None,
            cache: PropertyCache::new(),
            matched: MatchSlot::Unresolved,
        };

        if tobj.live_bool(ctx, names::DEVICE_IS_MEDIA_AVAILABLE)? {
            tobj.status = Status::Inserted;
            if tobj.live_bool(ctx, names::DEVICE_IS_MOUNTED)? && tobj.mount_point(ctx)?.is_some() {
                tobj.status = Status::Mounted;
            }
        }

        info!("Device added: {} ({})", tobj.device_file, tobj.status);
        tobj.load_match(ctx);

        if tobj.status == Status::Inserted {
            tobj.enter_inserted(ctx);
            tobj.advance(ctx);
        }

        Ok(Some(tobj))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn device_file(&self) -> &str {
        &self.device_file
    }

    /// Mount point recorded for the device, if it is known.
    pub fn known_mount_point(&self) -> Option<&str> {
        self.mount_point.as_deref()
    }

    /// Returns the match resolved for this device, if any has been resolved.
    pub fn resolved_match(&self) -> Option<MatchKey> {
        match self.matched {
            MatchSlot::Resolved(key) => key,
            MatchSlot::Unresolved => None,
        }
    }

    /// Applies transitions until the status no longer changes.
    ///
    /// A transition whose properties cannot be read is abandoned, leaving
    /// the status as it was.
    pub fn advance<B: DeviceBus>(&mut self, ctx: &Context<'_, B>) -> Status {
        for _ in 0..MAX_STEPS {
            match self.step(ctx) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    warn!("Ignoring change of {}: {}", self.device_file, e);
                    break;
                }
            }
        }
        self.status
    }

    /// Runs the hooks owed for a device that disappeared.
    pub fn remove<B: DeviceBus>(mut self, ctx: &Context<'_, B>) {
        match self.status {
            Status::NoMedia => {
                debug!("Device removed without media: {}", self.device_file);
            }
            Status::Inserted => {
                info!("Device removed: {}", self.device_file);
                self.mount_point = None;
                self.run(ctx, CommandKind::PostRemoval);
            }
            Status::Mounted => {
                info!("Device removed while mounted: {}", self.device_file);
                self.run(ctx, CommandKind::PostUnmount);
                self.mount_point = None;
                self.run(ctx, CommandKind::PostRemoval);
            }
        }
    }

    /// Forgets every cached property, the mount point and the match.
    pub fn purge(&mut self) {
        self.cache.purge();
        self.mount_point = None;
        self.matched = MatchSlot::Unresolved;
    }

    fn step<B: DeviceBus>(&mut self, ctx: &Context<'_, B>) -> Result<bool> {
        match self.status {
            Status::NoMedia => {
                if !self.live_bool(ctx, names::DEVICE_IS_MEDIA_AVAILABLE)? {
                    return Ok(false);
                }
                self.purge();
                self.status = Status::Inserted;
                self.load_match(ctx);
                self.enter_inserted(ctx);
                Ok(true)
            }
            Status::Inserted => {
                if !self.live_bool(ctx, names::DEVICE_IS_MEDIA_AVAILABLE)? {
                    info!("Media removed: {}", self.device_file);
                    self.status = Status::NoMedia;
                    // A path returned by an automount that never showed up
                    // as mounted is not a mount point.
                    self.mount_point = None;
                    self.run(ctx, CommandKind::PostRemoval);
                    self.purge();
                    return Ok(true);
                }
                if !self.live_bool(ctx, names::DEVICE_IS_MOUNTED)? {
                    return Ok(false);
                }
                let Some(mount_point) = self.mount_point(ctx)? else {
                    debug!("{} reports mounted without a mount path", self.device_file);
                    return Ok(false);
                };
                info!("Device mounted: {} on {}", self.device_file, mount_point);
                self.status = Status::Mounted;
                self.run(ctx, CommandKind::PostMount);
                Ok(true)
            }
            Status::Mounted => {
                if self.live_bool(ctx, names::DEVICE_IS_MOUNTED)? {
                    return Ok(false);
                }
                let media = self.live_bool(ctx, names::DEVICE_IS_MEDIA_AVAILABLE)?;
                info!("Device unmounted: {}", self.device_file);
                self.run(ctx, CommandKind::PostUnmount);
                self.mount_point = None;

                if media {
                    self.status = Status::Inserted;
                    self.purge();
                    self.load_match(ctx);
                } else {
                    info!("Media removed: {}", self.device_file);
                    self.status = Status::NoMedia;
                    self.run(ctx, CommandKind::PostRemoval);
                    self.purge();
                }
                Ok(true)
            }
        }
    }

    fn enter_inserted<B: DeviceBus>(&mut self, ctx: &Context<'_, B>) {
        info!("Media inserted: {}", self.device_file);
        self.run(ctx, CommandKind::PostInsertion);
        self.automount_if_needed(ctx);
    }

    fn automount_if_needed<B: DeviceBus>(&mut self, ctx: &Context<'_, B>) {
        let Some(key) = self.load_match(ctx) else {
            return;
        };
        let Some(automount) = ctx.matches.get(key).and_then(|m| m.automount()) else {
            return;
        };

        match self.live_bool(ctx, names::DEVICE_IS_MOUNTED) {
            Ok(false) => {}
            Ok(true) => return,
            Err(e) => {
                warn!("Not automounting {}: {}", self.device_file, e);
                return;
            }
        }

        info!("Trying to automount {}...", self.device_file);
        match ctx
            .bus
            .filesystem_mount(&self.path, &automount.filesystem, &automount.options)
        {
            Ok(mount_point) if !mount_point.is_empty() => {
                info!(
                    "Successfully automounted {} at {}",
                    self.device_file, mount_point
                );
                self.mount_point = Some(mount_point);
            }
            Ok(_) => info!("Successfully automounted {}", self.device_file),
            Err(e) => warn!("Failed to automount {}: {}", self.device_file, e),
        }
    }

    /// Resolves the match on first use and remembers the outcome.
    fn load_match<B: DeviceBus>(&mut self, ctx: &Context<'_, B>) -> Option<MatchKey> {
        if let MatchSlot::Resolved(key) = self.matched {
            return key;
        }
        let device = DeviceRef::new(&self.path, ctx.bus);
        let key = ctx.matches.resolve(device, &mut self.cache);
        self.matched = MatchSlot::Resolved(key);
        key
    }

    fn run<B: DeviceBus>(&mut self, ctx: &Context<'_, B>, kind: CommandKind) {
        let template = self
            .load_match(ctx)
            .and_then(|key| ctx.matches.get(key))
            .and_then(|m| m.command(kind));
        match template {
            Some(template) => ctx.dispatcher.dispatch(
                kind,
                template,
                &self.device_file,
                self.mount_point.as_deref(),
            ),
            None => debug!("No {} for {}", kind, self.device_file),
        }
    }

    /// Returns the mount point, fetching the first mount path if unknown.
    fn mount_point<B: DeviceBus>(&mut self, ctx: &Context<'_, B>) -> Result<Option<String>> {
        if let Some(mount_point) = &self.mount_point {
            return Ok(Some(mount_point.clone()));
        }
        let paths =
            DeviceRef::new(&self.path, ctx.bus).fetch_string_list(names::DEVICE_MOUNT_PATHS)?;
        self.mount_point = paths.into_iter().next().filter(|p| !p.is_empty());
        Ok(self.mount_point.clone())
    }

    fn live_bool<B: DeviceBus>(&self, ctx: &Context<'_, B>, name: &str) -> Result<bool> {
        DeviceRef::new(&self.path, ctx.bus).fetch_bool(name)
    }
}
