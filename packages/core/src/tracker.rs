//! Tracked-object table and bus signal handling.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::command::Dispatcher;
use crate::error::Result;
use crate::matches::MatchRegistry;
use crate::property::DeviceBus;
use crate::tracked::{Context, Status, TrackedObject};

/// A device signal, carrying the object path of the affected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Added(String),
    Changed(String),
    Removed(String),
}

impl DeviceEvent {
    pub fn path(&self) -> &str {
        match self {
            Self::Added(path) | Self::Changed(path) | Self::Removed(path) => path,
        }
    }
}

/// Owns every tracked device and routes signals to them.
///
/// Signals are handled one at a time, in delivery order. Command hooks run
/// synchronously, so a slow command delays the next signal.
#[derive(Debug)]
pub struct DeviceTracker<B> {
    bus: B,
    matches: MatchRegistry,
    dispatcher: Dispatcher,
    objects: HashMap<String, TrackedObject>,
}

impl<B: DeviceBus> DeviceTracker<B> {
    pub fn new(bus: B, matches: MatchRegistry, dispatcher: Dispatcher) -> Self {
        Self {
            bus,
            matches,
            dispatcher,
            objects: HashMap::new(),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn matches(&self) -> &MatchRegistry {
        &self.matches
    }

    /// Starts tracking every device the bus currently knows about.
    ///
    /// Returns the number of devices now tracked.
    pub fn load_existing(&mut self) -> Result<usize> {
        let paths = self.bus.enumerate_devices()?;
        debug!("Enumerated {} devices", paths.len());
        for path in &paths {
            self.device_added(path);
        }
        Ok(self.objects.len())
    }

    pub fn handle(&mut self, event: &DeviceEvent) {
        match event {
            DeviceEvent::Added(path) => self.device_added(path),
            DeviceEvent::Changed(path) => self.device_changed(path),
            DeviceEvent::Removed(path) => self.device_removed(path),
        }
    }

    pub fn device_added(&mut self, path: &str) {
        if self.objects.contains_key(path) {
            debug!("{} is already tracked", path);
            self.device_changed(path);
            return;
        }

        let ctx = Context {
            bus: &self.bus,
            matches: &self.matches,
            dispatcher: &self.dispatcher,
        };
        match TrackedObject::create(path, &ctx) {
            Ok(Some(tobj)) => {
                self.objects.insert(path.to_string(), tobj);
            }
            Ok(None) => debug!("Ignoring system internal device {}", path),
            Err(e) => warn!("Unable to track {}: {}", path, e),
        }
    }

    pub fn device_changed(&mut self, path: &str) {
        let ctx = Context {
            bus: &self.bus,
            matches: &self.matches,
            dispatcher: &self.dispatcher,
        };
        match self.objects.get_mut(path) {
            Some(tobj) => {
                tobj.advance(&ctx);
            }
            None => debug!("Change of untracked device {}", path),
        }
    }

    pub fn device_removed(&mut self, path: &str) {
        let ctx = Context {
            bus: &self.bus,
            matches: &self.matches,
            dispatcher: &self.dispatcher,
        };
        match self.objects.remove(path) {
            Some(tobj) => tobj.remove(&ctx),
            None => debug!("Removal of untracked device {}", path),
        }
    }

    pub fn get(&self, path: &str) -> Option<&TrackedObject> {
        self.objects.get(path)
    }

    pub fn status(&self, path: &str) -> Option<Status> {
        self.objects.get(path).map(TrackedObject::status)
    }

    /// Tracked devices, sorted by object path.
    pub fn tracked(&self) -> Vec<&TrackedObject> {
        let mut tracked: Vec<_> = self.objects.values().collect();
        tracked.sort_by(|a, b| a.path().cmp(b.path()));
        tracked
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Stops tracking everything without running any hook.
    pub fn shutdown(&mut self) {
        info!("Forgetting {} tracked devices", self.objects.len());
        self.objects.clear();
    }
}
