//! In-memory device bus.
//!
//! [`MemoryBus`] keeps a property table per object path and counts every
//! fetch, which makes it suitable both for tests and for replaying recorded
//! event streams against a configuration without touching real hardware.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::property::{DeviceBus, PropertyAccessor, PropertyValue, names};

/// A mount request received through [`DeviceBus::filesystem_mount`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub path: String,
    pub filesystem: String,
    pub options: Vec<String>,
}

/// Device bus backed by plain maps.
#[derive(Debug)]
pub struct MemoryBus {
    devices: RefCell<BTreeMap<String, HashMap<String, PropertyValue>>>,
    fetches: RefCell<HashMap<(String, String), usize>>,
    mounts: RefCell<Vec<MountRequest>>,
    mount_root: String,
    fail_mounts: Cell<bool>,
    defer_mounts: Cell<bool>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    /// Creates an empty bus that mounts simulated filesystems under `/media`.
    pub fn new() -> Self {
        Self {
            devices: RefCell::default(),
            fetches: RefCell::default(),
            mounts: RefCell::default(),
            mount_root: "/media".to_string(),
            fail_mounts: Cell::new(false),
            defer_mounts: Cell::new(false),
        }
    }

    /// Sets a property, creating the device if needed.
    pub fn set(&self, path: &str, name: &str, value: impl Into<PropertyValue>) {
        self.devices
            .borrow_mut()
            .entry(path.to_string())
            .or_default()
            .insert(name.to_string(), value.into());
    }

    /// Removes a single property from a device.
    pub fn unset(&self, path: &str, name: &str) {
        if let Some(properties) = self.devices.borrow_mut().get_mut(path) {
            properties.remove(name);
        }
    }

    /// Forgets a device entirely; further reads of it fail.
    pub fn remove_device(&self, path: &str) {
        self.devices.borrow_mut().remove(path);
    }

    pub fn contains_device(&self, path: &str) -> bool {
        self.devices.borrow().contains_key(path)
    }

    /// Number of times `name` was fetched from `path`.
    pub fn fetch_count(&self, path: &str, name: &str) -> usize {
        self.fetches
            .borrow()
            .get(&(path.to_string(), name.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Total number of property fetches across all devices.
    pub fn total_fetches(&self) -> usize {
        self.fetches.borrow().values().sum()
    }

    /// Mount requests received so far, oldest first.
    pub fn mount_requests(&self) -> Vec<MountRequest> {
        self.mounts.borrow().clone()
    }

    /// Makes every following mount request fail.
    pub fn set_mount_failure(&self, fail: bool) {
        self.fail_mounts.set(fail);
    }

    /// Answers following mount requests with a mount point but leaves the
    /// mount properties untouched, as a service does before its change
    /// signal goes out.
    pub fn set_mount_deferred(&self, defer: bool) {
        self.defer_mounts.set(defer);
    }

    fn mount_name(&self, path: &str) -> String {
        let devices = self.devices.borrow();
        let properties = devices.get(path);
        let label = properties
            .and_then(|p| p.get(names::ID_LABEL))
            .and_then(PropertyValue::as_str)
            .filter(|l| !l.is_empty());
        let device_file = properties
            .and_then(|p| p.get(names::DEVICE_FILE))
            .and_then(PropertyValue::as_str)
            .and_then(|f| f.rsplit('/').next());

        label
            .or(device_file)
            .unwrap_or("disk")
            .to_string()
    }
}

impl PropertyAccessor for MemoryBus {
    fn get_property(&self, object_path: &str, name: &str) -> Result<PropertyValue> {
        *self
            .fetches
            .borrow_mut()
            .entry((object_path.to_string(), name.to_string()))
            .or_default() += 1;

        let devices = self.devices.borrow();
        let properties = devices.get(object_path).ok_or_else(|| Error::PropertyFetch {
            path: object_path.to_string(),
            name: name.to_string(),
            message: "no such device".to_string(),
        })?;

        properties
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PropertyFetch {
                path: object_path.to_string(),
                name: name.to_string(),
                message: "no such property".to_string(),
            })
    }
}

impl DeviceBus for MemoryBus {
    fn enumerate_devices(&self) -> Result<Vec<String>> {
        Ok(self.devices.borrow().keys().cloned().collect())
    }

    fn filesystem_mount(
        &self,
        object_path: &str,
        filesystem: &str,
        options: &[String],
    ) -> Result<String> {
        self.mounts.borrow_mut().push(MountRequest {
            path: object_path.to_string(),
            filesystem: filesystem.to_string(),
            options: options.to_vec(),
        });

        if self.fail_mounts.get() || !self.contains_device(object_path) {
            return Err(Error::Mount {
                path: object_path.to_string(),
                message: "mount refused".to_string(),
            });
        }

        let mount_point = format!("{}/{}", self.mount_root, self.mount_name(object_path));
        if self.defer_mounts.get() {
            return Ok(mount_point);
        }
        self.set(object_path, names::DEVICE_IS_MOUNTED, true);
        self.set(
            object_path,
            names::DEVICE_MOUNT_PATHS,
            vec![mount_point.clone()],
        );
        Ok(mount_point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/org/freedesktop/UDisks/devices/sdc1";

    #[test]
    fn test_missing_device_and_property() {
        let bus = MemoryBus::new();
        assert!(bus.get_property(PATH, names::DEVICE_FILE).is_err());

        bus.set(PATH, names::DEVICE_FILE, "/dev/sdc1");
        assert!(bus.get_property(PATH, names::ID_LABEL).is_err());
        assert_eq!(
            bus.get_property(PATH, names::DEVICE_FILE).unwrap(),
            PropertyValue::from("/dev/sdc1")
        );
        assert_eq!(bus.fetch_count(PATH, names::DEVICE_FILE), 2);
    }

    #[test]
    fn test_simulated_mount() {
        let bus = MemoryBus::new();
        bus.set(PATH, names::DEVICE_FILE, "/dev/sdc1");
        bus.set(PATH, names::DEVICE_IS_MOUNTED, false);

        let mount_point = bus
            .filesystem_mount(PATH, "vfat", &["sync".to_string()])
            .unwrap();
        assert_eq!(mount_point, "/media/sdc1");
        assert_eq!(
            bus.get_property(PATH, names::DEVICE_IS_MOUNTED).unwrap(),
            PropertyValue::Bool(true)
        );
        assert_eq!(bus.mount_requests()[0].options, vec!["sync".to_string()]);
    }

    #[test]
    fn test_mount_failure() {
        let bus = MemoryBus::new();
        bus.set(PATH, names::DEVICE_FILE, "/dev/sdc1");
        bus.set_mount_failure(true);
        assert!(bus.filesystem_mount(PATH, "", &[]).is_err());
        assert_eq!(bus.mount_requests().len(), 1);
    }
}
