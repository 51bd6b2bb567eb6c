//! Per-device property memoization.
//!
//! Each tracked device owns one [`PropertyCache`]. Rule evaluation reads
//! through it so that a device is queried at most once per property until the
//! cache is purged. Failed fetches are never stored, so a transient bus error
//! is retried on the next read instead of poisoning the entry.

use std::collections::HashMap;

use tracing::trace;

use crate::error::Result;
use crate::property::{DeviceRef, PropertyValue, expect_type, type_error};

/// Property values fetched for one device, keyed by property name.
#[derive(Debug, Default)]
pub struct PropertyCache {
    entries: HashMap<String, PropertyValue>,
}

impl PropertyCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value of `name`, fetching it on a miss.
    pub fn get(&mut self, device: DeviceRef<'_>, name: &str) -> Result<&PropertyValue> {
        if !self.entries.contains_key(name) {
            let value = device.fetch(name)?;
            trace!(path = device.path(), name, %value, "caching property");
            self.entries.insert(name.to_string(), value);
        }
        Ok(&self.entries[name])
    }

    pub fn get_bool(&mut self, device: DeviceRef<'_>, name: &str) -> Result<bool> {
        let value = self.get(device, name)?;
        expect_type(name, value, "bool", PropertyValue::as_bool)
    }

    pub fn get_string(&mut self, device: DeviceRef<'_>, name: &str) -> Result<&str> {
        match self.get(device, name)? {
            PropertyValue::String(v) => Ok(v.as_str()),
            other => Err(type_error(name, "string", other)),
        }
    }

    pub fn get_string_list(&mut self, device: DeviceRef<'_>, name: &str) -> Result<&[String]> {
        match self.get(device, name)? {
            PropertyValue::StringList(v) => Ok(v.as_slice()),
            other => Err(type_error(name, "string list", other)),
        }
    }

    pub fn get_int16(&mut self, device: DeviceRef<'_>, name: &str) -> Result<i16> {
        let value = self.get(device, name)?;
        expect_type(name, value, "int16", PropertyValue::as_i16)
    }

    pub fn get_int32(&mut self, device: DeviceRef<'_>, name: &str) -> Result<i32> {
        let value = self.get(device, name)?;
        expect_type(name, value, "int32", PropertyValue::as_i32)
    }

    pub fn get_int64(&mut self, device: DeviceRef<'_>, name: &str) -> Result<i64> {
        let value = self.get(device, name)?;
        expect_type(name, value, "int64", PropertyValue::as_i64)
    }

    pub fn get_uint16(&mut self, device: DeviceRef<'_>, name: &str) -> Result<u16> {
        let value = self.get(device, name)?;
        expect_type(name, value, "uint16", PropertyValue::as_u16)
    }

    pub fn get_uint32(&mut self, device: DeviceRef<'_>, name: &str) -> Result<u32> {
        let value = self.get(device, name)?;
        expect_type(name, value, "uint32", PropertyValue::as_u32)
    }

    pub fn get_uint64(&mut self, device: DeviceRef<'_>, name: &str) -> Result<u64> {
        let value = self.get(device, name)?;
        expect_type(name, value, "uint64", PropertyValue::as_u64)
    }

    /// Drops every cached value.
    pub fn purge(&mut self) {
        self.entries.clear();
    }

    /// Returns true if `name` currently has a cached value.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBus;
    use crate::property::names;

    const PATH: &str = "/org/freedesktop/UDisks/devices/sdb1";

    fn bus() -> MemoryBus {
        let bus = MemoryBus::new();
        bus.set(PATH, names::DEVICE_IS_REMOVABLE, true);
        bus.set(PATH, names::ID_LABEL, "PORTABLE");
        bus.set(PATH, names::OPTICAL_DISC_NUM_TRACKS, 12u32);
        bus.set(
            PATH,
            names::DEVICE_MOUNT_PATHS,
            vec!["/media/PORTABLE".to_string()],
        );
        bus
    }

    #[test]
    fn test_hit_does_not_refetch() {
        let bus = bus();
        let device = DeviceRef::new(PATH, &bus);
        let mut cache = PropertyCache::new();

        assert!(cache.get_bool(device, names::DEVICE_IS_REMOVABLE).unwrap());
        bus.set(PATH, names::DEVICE_IS_REMOVABLE, false);
        assert!(cache.get_bool(device, names::DEVICE_IS_REMOVABLE).unwrap());

        assert_eq!(bus.fetch_count(PATH, names::DEVICE_IS_REMOVABLE), 1);
    }

    #[test]
    fn test_typed_reads() {
        let bus = bus();
        let device = DeviceRef::new(PATH, &bus);
        let mut cache = PropertyCache::new();

        assert_eq!(cache.get_string(device, names::ID_LABEL).unwrap(), "PORTABLE");
        assert_eq!(
            cache.get_uint32(device, names::OPTICAL_DISC_NUM_TRACKS).unwrap(),
            12
        );
        assert_eq!(
            cache
                .get_string_list(device, names::DEVICE_MOUNT_PATHS)
                .unwrap(),
            ["/media/PORTABLE".to_string()]
        );
    }

    #[test]
    fn test_failed_fetch_is_not_cached() {
        let bus = bus();
        let device = DeviceRef::new(PATH, &bus);
        let mut cache = PropertyCache::new();

        assert!(cache.get_string(device, names::ID_UUID).is_err());
        assert!(!cache.contains(names::ID_UUID));

        bus.set(PATH, names::ID_UUID, "DEAD-BEEF");
        assert_eq!(cache.get_string(device, names::ID_UUID).unwrap(), "DEAD-BEEF");
        assert_eq!(bus.fetch_count(PATH, names::ID_UUID), 2);
    }

    #[test]
    fn test_type_mismatch_keeps_value() {
        let bus = bus();
        let device = DeviceRef::new(PATH, &bus);
        let mut cache = PropertyCache::new();

        assert!(cache.get_string(device, names::DEVICE_IS_REMOVABLE).is_err());
        assert!(cache.get_bool(device, names::DEVICE_IS_REMOVABLE).unwrap());
        assert_eq!(bus.fetch_count(PATH, names::DEVICE_IS_REMOVABLE), 1);
    }

    #[test]
    fn test_purge_forces_refetch() {
        let bus = bus();
        let device = DeviceRef::new(PATH, &bus);
        let mut cache = PropertyCache::new();

        cache.get_string(device, names::ID_LABEL).unwrap();
        cache.purge();
        assert!(cache.is_empty());

        bus.set(PATH, names::ID_LABEL, "RENAMED");
        assert_eq!(cache.get_string(device, names::ID_LABEL).unwrap(), "RENAMED");
        assert_eq!(bus.fetch_count(PATH, names::ID_LABEL), 2);
    }
}
