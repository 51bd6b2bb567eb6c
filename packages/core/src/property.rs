//! Device properties and the bus contract used to read them.
//!
//! The daemon never talks to the bus directly: everything goes through the
//! [`PropertyAccessor`] and [`DeviceBus`] traits so the rule engine and the
//! state machine can be exercised against an in-memory bus.

use std::fmt;

use crate::error::{Error, Result};

/// Property names of the `org.freedesktop.UDisks.Device` interface.
pub mod names {
    pub const DEVICE_FILE: &str = "DeviceFile";
    pub const DEVICE_IS_SYSTEM_INTERNAL: &str = "DeviceIsSystemInternal";
    pub const DEVICE_IS_REMOVABLE: &str = "DeviceIsRemovable";
    pub const DEVICE_IS_READ_ONLY: &str = "DeviceIsReadOnly";
    pub const DEVICE_IS_PARTITION: &str = "DeviceIsPartition";
    pub const DEVICE_IS_PARTITION_TABLE: &str = "DeviceIsPartitionTable";
    pub const DEVICE_IS_MEDIA_AVAILABLE: &str = "DeviceIsMediaAvailable";
    pub const DEVICE_IS_MOUNTED: &str = "DeviceIsMounted";
    pub const DEVICE_IS_OPTICAL_DISC: &str = "DeviceIsOpticalDisc";
    pub const DEVICE_MOUNT_PATHS: &str = "DeviceMountPaths";
    pub const OPTICAL_DISC_IS_CLOSED: &str = "OpticalDiscIsClosed";
    pub const OPTICAL_DISC_NUM_TRACKS: &str = "OpticalDiscNumTracks";
    pub const OPTICAL_DISC_NUM_AUDIO_TRACKS: &str = "OpticalDiscNumAudioTracks";
    pub const ID_USAGE: &str = "IdUsage";
    pub const ID_TYPE: &str = "IdType";
    pub const ID_UUID: &str = "IdUuid";
    pub const ID_LABEL: &str = "IdLabel";
}

/// A property value as delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    String(String),
    StringList(Vec<String>),
    I16(i16),
    I32(i32),
    I64(i64),
    U16(u16),
    U32(u32),
    U64(u64),
}

impl PropertyValue {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::StringList(_) => "string list",
            Self::I16(_) => "int16",
            Self::I32(_) => "int32",
            Self::I64(_) => "int64",
            Self::U16(_) => "uint16",
            Self::U32(_) => "uint32",
            Self::U64(_) => "uint64",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            Self::StringList(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            Self::I16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Self::U16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "'{}'", v),
            Self::StringList(v) => write!(f, "{:?}", v),
            Self::I16(v) => write!(f, "{}", v),
            Self::I32(v) => write!(f, "{}", v),
            Self::I64(v) => write!(f, "{}", v),
            Self::U16(v) => write!(f, "{}", v),
            Self::U32(v) => write!(f, "{}", v),
            Self::U64(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        Self::StringList(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        Self::U32(value)
    }
}

/// Reads a single named property of a device object.
pub trait PropertyAccessor {
    /// Fetches `name` from the device at `object_path`.
    ///
    /// Every call is a round trip to the bus; callers that need memoization
    /// go through [`crate::cache::PropertyCache`].
    fn get_property(&self, object_path: &str, name: &str) -> Result<PropertyValue>;
}

/// The device-management service as seen by the daemon.
pub trait DeviceBus: PropertyAccessor {
    /// Lists the object paths of all devices currently known to the service.
    fn enumerate_devices(&self) -> Result<Vec<String>>;

    /// Asks the service to mount the filesystem on `object_path`.
    ///
    /// Returns the mount path reported by the service, which may be empty.
    fn filesystem_mount(
        &self,
        object_path: &str,
        filesystem: &str,
        options: &[String],
    ) -> Result<String>;
}

/// A device object path paired with the accessor that can read it.
#[derive(Clone, Copy)]
pub struct DeviceRef<'a> {
    path: &'a str,
    accessor: &'a dyn PropertyAccessor,
}

impl<'a> DeviceRef<'a> {
    pub fn new(path: &'a str, accessor: &'a dyn PropertyAccessor) -> Self {
        Self { path, accessor }
    }

    /// Returns the device object path.
    pub fn path(&self) -> &'a str {
        self.path
    }

    /// Fetches a property, bypassing any cache.
    pub fn fetch(&self, name: &str) -> Result<PropertyValue> {
        self.accessor.get_property(self.path, name)
    }

    /// Fetches a boolean property, bypassing any cache.
    pub fn fetch_bool(&self, name: &str) -> Result<bool> {
        let value = self.fetch(name)?;
        expect_type(name, &value, "bool", PropertyValue::as_bool)
    }

    /// Fetches a string property, bypassing any cache.
    pub fn fetch_string(&self, name: &str) -> Result<String> {
        match self.fetch(name)? {
            PropertyValue::String(v) => Ok(v),
            other => Err(type_error(name, "string", &other)),
        }
    }

    /// Fetches a string-list property, bypassing any cache.
    pub fn fetch_string_list(&self, name: &str) -> Result<Vec<String>> {
        match self.fetch(name)? {
            PropertyValue::StringList(v) => Ok(v),
            other => Err(type_error(name, "string list", &other)),
        }
    }
}

impl fmt::Debug for DeviceRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRef").field("path", &self.path).finish()
    }
}

/// Extracts a typed view of `value`, or reports the mismatch.
pub(crate) fn expect_type<T>(
    name: &str,
    value: &PropertyValue,
    expected: &'static str,
    extract: impl FnOnce(&PropertyValue) -> Option<T>,
) -> Result<T> {
    extract(value).ok_or_else(|| type_error(name, expected, value))
}

pub(crate) fn type_error(name: &str, expected: &'static str, found: &PropertyValue) -> Error {
    Error::PropertyType {
        name: name.to_string(),
        expected,
        found: found.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_views() {
        assert_eq!(PropertyValue::Bool(true).as_bool(), Some(true));
        assert_eq!(PropertyValue::from("vfat").as_str(), Some("vfat"));
        assert_eq!(PropertyValue::U32(3).as_u32(), Some(3));
        assert_eq!(PropertyValue::U32(3).as_i32(), None);
        assert_eq!(PropertyValue::Bool(true).as_str(), None);
    }

    #[test]
    fn test_expect_type_mismatch() {
        let err = expect_type("IdType", &PropertyValue::Bool(false), "string", |v| {
            v.as_str().map(str::to_string)
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "property \"IdType\" is bool, expected string");
    }
}
