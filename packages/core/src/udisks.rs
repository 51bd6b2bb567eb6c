//! UDisks system service access over D-Bus.
//!
//! Method calls go through a blocking `zbus` connection to the system bus;
//! the device signals of the service root are read from a message iterator
//! on the same connection.

use snafu::ResultExt;
use tracing::{debug, trace};
use zbus::MatchRule;
use zbus::blocking::{Connection, MessageIterator};
use zbus::message::Type as MessageType;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};

use crate::error::{DbusSnafu, Error, Result};
use crate::property::{DeviceBus, PropertyAccessor, PropertyValue};
use crate::tracker::DeviceEvent;

/// Well-known bus name of the service.
pub const UDISKS_SERVICE: &str = "org.freedesktop.UDisks";

/// Object path of the service root, which emits the device signals.
pub const UDISKS_PATH: &str = "/org/freedesktop/UDisks";

/// Interface carrying the device properties.
pub const DEVICE_INTERFACE: &str = "org.freedesktop.UDisks.Device";

const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// [`DeviceBus`] backed by the UDisks service on the system bus.
#[derive(Debug, Clone)]
pub struct UdisksClient {
    connection: Connection,
}

impl UdisksClient {
    /// Connects to the system bus.
    pub fn system() -> Result<Self> {
        let connection = Connection::system().context(DbusSnafu {
            operation: "connect to the system bus",
        })?;
        Ok(Self::with_connection(connection))
    }

    pub fn with_connection(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn call<B>(
        &self,
        object_path: &str,
        interface: &str,
        method: &str,
        body: &B,
    ) -> zbus::Result<zbus::Message>
    where
        B: serde::Serialize + zbus::zvariant::DynamicType,
    {
        trace!("{}.{} on {}", interface, method, object_path);
        self.connection.call_method(
            Some(UDISKS_SERVICE),
            object_path,
            Some(interface),
            method,
            body,
        )
    }
}

impl PropertyAccessor for UdisksClient {
    fn get_property(&self, object_path: &str, name: &str) -> Result<PropertyValue> {
        let value = self
            .call(
                object_path,
                PROPERTIES_INTERFACE,
                "Get",
                &(DEVICE_INTERFACE, name),
            )
            .and_then(|reply| reply.body().deserialize::<OwnedValue>())
            .map_err(|e| Error::PropertyFetch {
                path: object_path.to_string(),
                name: name.to_string(),
                message: e.to_string(),
            })?;

        property_value(name, &value)
    }
}

impl DeviceBus for UdisksClient {
    fn enumerate_devices(&self) -> Result<Vec<String>> {
        let paths = self
            .call(UDISKS_PATH, UDISKS_SERVICE, "EnumerateDevices", &())
            .and_then(|reply| reply.body().deserialize::<Vec<OwnedObjectPath>>())
            .context(DbusSnafu {
                operation: "enumerate devices",
            })?;

        Ok(paths.iter().map(|path| path.as_str().to_string()).collect())
    }

    fn filesystem_mount(
        &self,
        object_path: &str,
        filesystem: &str,
        options: &[String],
    ) -> Result<String> {
        self.call(
            object_path,
            DEVICE_INTERFACE,
            "FilesystemMount",
            &(filesystem, options),
        )
        .and_then(|reply| reply.body().deserialize::<String>())
        .map_err(|e| Error::Mount {
            path: object_path.to_string(),
            message: e.to_string(),
        })
    }
}

/// Converts a property delivered by the bus into a [`PropertyValue`].
///
/// Arrays of strings and object paths become string lists. Any other
/// container, floating point values and bytes are rejected.
pub fn property_value(name: &str, value: &Value<'_>) -> Result<PropertyValue> {
    let unsupported = || Error::BusParse {
        message: format!(
            "property \"{}\" has unsupported type {}",
            name,
            value.value_signature()
        ),
    };

    match value {
        Value::Value(inner) => property_value(name, inner),
        Value::Bool(b) => Ok(PropertyValue::Bool(*b)),
        Value::Str(s) => Ok(PropertyValue::String(s.as_str().to_string())),
        Value::ObjectPath(p) => Ok(PropertyValue::String(p.as_str().to_string())),
        Value::I16(v) => Ok(PropertyValue::I16(*v)),
        Value::I32(v) => Ok(PropertyValue::I32(*v)),
        Value::I64(v) => Ok(PropertyValue::I64(*v)),
        Value::U16(v) => Ok(PropertyValue::U16(*v)),
        Value::U32(v) => Ok(PropertyValue::U32(*v)),
        Value::U64(v) => Ok(PropertyValue::U64(*v)),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Str(s) => Some(s.as_str().to_string()),
                Value::ObjectPath(p) => Some(p.as_str().to_string()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(PropertyValue::StringList)
            .ok_or_else(unsupported),
        _ => Err(unsupported()),
    }
}

/// Maps a signal of the service root onto a device event.
///
/// Returns `None` for signals that do not concern device presence or state,
/// such as `DeviceJobChanged`.
pub fn device_event(member: &str, path: &str) -> Option<DeviceEvent> {
    let path = path.to_string();
    match member {
        "DeviceAdded" => Some(DeviceEvent::Added(path)),
        "DeviceChanged" => Some(DeviceEvent::Changed(path)),
        "DeviceRemoved" => Some(DeviceEvent::Removed(path)),
        _ => None,
    }
}

/// Device signals emitted by the service root.
///
/// The subscription is registered on creation, so signals emitted while the
/// caller enumerates existing devices are queued. Iterating blocks until the
/// next device signal arrives and ends when the connection closes.
pub struct SignalMonitor {
    messages: MessageIterator,
}

impl SignalMonitor {
    pub fn new(connection: &Connection) -> Result<Self> {
        let rule = MatchRule::builder()
            .msg_type(MessageType::Signal)
            .interface(UDISKS_SERVICE)
            .and_then(|builder| builder.path(UDISKS_PATH))
            .map(|builder| builder.build())
            .context(DbusSnafu {
                operation: "build the device signal rule",
            })?;

        let messages =
            MessageIterator::for_match_rule(rule, connection, None).context(DbusSnafu {
                operation: "subscribe to device signals",
            })?;
        debug!("Subscribed to {} signals on {}", UDISKS_SERVICE, UDISKS_PATH);

        Ok(Self { messages })
    }
}

impl Iterator for SignalMonitor {
    type Item = Result<DeviceEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let message = match self.messages.next()? {
                Ok(message) => message,
                Err(source) => {
                    return Some(Err(Error::Dbus {
                        operation: "read device signals".to_string(),
                        source,
                    }));
                }
            };

            let header = message.header();
            let Some(member) = header.member().map(|m| m.as_str().to_string()) else {
                continue;
            };
            let path = match message.body().deserialize::<OwnedObjectPath>() {
                Ok(path) => path,
                Err(e) => {
                    debug!("Ignoring {} signal: {}", member, e);
                    continue;
                }
            };
            trace!("signal {} {}", member, path.as_str());

            if let Some(event) = device_event(&member, path.as_str()) {
                return Some(Ok(event));
            }
        }
    }
}
