//! udisks-glue-core: rule engine and device tracking for udisks-glue.
//!
//! The daemon watches the UDisks service for devices being added, changed
//! and removed, and runs user-configured shell commands when media is
//! inserted, mounted, unmounted or removed.
//!
//! # Modules
//!
//! - [`property`]: Property values and the bus traits
//! - [`cache`]: Per-device property cache
//! - [`filter`]: Device filters and custom rules
//! - [`matches`]: Match rules and first-fit resolution
//! - [`command`]: Command template expansion and execution
//! - [`tracked`]: Per-device lifecycle state machine
//! - [`tracker`]: Tracked device table and signal handling
//! - [`config`]: TOML configuration
//! - [`udisks`]: UDisks access over D-Bus
//! - [`memory`]: In-memory bus for tests and replays
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use udisks_glue_core::{Config, DeviceTracker, Dispatcher, ShellRunner, UdisksClient};
//! use udisks_glue_core::udisks::SignalMonitor;
//!
//! let config = Config::load(Path::new("/etc/udisks-glue.toml")).unwrap();
//! let client = UdisksClient::system().unwrap();
//! let monitor = SignalMonitor::new(client.connection()).unwrap();
//! let mut tracker = DeviceTracker::new(
//!     client,
//!     config.build().unwrap(),
//!     Dispatcher::new(ShellRunner::new()),
//! );
//! tracker.load_existing().unwrap();
//!
//! for event in monitor {
//!     tracker.handle(&event.unwrap());
//! }
//! ```

pub mod cache;
pub mod command;
pub mod config;
pub mod error;
pub mod filter;
pub mod matches;
pub mod memory;
pub mod property;
pub mod tracked;
pub mod tracker;
pub mod udisks;

// Re-export commonly used types
pub use cache::PropertyCache;
pub use command::{CommandKind, CommandRunner, Dispatcher, ShellRunner};
pub use config::Config;
pub use error::{Error, Result};
pub use filter::{CustomRule, Filter, FilterRegistry};
pub use matches::{Match, MatchKey, MatchRegistry};
pub use memory::MemoryBus;
pub use property::{DeviceBus, DeviceRef, PropertyAccessor, PropertyValue};
pub use tracked::{Status, TrackedObject};
pub use tracker::{DeviceEvent, DeviceTracker};
pub use udisks::UdisksClient;
