//! TOML configuration.
//!
//! ```toml
//! [filter.usb_stick]
//! removable = true
//! usage = "filesystem"
//!
//! [[match]]
//! filter = "usb_stick"
//! automount = true
//! post_mount_command = "notify-send 'Mounted %device_file on %mount_point'"
//!
//! [default]
//! post_removal_command = "notify-send '%device_file removed'"
//! ```
//!
//! Matches are tried in the order they appear in the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use snafu::ResultExt;
use tracing::debug;

use crate::error::{ConfigParseSnafu, Error, IoResultExt, Result};
use crate::filter::{Filter, FilterRegistry, HasAudioTracks, HasAudioTracksOnly};
use crate::matches::{Automount, Commands, MatchDefinition, MatchRegistry};
use crate::property::names;

/// File name looked up in the configuration directories.
pub const CONFIG_FILE_NAME: &str = "udisks-glue.toml";

/// Filter section, `[filter.<name>]`.
///
/// Every key is optional; an empty section accepts every device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    pub removable: Option<bool>,
    pub read_only: Option<bool>,
    pub partition: Option<bool>,
    pub partition_table: Option<bool>,
    pub optical: Option<bool>,
    pub disc_closed: Option<bool>,
    pub optical_disc_has_audio_tracks: Option<bool>,
    pub optical_disc_has_audio_tracks_only: Option<bool>,
    pub usage: Option<String>,
    #[serde(rename = "type")]
    pub fs_type: Option<String>,
    pub uuid: Option<String>,
    pub label: Option<String>,
}

impl FilterConfig {
    /// Builds the filter named `name` from this section.
    pub fn to_filter(&self, name: &str) -> Filter {
        let bools = [
            (names::DEVICE_IS_REMOVABLE, self.removable),
            (names::DEVICE_IS_READ_ONLY, self.read_only),
            (names::DEVICE_IS_PARTITION, self.partition),
            (names::DEVICE_IS_PARTITION_TABLE, self.partition_table),
            (names::DEVICE_IS_OPTICAL_DISC, self.optical),
            (names::OPTICAL_DISC_IS_CLOSED, self.disc_closed),
        ];
        let strings = [
            (names::ID_USAGE, &self.usage),
            (names::ID_TYPE, &self.fs_type),
            (names::ID_UUID, &self.uuid),
            (names::ID_LABEL, &self.label),
        ];

        let mut filter = Filter::new(name);
        for (property, expected) in bools {
            if let Some(expected) = expected {
                filter = filter.with_bool(property, expected);
            }
        }
        for (property, expected) in strings {
            if let Some(expected) = expected {
                filter = filter.with_string(property, expected.as_str());
            }
        }
        if let Some(expected) = self.optical_disc_has_audio_tracks {
            filter = filter.with_custom(HasAudioTracks, expected);
        }
        if let Some(expected) = self.optical_disc_has_audio_tracks_only {
            filter = filter.with_custom(HasAudioTracksOnly, expected);
        }
        filter
    }
}

/// Match section, `[[match]]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchConfig {
    pub filter: String,
    pub post_insertion_command: Option<String>,
    pub post_mount_command: Option<String>,
    pub post_unmount_command: Option<String>,
    pub post_removal_command: Option<String>,
    #[serde(default)]
    pub automount: bool,
    pub automount_filesystem: Option<String>,
    pub automount_options: Option<Vec<String>>,
}

/// Catch-all match, `[default]`. Same keys as a match, minus `filter`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultConfig {
    pub post_insertion_command: Option<String>,
    pub post_mount_command: Option<String>,
    pub post_unmount_command: Option<String>,
    pub post_removal_command: Option<String>,
    #[serde(default)]
    pub automount: bool,
    pub automount_filesystem: Option<String>,
    pub automount_options: Option<Vec<String>>,
}

impl From<&MatchConfig> for MatchDefinition {
    fn from(config: &MatchConfig) -> Self {
        Self {
            filter: Some(config.filter.clone()),
            commands: Commands {
                post_insertion: config.post_insertion_command.clone(),
                post_mount: config.post_mount_command.clone(),
                post_unmount: config.post_unmount_command.clone(),
                post_removal: config.post_removal_command.clone(),
            },
            automount: automount(
                config.automount,
                &config.automount_filesystem,
                &config.automount_options,
            ),
        }
    }
}

impl From<&DefaultConfig> for MatchDefinition {
    fn from(config: &DefaultConfig) -> Self {
        Self {
            filter: None,
            commands: Commands {
                post_insertion: config.post_insertion_command.clone(),
                post_mount: config.post_mount_command.clone(),
                post_unmount: config.post_unmount_command.clone(),
                post_removal: config.post_removal_command.clone(),
            },
            automount: automount(
                config.automount,
                &config.automount_filesystem,
                &config.automount_options,
            ),
        }
    }
}

fn automount(
    enabled: bool,
    filesystem: &Option<String>,
    options: &Option<Vec<String>>,
) -> Option<Automount> {
    enabled.then(|| Automount {
        filesystem: filesystem.clone().unwrap_or_default(),
        options: options.clone().unwrap_or_default(),
    })
}

/// Whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, rename = "filter")]
    pub filters: BTreeMap<String, FilterConfig>,
    #[serde(default, rename = "match")]
    pub matches: Vec<MatchConfig>,
    pub default: Option<DefaultConfig>,
}

impl Config {
    /// Parses configuration text. `path` is only used in errors.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).context(ConfigParseSnafu { path })
    }

    /// Reads and parses a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).config_read_context(path)?;
        let config = Self::parse(&content, path)?;
        debug!(
            "Loaded {} filters and {} matches from {}",
            config.filters.len(),
            config.matches.len(),
            path.display()
        );
        Ok(config)
    }

    /// Builds the match registry, checking every filter reference.
    pub fn build(&self) -> Result<MatchRegistry> {
        let mut filters = FilterRegistry::new();
        for (name, section) in &self.filters {
            filters.insert(section.to_filter(name));
        }

        let rules = self.matches.iter().map(MatchDefinition::from).collect();
        let default = self.default.as_ref().map(MatchDefinition::from);
        MatchRegistry::new(filters, rules, default)
    }
}

/// Places searched for a configuration file, most specific first.
pub fn default_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("udisks-glue").join(CONFIG_FILE_NAME));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".udisks-glue.toml"));
    }
    paths.push(PathBuf::from("/etc").join(CONFIG_FILE_NAME));
    paths
}

/// Returns `explicit` if given, otherwise the first default path that exists.
pub fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let candidates = default_paths();
    candidates
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .ok_or_else(|| Error::ConfigNotFound {
            tried: candidates.iter().map(|p| p.display().to_string()).collect(),
        })
}
