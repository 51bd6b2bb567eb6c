//! Match rules and first-fit resolution.
//!
//! A [`Match`] binds an optional filter to the command templates run at each
//! lifecycle step. The [`MatchRegistry`] owns every match together with the
//! filters they reference and picks, for a given device, the first match
//! whose filter accepts it.

use tracing::debug;

use crate::cache::PropertyCache;
use crate::command::CommandKind;
use crate::error::Result;
use crate::filter::{FilterKey, FilterRegistry};
use crate::property::DeviceRef;

/// Command templates of a match, one per lifecycle hook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Commands {
    pub post_insertion: Option<String>,
    pub post_mount: Option<String>,
    pub post_unmount: Option<String>,
    pub post_removal: Option<String>,
}

impl Commands {
    pub fn get(&self, kind: CommandKind) -> Option<&str> {
        match kind {
            CommandKind::PostInsertion => self.post_insertion.as_deref(),
            CommandKind::PostMount => self.post_mount.as_deref(),
            CommandKind::PostUnmount => self.post_unmount.as_deref(),
            CommandKind::PostRemoval => self.post_removal.as_deref(),
        }
    }
}

/// Parameters of the mount request issued when automount is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Automount {
    /// Filesystem type passed to the service; empty lets it detect the type.
    pub filesystem: String,
    pub options: Vec<String>,
}

/// A match as authored, before its filter name is resolved.
#[derive(Debug, Clone, Default)]
pub struct MatchDefinition {
    /// Name of the filter; `None` matches unconditionally.
    pub filter: Option<String>,
    pub commands: Commands,
    pub automount: Option<Automount>,
}

/// A resolved match rule.
#[derive(Debug, Clone)]
pub struct Match {
    name: String,
    filter: Option<FilterKey>,
    commands: Commands,
    automount: Option<Automount>,
}

impl Match {
    /// Name used in logs: the filter name, or `default`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> Option<FilterKey> {
        self.filter
    }

    pub fn command(&self, kind: CommandKind) -> Option<&str> {
        self.commands.get(kind)
    }

    pub fn automount(&self) -> Option<&Automount> {
        self.automount.as_ref()
    }
}

/// Non-owning handle to a match inside a [`MatchRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKey {
    /// Index into the declared rules.
    Rule(usize),
    /// The catch-all default.
    Default,
}

/// Ordered match rules, an optional default, and the filters they use.
#[derive(Debug)]
pub struct MatchRegistry {
    filters: FilterRegistry,
    rules: Vec<Match>,
    default: Option<Match>,
}

impl MatchRegistry {
    /// Builds the registry, keeping `rules` in the order given.
    ///
    /// Fails if a rule names a filter that `filters` does not contain.
    pub fn new(
        filters: FilterRegistry,
        rules: Vec<MatchDefinition>,
        default: Option<MatchDefinition>,
    ) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|definition| Self::bind(&filters, definition, "*"))
            .collect::<Result<Vec<_>>>()?;
        let default = default
            .map(|definition| Self::bind(&filters, definition, "default"))
            .transpose()?;

        Ok(Self {
            filters,
            rules,
            default,
        })
    }

    fn bind(
        filters: &FilterRegistry,
        definition: MatchDefinition,
        unfiltered: &str,
    ) -> Result<Match> {
        let filter = definition
            .filter
            .as_deref()
            .map(|name| filters.key(name))
            .transpose()?;

        Ok(Match {
            name: definition.filter.unwrap_or_else(|| unfiltered.to_string()),
            filter,
            commands: definition.commands,
            automount: definition.automount,
        })
    }

    /// Finds the match governing a device.
    ///
    /// Rules are tried in declaration order; a rule without a filter always
    /// applies. Falls back to the default, or `None` when there is none.
    pub fn resolve(&self, device: DeviceRef<'_>, cache: &mut PropertyCache) -> Option<MatchKey> {
        let found = self.rules.iter().position(|rule| match rule.filter {
            Some(key) => self.filters.get(key).matches(device, cache),
            None => true,
        });

        let key = match found {
            Some(index) => Some(MatchKey::Rule(index)),
            None => self.default.as_ref().map(|_| MatchKey::Default),
        };
        debug!(
            path = device.path(),
            "resolved match: {}",
            key.and_then(|k| self.get(k)).map(Match::name).unwrap_or("none")
        );
        key
    }

    /// Same as [`resolve`](Self::resolve), returning the match itself.
    pub fn find(&self, device: DeviceRef<'_>, cache: &mut PropertyCache) -> Option<&Match> {
        self.resolve(device, cache).and_then(|key| self.get(key))
    }

    /// Returns the match behind a key, or `None` for a key this registry
    /// never issued.
    pub fn get(&self, key: MatchKey) -> Option<&Match> {
        match key {
            MatchKey::Rule(index) => self.rules.get(index),
            MatchKey::Default => self.default.as_ref(),
        }
    }

    pub fn rules(&self) -> &[Match] {
        &self.rules
    }

    pub fn default_match(&self) -> Option<&Match> {
        self.default.as_ref()
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::filter::Filter;
    use crate::memory::MemoryBus;
    use crate::property::names;

    const PATH: &str = "/org/freedesktop/UDisks/devices/sdb1";

    fn filters() -> FilterRegistry {
        let mut filters = FilterRegistry::new();
        filters.insert(Filter::new("removable").with_bool(names::DEVICE_IS_REMOVABLE, true));
        filters.insert(Filter::new("vfat").with_string(names::ID_TYPE, "vfat"));
        filters.insert(Filter::new("optical").with_bool(names::DEVICE_IS_OPTICAL_DISC, true));
        filters
    }

    fn rule(filter: &str, insertion: &str) -> MatchDefinition {
        MatchDefinition {
            filter: Some(filter.to_string()),
            commands: Commands {
                post_insertion: Some(insertion.to_string()),
                ..Default::default()
            },
            automount: None,
        }
    }

    fn default_rule() -> MatchDefinition {
        MatchDefinition {
            filter: None,
            commands: Commands {
                post_insertion: Some("default".to_string()),
                ..Default::default()
            },
            automount: None,
        }
    }

    fn vfat_stick() -> MemoryBus {
        let bus = MemoryBus::new();
        bus.set(PATH, names::DEVICE_IS_REMOVABLE, true);
        bus.set(PATH, names::DEVICE_IS_OPTICAL_DISC, false);
        bus.set(PATH, names::ID_TYPE, "vfat");
        bus
    }

    #[test]
    fn test_first_declared_match_wins() {
        let bus = vfat_stick();
        let mut cache = PropertyCache::new();

        let registry = MatchRegistry::new(
            filters(),
            vec![
                rule("optical", "first"),
                rule("vfat", "second"),
                rule("removable", "third"),
            ],
            Some(default_rule()),
        )
        .unwrap();

        let found = registry.find(DeviceRef::new(PATH, &bus), &mut cache).unwrap();
        assert_eq!(found.name(), "vfat");
        assert_eq!(found.command(CommandKind::PostInsertion), Some("second"));
    }

    #[test]
    fn test_declaration_order_is_significant() {
        let bus = vfat_stick();
        let mut cache = PropertyCache::new();

        let registry = MatchRegistry::new(
            filters(),
            vec![rule("removable", "removable"), rule("vfat", "vfat")],
            None,
        )
        .unwrap();

        assert_eq!(
            registry.resolve(DeviceRef::new(PATH, &bus), &mut cache),
            Some(MatchKey::Rule(0))
        );
    }

    #[test]
    fn test_falls_back_to_default() {
        let bus = vfat_stick();
        let mut cache = PropertyCache::new();

        let registry =
            MatchRegistry::new(filters(), vec![rule("optical", "cd")], Some(default_rule()))
                .unwrap();

        let key = registry.resolve(DeviceRef::new(PATH, &bus), &mut cache);
        assert_eq!(key, Some(MatchKey::Default));
        assert_eq!(registry.get(MatchKey::Default).unwrap().name(), "default");
    }

    #[test]
    fn test_no_default_means_no_match() {
        let bus = vfat_stick();
        let mut cache = PropertyCache::new();

        let registry = MatchRegistry::new(filters(), vec![rule("optical", "cd")], None).unwrap();
        assert!(registry.find(DeviceRef::new(PATH, &bus), &mut cache).is_none());
    }

    #[test]
    fn test_rule_without_filter_always_applies() {
        let bus = MemoryBus::new();
        let mut cache = PropertyCache::new();

        let registry = MatchRegistry::new(
            filters(),
            vec![
                MatchDefinition::default(),
                rule("removable", "never reached"),
            ],
            None,
        )
        .unwrap();

        assert_eq!(
            registry.resolve(DeviceRef::new(PATH, &bus), &mut cache),
            Some(MatchKey::Rule(0))
        );
    }

    #[test]
    fn test_keys_without_a_match_are_not_found() {
        let registry = MatchRegistry::new(filters(), vec![rule("vfat", "stick")], None).unwrap();

        assert_eq!(registry.get(MatchKey::Rule(0)).unwrap().name(), "vfat");
        assert!(registry.get(MatchKey::Rule(1)).is_none());
        assert!(registry.get(MatchKey::Default).is_none());
    }

    #[test]
    fn test_unknown_filter_is_rejected() {
        let err = MatchRegistry::new(filters(), vec![rule("floppy", "x")], None).unwrap_err();
        assert!(matches!(err, Error::UnknownFilter { ref filter } if filter == "floppy"));
    }

    #[test]
    fn test_filters_share_one_cache() {
        let bus = vfat_stick();
        let mut cache = PropertyCache::new();

        let registry = MatchRegistry::new(
            filters(),
            vec![rule("optical", "a"), rule("optical", "b"), rule("vfat", "c")],
            None,
        )
        .unwrap();

        registry.resolve(DeviceRef::new(PATH, &bus), &mut cache);
        assert_eq!(bus.fetch_count(PATH, names::DEVICE_IS_OPTICAL_DISC), 1);
    }
}
