//! Device filters.
//!
//! A [`Filter`] is a named conjunction of [`Restriction`]s. Each restriction
//! compares one cached device property with an expected value, or delegates
//! to a [`CustomRule`]. Evaluation is fail-closed: a property that cannot be
//! read makes its restriction, and therefore the filter, not match.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::cache::PropertyCache;
use crate::error::{Error, Result};
use crate::property::{DeviceRef, names};

/// A predicate that cannot be expressed as a single property comparison.
pub trait CustomRule: fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Evaluates the rule against a device.
    ///
    /// Returns `None` when the outcome cannot be determined, which never
    /// satisfies a restriction.
    fn evaluate(&self, device: DeviceRef<'_>, cache: &mut PropertyCache) -> Option<bool>;
}

/// One condition of a filter.
#[derive(Debug)]
pub enum Restriction {
    /// A boolean property must have the given value.
    Bool { property: String, expected: bool },
    /// A string property must equal the given value exactly.
    String { property: String, expected: String },
    /// A custom rule must evaluate to the given value.
    Custom {
        rule: Box<dyn CustomRule>,
        expected: bool,
    },
}

impl Restriction {
    /// Checks the restriction against a device.
    pub fn matches(&self, device: DeviceRef<'_>, cache: &mut PropertyCache) -> bool {
        match self {
            Self::Bool { property, expected } => match cache.get_bool(device, property) {
                Ok(value) => value == *expected,
                Err(e) => {
                    debug!(path = device.path(), "restriction not evaluated: {}", e);
                    false
                }
            },
            Self::String { property, expected } => match cache.get_string(device, property) {
                Ok(value) => value == expected.as_str(),
                Err(e) => {
                    debug!(path = device.path(), "restriction not evaluated: {}", e);
                    false
                }
            },
            Self::Custom { rule, expected } => {
                let outcome = rule.evaluate(device, cache);
                if outcome.is_none() {
                    debug!(path = device.path(), rule = rule.name(), "rule is indeterminate");
                }
                outcome == Some(*expected)
            }
        }
    }
}

/// A named, immutable set of restrictions combined with logical AND.
#[derive(Debug)]
pub struct Filter {
    name: String,
    restrictions: Vec<Restriction>,
}

impl Filter {
    /// Creates a filter with no restrictions, which matches every device.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            restrictions: Vec::new(),
        }
    }

    /// Adds a boolean property restriction.
    pub fn with_bool(mut self, property: impl Into<String>, expected: bool) -> Self {
        self.restrictions.push(Restriction::Bool {
            property: property.into(),
            expected,
        });
        self
    }

    /// Adds a string property restriction.
    pub fn with_string(mut self, property: impl Into<String>, expected: impl Into<String>) -> Self {
        self.restrictions.push(Restriction::String {
            property: property.into(),
            expected: expected.into(),
        });
        self
    }

    /// Adds a custom rule restriction.
    pub fn with_custom(mut self, rule: impl CustomRule + 'static, expected: bool) -> Self {
        self.restrictions.push(Restriction::Custom {
            rule: Box::new(rule),
            expected,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn restrictions(&self) -> &[Restriction] {
        &self.restrictions
    }

    /// Returns true if every restriction matches the device.
    ///
    /// Property comparisons are checked before custom rules since they only
    /// cost a cache lookup once the first device query has been made.
    pub fn matches(&self, device: DeviceRef<'_>, cache: &mut PropertyCache) -> bool {
        let (simple, custom): (Vec<_>, Vec<_>) = self
            .restrictions
            .iter()
            .partition(|r| !matches!(r, Restriction::Custom { .. }));

        simple
            .into_iter()
            .chain(custom)
            .all(|r| r.matches(device, cache))
    }
}

/// Identifies a filter inside a [`FilterRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterKey(usize);

/// Owns every configured filter, addressable by name.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    filters: Vec<Filter>,
    by_name: HashMap<String, FilterKey>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter, replacing any earlier filter of the same name.
    pub fn insert(&mut self, filter: Filter) -> FilterKey {
        if let Some(&key) = self.by_name.get(filter.name()) {
            self.filters[key.0] = filter;
            return key;
        }
        let key = FilterKey(self.filters.len());
        self.by_name.insert(filter.name().to_string(), key);
        self.filters.push(filter);
        key
    }

    /// Looks a filter up by name.
    pub fn key(&self, name: &str) -> Result<FilterKey> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownFilter {
                filter: name.to_string(),
            })
    }

    pub fn get(&self, key: FilterKey) -> &Filter {
        &self.filters[key.0]
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Matches optical discs carrying at least one audio track.
#[derive(Debug, Clone, Copy, Default)]
pub struct HasAudioTracks;

impl CustomRule for HasAudioTracks {
    fn name(&self) -> &str {
        "optical_disc_has_audio_tracks"
    }

    fn evaluate(&self, device: DeviceRef<'_>, cache: &mut PropertyCache) -> Option<bool> {
        let audio = cache
            .get_uint32(device, names::OPTICAL_DISC_NUM_AUDIO_TRACKS)
            .ok()?;
        Some(audio > 0)
    }
}

/// Matches optical discs whose tracks are all audio tracks.
#[derive(Debug, Clone, Copy, Default)]
pub struct HasAudioTracksOnly;

impl CustomRule for HasAudioTracksOnly {
    fn name(&self) -> &str {
        "optical_disc_has_audio_tracks_only"
    }

    fn evaluate(&self, device: DeviceRef<'_>, cache: &mut PropertyCache) -> Option<bool> {
        let audio = cache
            .get_uint32(device, names::OPTICAL_DISC_NUM_AUDIO_TRACKS)
            .ok()?;
        let total = cache
            .get_uint32(device, names::OPTICAL_DISC_NUM_TRACKS)
            .ok()?;
        Some(audio > 0 && audio == total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBus;

    const PATH: &str = "/org/freedesktop/UDisks/devices/sr0";

    fn usb_stick() -> MemoryBus {
        let bus = MemoryBus::new();
        bus.set(PATH, names::DEVICE_IS_REMOVABLE, true);
        bus.set(PATH, names::DEVICE_IS_OPTICAL_DISC, false);
        bus.set(PATH, names::ID_USAGE, "filesystem");
        bus.set(PATH, names::ID_TYPE, "vfat");
        bus
    }

    fn audio_cd(audio: u32, total: u32) -> MemoryBus {
        let bus = MemoryBus::new();
        bus.set(PATH, names::DEVICE_IS_OPTICAL_DISC, true);
        bus.set(PATH, names::OPTICAL_DISC_NUM_AUDIO_TRACKS, audio);
        bus.set(PATH, names::OPTICAL_DISC_NUM_TRACKS, total);
        bus
    }

    /// Rule with a fixed outcome.
    #[derive(Debug)]
    struct Fixed(Option<bool>);

    impl CustomRule for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn evaluate(&self, _device: DeviceRef<'_>, _cache: &mut PropertyCache) -> Option<bool> {
            self.0
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let bus = MemoryBus::new();
        let filter = Filter::new("all");
        let mut cache = PropertyCache::new();
        assert!(filter.matches(DeviceRef::new(PATH, &bus), &mut cache));
        assert_eq!(bus.total_fetches(), 0);
    }

    #[test]
    fn test_all_restrictions_must_match() {
        let bus = usb_stick();
        let device = DeviceRef::new(PATH, &bus);
        let mut cache = PropertyCache::new();

        let vfat = Filter::new("vfat")
            .with_bool(names::DEVICE_IS_REMOVABLE, true)
            .with_string(names::ID_TYPE, "vfat");
        assert!(vfat.matches(device, &mut cache));

        let ntfs = Filter::new("ntfs")
            .with_bool(names::DEVICE_IS_REMOVABLE, true)
            .with_string(names::ID_TYPE, "ntfs");
        assert!(!ntfs.matches(device, &mut cache));

        let fixed = Filter::new("fixed").with_bool(names::DEVICE_IS_REMOVABLE, false);
        assert!(!fixed.matches(device, &mut cache));
    }

    #[test]
    fn test_string_comparison_is_exact() {
        let bus = usb_stick();
        let mut cache = PropertyCache::new();
        let filter = Filter::new("upper").with_string(names::ID_TYPE, "VFAT");
        assert!(!filter.matches(DeviceRef::new(PATH, &bus), &mut cache));
    }

    #[test]
    fn test_missing_property_fails_closed() {
        let bus = usb_stick();
        let mut cache = PropertyCache::new();
        let device = DeviceRef::new(PATH, &bus);

        let label = Filter::new("label").with_string(names::ID_LABEL, "");
        assert!(!label.matches(device, &mut cache));

        let read_only = Filter::new("ro").with_bool(names::DEVICE_IS_READ_ONLY, false);
        assert!(!read_only.matches(device, &mut cache));
    }

    #[test]
    fn test_indeterminate_rule_never_matches() {
        let bus = usb_stick();
        let device = DeviceRef::new(PATH, &bus);
        let mut cache = PropertyCache::new();

        let unknown_true = Filter::new("a").with_custom(Fixed(None), true);
        let unknown_false = Filter::new("b").with_custom(Fixed(None), false);
        let known_false = Filter::new("c").with_custom(Fixed(Some(false)), false);

        assert!(!unknown_true.matches(device, &mut cache));
        assert!(!unknown_false.matches(device, &mut cache));
        assert!(known_false.matches(device, &mut cache));
    }

    #[test]
    fn test_first_mismatch_short_circuits() {
        let bus = usb_stick();
        let mut cache = PropertyCache::new();
        let filter = Filter::new("optical")
            .with_bool(names::DEVICE_IS_OPTICAL_DISC, true)
            .with_string(names::ID_LABEL, "AUDIO")
            .with_custom(HasAudioTracks, true);

        assert!(!filter.matches(DeviceRef::new(PATH, &bus), &mut cache));
        assert_eq!(bus.fetch_count(PATH, names::ID_LABEL), 0);
        assert_eq!(bus.fetch_count(PATH, names::OPTICAL_DISC_NUM_AUDIO_TRACKS), 0);
    }

    #[test]
    fn test_audio_track_rules() {
        let mut cache = PropertyCache::new();

        let mixed = audio_cd(3, 4);
        let device = DeviceRef::new(PATH, &mixed);
        assert_eq!(HasAudioTracks.evaluate(device, &mut cache), Some(true));
        assert_eq!(HasAudioTracksOnly.evaluate(device, &mut cache), Some(false));

        let mut cache = PropertyCache::new();
        let audio = audio_cd(12, 12);
        let device = DeviceRef::new(PATH, &audio);
        assert_eq!(HasAudioTracksOnly.evaluate(device, &mut cache), Some(true));

        let mut cache = PropertyCache::new();
        let data = audio_cd(0, 1);
        let device = DeviceRef::new(PATH, &data);
        assert_eq!(HasAudioTracks.evaluate(device, &mut cache), Some(false));
        assert_eq!(HasAudioTracksOnly.evaluate(device, &mut cache), Some(false));

        let mut cache = PropertyCache::new();
        let stick = usb_stick();
        let device = DeviceRef::new(PATH, &stick);
        assert_eq!(HasAudioTracks.evaluate(device, &mut cache), None);
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = FilterRegistry::new();
        let key = registry.insert(Filter::new("usb").with_bool(names::DEVICE_IS_REMOVABLE, true));
        assert_eq!(registry.key("usb").unwrap(), key);
        assert_eq!(registry.get(key).name(), "usb");
        assert!(matches!(
            registry.key("missing"),
            Err(Error::UnknownFilter { .. })
        ));

        let replaced = registry.insert(Filter::new("usb"));
        assert_eq!(replaced, key);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(key).restrictions().is_empty());
    }
}
