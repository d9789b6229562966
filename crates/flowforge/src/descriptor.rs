//! Metric descriptor grammar.
//!
//! A descriptor is a dotted reference to "the metric of this category and
//! interval for this kind of target":
//!
//! ```text
//! MetricCategory.<Target>.<Category>.<Interval>
//! MetricCategory.Zone.azp.qh          -> zone / average_zone_pressure / QUARTER_HOUR
//! MetricCategory.FlowMeter.flow_volume.daily
//! ```
//!
//! Everything that inspects descriptor strings goes through this module so the
//! prefix and alias rules live in one place.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

pub const DESCRIPTOR_PREFIX: &str = "MetricCategory.";

/// Metric categories owned by point sensors rather than zones.
const POINT_CATEGORIES: &[&str] = &["pressure", "flow_volume", "flow_reading"];

/// Descriptor targets that name a point sensor kind.
const POINT_TARGETS: &[&str] = &["pressure", "flowmeter"];

static BUILTIN_ALIASES: LazyLock<Aliases> = LazyLock::new(Aliases::builtin);

/// Synonym tables applied to descriptor categories and intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Aliases {
    pub category: HashMap<String, String>,
    pub interval: HashMap<String, String>,
}

impl Aliases {
    pub fn builtin() -> Self {
        let category = [("azp", "average_zone_pressure")];
        let interval = [
            ("qh", "QUARTER_HOUR"),
            ("hourly", "HOURLY"),
            ("daily", "DAILY"),
            ("weekly", "WEEKLY"),
            ("monthly", "MONTHLY"),
        ];
        Self {
            category: category
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
            interval: interval
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        }
    }

    /// Shared instance of the built-in tables.
    pub fn builtin_ref() -> &'static Self {
        &BUILTIN_ALIASES
    }

    /// Built-in tables with `extra` entries layered on top.
    pub fn extended(extra: &Aliases) -> Self {
        let mut aliases = Self::builtin();
        aliases.category.extend(extra.category.clone());
        aliases.interval.extend(extra.interval.clone());
        aliases
    }

    pub fn category(&self, token: &str) -> String {
        self.category
            .get(token)
            .cloned()
            .unwrap_or_else(|| token.to_owned())
    }

    pub fn interval(&self, token: &str) -> String {
        self.interval
            .get(token)
            .cloned()
            .unwrap_or_else(|| token.to_owned())
    }
}

impl Default for Aliases {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Descriptor {
    pub target: String,
    pub category: String,
    pub interval: String,
}

impl Descriptor {
    /// Parses with the built-in alias tables.
    pub fn parse(text: &str) -> Option<Self> {
        Self::parse_with(text, Aliases::builtin_ref())
    }

    /// Returns `None` for anything that is not a well-formed descriptor.
    pub fn parse_with(text: &str, aliases: &Aliases) -> Option<Self> {
        if !is_descriptor(text) {
            return None;
        }
        let mut parts = text.split('.');
        let _prefix = parts.next()?;
        let target = parts.next()?;
        let category = parts.next()?;
        let interval = parts.next()?;
        Some(Self {
            target: target.to_owned(),
            category: aliases.category(category),
            interval: aliases.interval(interval),
        })
    }

    pub fn targets_zone(&self) -> bool {
        self.target.eq_ignore_ascii_case("zone")
    }

    pub fn targets_point(&self) -> bool {
        let target = self.target.to_ascii_lowercase();
        POINT_TARGETS.contains(&target.as_str()) || is_point_category(&self.category)
    }

    /// Sensor category that must own a metric of this descriptor's category.
    pub fn required_sensor(&self) -> Option<&'static str> {
        required_sensor_category(&self.category)
    }

    /// Same metric shape, ignoring how the descriptor was spelled.
    pub fn matches(&self, other: &Descriptor) -> bool {
        self == other
    }
}

/// Canonical spelling, aliases already applied.
impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{DESCRIPTOR_PREFIX}{}.{}.{}",
            self.target, self.category, self.interval
        )
    }
}

pub fn is_descriptor(text: &str) -> bool {
    text.starts_with(DESCRIPTOR_PREFIX)
}

pub fn is_point_category(category: &str) -> bool {
    POINT_CATEGORIES.contains(&category)
}

pub fn required_sensor_category(category: &str) -> Option<&'static str> {
    if category == "pressure" {
        Some("pressure_sensor")
    } else if category.starts_with("flow_") {
        Some("flow_meter")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_aliases() {
        let d = Descriptor::parse("MetricCategory.Zone.azp.qh").unwrap();
        assert_eq!(d.target, "Zone");
        assert_eq!(d.category, "average_zone_pressure");
        assert_eq!(d.interval, "QUARTER_HOUR");
        assert!(d.targets_zone());
        assert!(!d.targets_point());
    }

    #[test]
    fn unknown_tokens_pass_through() {
        let d = Descriptor::parse("MetricCategory.Zone.zone_leak.YEARLY").unwrap();
        assert_eq!(d.category, "zone_leak");
        assert_eq!(d.interval, "YEARLY");
    }

    #[test]
    fn rejects_malformed_text() {
        assert!(Descriptor::parse("").is_none());
        assert!(Descriptor::parse("Zone.azp.qh.x").is_none());
        assert!(Descriptor::parse("MetricCategory.Zone.azp").is_none());
        assert!(Descriptor::parse("metriccategory.Zone.azp.qh").is_none());
    }

    #[test]
    fn extra_segments_are_ignored() {
        let d = Descriptor::parse("MetricCategory.FlowMeter.flow_volume.daily.extra").unwrap();
        assert_eq!(d.interval, "DAILY");
        assert!(d.targets_point());
    }

    #[test]
    fn point_targets() {
        let targets_point = |text: &str| Descriptor::parse(text).unwrap().targets_point();
        assert!(targets_point("MetricCategory.Pressure.pressure.qh"));
        assert!(targets_point("MetricCategory.Zone.pressure.qh"));
        assert!(targets_point("MetricCategory.Device.flow_reading.qh"));
        assert!(!targets_point("MetricCategory.Device.zone_demand.qh"));
    }

    #[test]
    fn display_is_canonical() {
        let d = Descriptor::parse("MetricCategory.Zone.azp.qh").unwrap();
        assert_eq!(d.to_string(), "MetricCategory.Zone.average_zone_pressure.QUARTER_HOUR");
        assert_eq!(Descriptor::parse(&d.to_string()), Some(d));
    }

    #[test]
    fn extended_aliases_layer_over_builtin() {
        let mut extra = Aliases {
            category: HashMap::new(),
            interval: HashMap::new(),
        };
        extra.category.insert("zd".into(), "zone_demand".into());
        let aliases = Aliases::extended(&extra);
        let d = Descriptor::parse_with("MetricCategory.Zone.zd.qh", &aliases).unwrap();
        assert_eq!(d.category, "zone_demand");
        assert_eq!(d.interval, "QUARTER_HOUR");
    }

    #[test]
    fn required_sensor() {
        assert_eq!(required_sensor_category("pressure"), Some("pressure_sensor"));
        assert_eq!(required_sensor_category("flow_volume"), Some("flow_meter"));
        assert_eq!(required_sensor_category("zone_demand"), None);
    }
}
