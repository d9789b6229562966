//! Repairs the zone bindings of a resolved map widget.
//!
//! Map fields are authored against placeholder zones. After resolution any
//! value under a polygon-ish id key must name a real zone: placeholders and
//! unknown IDs fall back to the first zone, empty lists widen to every zone,
//! and JSON blobs stored as text are repaired inside and re-serialized.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::geo;
use crate::network::Zone;

static ZONE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*\[\[\s*(polygon|zone)_id\s*\]\]\s*$").expect("placeholder pattern")
});

const SUBJECT_TOKENS: &[&str] = &[
    "polygon", "polygons", "zone", "zones", "geom", "geometry", "feature", "features",
];
const ID_TOKENS: &[&str] = &["id", "ids"];

/// Lower-case words of a key, split at punctuation and camel-case humps.
fn key_tokens(key: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut after_lower = false;
    for c in key.chars() {
        if !c.is_ascii_alphanumeric() {
            tokens.extend((!current.is_empty()).then(|| std::mem::take(&mut current)));
            after_lower = false;
            continue;
        }
        if c.is_ascii_uppercase() && after_lower {
            tokens.push(std::mem::take(&mut current));
        }
        current.push(c.to_ascii_lowercase());
        after_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// `polygon_ids`, `zoneId`, `feature-id` and the like.
pub fn is_zone_id_key(key: &str) -> bool {
    let tokens = key_tokens(key);
    let has = |set: &[&str]| tokens.iter().any(|token| set.contains(&token.as_str()));
    has(SUBJECT_TOKENS) && has(ID_TOKENS)
}

pub fn is_zone_placeholder(text: &str) -> bool {
    ZONE_PLACEHOLDER.is_match(text)
}

/// Text that holds a JSON object or array.
fn parse_blob(text: &str) -> Option<Value> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
        return None;
    }
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(|value| value.is_object() || value.is_array())
}

struct Repair<'z> {
    valid: HashSet<&'z str>,
    default: &'z str,
    all: Vec<Value>,
}

impl Repair<'_> {
    fn value(&self, value: &mut Value, key: Option<&str>) {
        let zone_key = key.is_some_and(is_zone_id_key);
        match value {
            Value::String(text) => {
                if let Some(mut blob) = parse_blob(text) {
                    self.value(&mut blob, key);
                    if let Ok(repaired) = serde_json::to_string(&blob) {
                        *text = repaired;
                    }
                } else if zone_key {
                    *value = self.zone_id(value);
                } else if is_zone_placeholder(text) {
                    *value = Value::from(self.default);
                }
            }
            Value::Number(_) if zone_key => *value = self.zone_id(value),
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.value(item, key);
                }
                if zone_key {
                    let mut seen = Vec::new();
                    items.retain(|item| {
                        let keep = match item {
                            Value::Null => false,
                            Value::String(text) => !text.is_empty(),
                            _ => true,
                        };
                        let fresh = keep && !seen.contains(item);
                        if fresh {
                            seen.push(item.clone());
                        }
                        fresh
                    });
                    if items.is_empty() {
                        items.clone_from(&self.all);
                    }
                }
            }
            Value::Object(object) => {
                for (key, item) in object.iter_mut() {
                    self.value(item, Some(key.as_str()));
                }
            }
            _ => {}
        }
    }

    /// A known zone ID as given, anything else as the default zone.
    fn zone_id(&self, value: &Value) -> Value {
        let known = match value {
            Value::String(text) => self.valid.contains(text.as_str()),
            Value::Number(n) => self.valid.contains(n.to_string().as_str()),
            _ => false,
        };
        if known {
            value.clone()
        } else {
            Value::from(self.default)
        }
    }

    fn binds(&self, value: &Value, key: Option<&str>) -> bool {
        let zone_key = key.is_some_and(is_zone_id_key);
        match value {
            Value::Object(object) => object
                .iter()
                .any(|(key, item)| self.binds(item, Some(key.as_str()))),
            Value::Array(items) => items.iter().any(|item| self.binds(item, key)),
            Value::String(text) => match parse_blob(text) {
                Some(blob) => self.binds(&blob, key),
                None => zone_key && self.valid.contains(text.as_str()),
            },
            Value::Number(n) => zone_key && self.valid.contains(n.to_string().as_str()),
            _ => false,
        }
    }
}

/// Sanitizes map widget `fields` against the zones of the network.
pub fn repair(fields: &mut Map<String, Value>, zones: &[Zone]) {
    let Some(first) = zones.first() else {
        log::debug!("no zones to bind map widgets to");
        return;
    };
    let repair = Repair {
        valid: zones.iter().map(|zone| zone.id.as_str()).collect(),
        default: &first.id,
        all: zones.iter().map(|zone| Value::from(zone.id.as_str())).collect(),
    };
    for (key, value) in fields.iter_mut() {
        repair.value(value, Some(key.as_str()));
    }

    let bound = fields
        .iter()
        .any(|(key, value)| repair.binds(value, Some(key.as_str())));
    if !bound {
        let args = fields.entry("args").or_insert(Value::Null);
        if args.is_null() {
            *args = Value::Object(Map::new());
        }
        match args {
            Value::Object(args) => {
                args.insert("polygon_ids".into(), Value::Array(repair.all.clone()));
            }
            other => log::warn!("map args is not an object ({other}); zone binding not added"),
        }
    }

    let missing_center = match fields.get("center") {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    };
    if missing_center {
        if let Some(center) = geo::mean_centroid(zones.iter().map(|zone| &zone.polygon)) {
            fields.insert("center".into(), geo::coord_to_json(center));
        }
    }
}
