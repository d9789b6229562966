//! Resolves one abstraction tree in one context.
//!
//! The walk is a single recursive pass. How a string is rewritten depends on
//! the key it sits under, so the key policy table below is the one place that
//! decides whether a descriptor becomes a list, a single ID, or stays text.

use indexmap::IndexSet;
use serde_json::{Map, Value};

use crate::context::{Context, ContextKey};
use crate::descriptor::{Aliases, Descriptor, is_descriptor};
use crate::geo;
use crate::ids::IdRegistry;
use crate::instances::Instances;
use crate::network::{MetricKey, Network};

/// Placeholder asking the compiler to fill in a context-dependent value.
pub const FILL: &str = "[FILL]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyPolicy {
    Plain,
    /// Descriptors expand to every matching ID; lists are flattened.
    MetricCollection,
    /// First matching ID, or empty text.
    OutputMetric,
    /// `[FILL]` becomes a coordinate.
    Center,
    /// `[FILL]` becomes a fresh correlation token.
    CorrelationId,
    /// Descriptors are kept verbatim for later global resolution.
    KeepDescriptors,
    /// Abstraction references become integer widget keys (global context).
    WidgetRefs,
}

const KEY_POLICIES: &[(&str, KeyPolicy)] = &[
    ("metrics", KeyPolicy::MetricCollection),
    ("metric_ids", KeyPolicy::MetricCollection),
    ("output_metric", KeyPolicy::OutputMetric),
    ("center", KeyPolicy::Center),
    ("metric_id", KeyPolicy::CorrelationId),
    ("metric_descriptors", KeyPolicy::KeepDescriptors),
    ("charts", KeyPolicy::WidgetRefs),
    ("cards", KeyPolicy::WidgetRefs),
    ("maps", KeyPolicy::WidgetRefs),
    ("cards_ids", KeyPolicy::WidgetRefs),
];

fn policy_for(key: &str, context: &Context) -> KeyPolicy {
    let policy = KEY_POLICIES
        .iter()
        .find(|(name, _)| *name == key)
        .map_or(KeyPolicy::Plain, |(_, policy)| *policy);
    if policy == KeyPolicy::WidgetRefs && *context != Context::Global {
        return KeyPolicy::Plain;
    }
    policy
}

/// Replaces `[[zone_id]]`-style placeholders for the context's target.
pub fn substitute_placeholders(text: &str, context: &Context) -> String {
    if !text.contains("[[") {
        return text.to_owned();
    }
    match context {
        Context::Zone(zone) => text
            .replace("[[zone_id]]", &zone.id)
            .replace("[[zone_label]]", &zone.label),
        Context::Point(point) => text
            .replace("[[point_id]]", &point.id)
            .replace("[[point_label]]", &point.label),
        Context::Global => text.to_owned(),
    }
}

/// Metric IDs a descriptor stands for in `context`.
///
/// Zone-target descriptors only resolve in a zone context. Point-target
/// descriptors resolve to the point's own metric in a point context and to
/// the metrics of the right kind of sensor inside the zone in a zone context.
/// The global context resolves across every zone and point.
pub fn metric_ids_for(
    network: &Network,
    descriptor: &Descriptor,
    context: &Context,
) -> Vec<String> {
    let own = |target_id: &str| {
        network
            .metric(&MetricKey::new(
                descriptor.category.as_str(),
                descriptor.interval.as_str(),
                target_id,
            ))
            .map(str::to_owned)
            .into_iter()
            .collect::<Vec<_>>()
    };
    if descriptor.targets_zone() {
        match context {
            Context::Zone(zone) => own(&zone.id),
            Context::Point(_) => Vec::new(),
            Context::Global => metric_ids_everywhere(network, [descriptor]),
        }
    } else if descriptor.targets_point() {
        match context {
            Context::Point(point) => own(&point.id),
            Context::Zone(zone) => network.point_metrics_in_zone(descriptor, zone),
            Context::Global => metric_ids_everywhere(network, [descriptor]),
        }
    } else {
        Vec::new()
    }
}

/// Union of what `descriptors` resolve to in every zone and point context,
/// first occurrence order, no duplicates.
pub fn metric_ids_everywhere<'d>(
    network: &Network,
    descriptors: impl IntoIterator<Item = &'d Descriptor>,
) -> Vec<String> {
    let contexts: Vec<Context> = network
        .zones()
        .iter()
        .cloned()
        .map(Context::Zone)
        .chain(network.points().iter().cloned().map(Context::Point))
        .collect();
    let mut ids = IndexSet::new();
    for descriptor in descriptors {
        for context in &contexts {
            ids.extend(metric_ids_for(network, descriptor, context));
        }
    }
    ids.into_iter().collect()
}

pub struct Resolver<'s> {
    network: &'s Network,
    instances: &'s Instances,
    ids: &'s mut IdRegistry,
    aliases: &'s Aliases,
}

impl<'s> Resolver<'s> {
    pub fn new(
        network: &'s Network,
        instances: &'s Instances,
        ids: &'s mut IdRegistry,
        aliases: &'s Aliases,
    ) -> Self {
        Self {
            network,
            instances,
            ids,
            aliases,
        }
    }

    pub fn resolve(&mut self, value: &Value, context: &Context) -> Value {
        self.walk(value, KeyPolicy::Plain, context)
    }

    fn walk(&mut self, node: &Value, policy: KeyPolicy, context: &Context) -> Value {
        match node {
            Value::String(text) => self.resolve_string(text, policy, context),
            Value::Array(items) if policy == KeyPolicy::WidgetRefs => {
                self.widget_refs(items.iter())
            }
            Value::Array(items) => {
                let resolved: Vec<Value> = items
                    .iter()
                    .map(|item| self.walk(item, policy, context))
                    .collect();
                if policy == KeyPolicy::MetricCollection {
                    flatten_ids(resolved)
                } else {
                    Value::Array(resolved)
                }
            }
            Value::Number(_) if policy == KeyPolicy::WidgetRefs => self.widget_refs([node]),
            Value::Object(object) => {
                let mut out = Map::new();
                for (key, value) in object {
                    let resolved = self.walk(value, policy_for(key, context), context);
                    out.insert(key.clone(), resolved);
                }
                self.backfill_center(&mut out);
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    fn resolve_string(&mut self, raw: &str, policy: KeyPolicy, context: &Context) -> Value {
        if policy == KeyPolicy::WidgetRefs {
            return self.widget_refs([&Value::from(raw)]);
        }
        let text = substitute_placeholders(raw, context);
        if text == FILL {
            return self.fill(policy, context);
        }
        if is_descriptor(&text) {
            if policy == KeyPolicy::KeepDescriptors {
                return Value::String(text);
            }
            let ids = match Descriptor::parse_with(&text, self.aliases) {
                Some(descriptor) => metric_ids_for(self.network, &descriptor, context),
                None => Vec::new(),
            };
            if ids.is_empty() {
                log::debug!("{text} matches no metric in {}", context.key());
            }
            return match policy {
                KeyPolicy::MetricCollection => Value::from(ids),
                KeyPolicy::OutputMetric => Value::from(ids.into_iter().next().unwrap_or_default()),
                _ => ids.into_iter().next().map_or(Value::String(text), Value::from),
            };
        }
        if let Some(pk) = self.instances.get(&text, &context.key()) {
            let id = pk.to_string();
            return if policy == KeyPolicy::MetricCollection {
                Value::from(vec![id])
            } else {
                Value::from(id)
            };
        }
        Value::String(text)
    }

    fn fill(&mut self, policy: KeyPolicy, context: &Context) -> Value {
        match policy {
            KeyPolicy::Center => self.center_of(context),
            KeyPolicy::CorrelationId => {
                Value::from(self.ids.correlation_token(&context.key().to_string()))
            }
            _ => Value::from(context.target_id()),
        }
    }

    fn center_of(&self, context: &Context) -> Value {
        let coord = match context {
            Context::Zone(zone) => geo::centroid(&zone.polygon),
            Context::Point(point) => Some(point.coord),
            Context::Global => self.network_center(),
        };
        coord.map_or(Value::Null, geo::coord_to_json)
    }

    fn network_center(&self) -> Option<geo::Coord> {
        geo::mean_centroid(self.network.zones().iter().map(|zone| &zone.polygon))
    }

    /// A `center` that could not be computed for its own target (a zone
    /// without vertices) falls back to the centre of the whole network.
    fn backfill_center(&self, object: &mut Map<String, Value>) {
        let unresolved = match object.get("center") {
            Some(Value::Null) => true,
            Some(Value::String(text)) => text == FILL,
            _ => false,
        };
        if unresolved {
            if let Some(center) = self.network_center() {
                object.insert("center".into(), geo::coord_to_json(center));
            }
        }
    }

    /// Abstraction references to widget keys; unknown references drop out.
    fn widget_refs<'v>(&self, refs: impl IntoIterator<Item = &'v Value>) -> Value {
        let mut keys = Vec::new();
        for reference in refs {
            let id = match reference {
                Value::String(text) => text.clone(),
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            match self.instances.get(&id, &ContextKey::Global) {
                Some(pk) => {
                    let key = pk.to_json();
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
                None => log::debug!("widget reference {id} was not materialized; dropped"),
            }
        }
        Value::Array(keys)
    }
}

/// Flattens one level, keeps non-empty strings, drops repeats.
fn flatten_ids(items: Vec<Value>) -> Value {
    let mut ids = IndexSet::new();
    for item in items {
        match item {
            Value::Array(inner) => {
                ids.extend(inner.into_iter().filter_map(non_empty_string));
            }
            other => ids.extend(non_empty_string(other)),
        }
    }
    Value::from(ids.into_iter().collect::<Vec<String>>())
}

fn non_empty_string(value: Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text),
        _ => None,
    }
}
