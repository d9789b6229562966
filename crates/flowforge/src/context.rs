//! Per-target contexts an abstraction is instantiated in.

use std::fmt;

use crate::descriptor::{Aliases, Descriptor};
use crate::network::{Network, Point, Zone};
use crate::template::{AbstractionItem, for_each_string};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Zone,
    Point,
}

/// The target an instance is compiled for.
#[derive(Debug, Clone, PartialEq)]
pub enum Context {
    Zone(Zone),
    Point(Point),
    /// UI artifacts: instantiated once, not tied to a target.
    Global,
}

/// Identity of a context, used to key instance bindings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextKey {
    Zone(String),
    Point(String),
    Global,
}

impl Context {
    pub fn key(&self) -> ContextKey {
        match self {
            Context::Zone(zone) => ContextKey::Zone(zone.id.clone()),
            Context::Point(point) => ContextKey::Point(point.id.clone()),
            Context::Global => ContextKey::Global,
        }
    }

    /// ID of the zone or point, empty for the global context.
    pub fn target_id(&self) -> &str {
        match self {
            Context::Zone(zone) => &zone.id,
            Context::Point(point) => &point.id,
            Context::Global => "",
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKey::Zone(id) => write!(f, "zone:{id}"),
            ContextKey::Point(id) => write!(f, "point:{id}"),
            ContextKey::Global => f.write_str("global"),
        }
    }
}

/// Whether a metric or trigger template is instantiated per zone or per point.
///
/// A trigger's output descriptor decides. Otherwise the first descriptor in
/// the item that names a point target or point category makes it
/// point-scoped; everything else is zone-scoped.
pub fn scope_of(item: &AbstractionItem, aliases: &Aliases) -> Scope {
    if let Some(output) = item
        .output_metric()
        .and_then(|text| Descriptor::parse_with(text, aliases))
    {
        if output.targets_zone() {
            return Scope::Zone;
        }
        if output.targets_point() {
            return Scope::Point;
        }
    }
    let mut scope = Scope::Zone;
    let mut decided = false;
    for_each_string(item.raw(), &mut |text| {
        if decided {
            return;
        }
        if let Some(descriptor) = Descriptor::parse_with(text, aliases) {
            if descriptor.targets_point() {
                scope = Scope::Point;
                decided = true;
            }
        }
    });
    scope
}

/// One context per zone or per point, in network order.
pub fn expand(scope: Scope, network: &Network) -> Vec<Context> {
    match scope {
        Scope::Zone => network.zones().iter().cloned().map(Context::Zone).collect(),
        Scope::Point => network.points().iter().cloned().map(Context::Point).collect(),
    }
}

/// Contexts `item` is instantiated in: one global context for UI artifacts,
/// one per zone or point otherwise.
pub fn contexts_for(item: &AbstractionItem, network: &Network, aliases: &Aliases) -> Vec<Context> {
    if item.kind().is_ui() {
        return vec![Context::Global];
    }
    expand(scope_of(item, aliases), network)
}
