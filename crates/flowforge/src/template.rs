//! Abstraction templates: pages, widgets, metric and trigger blueprints.
//!
//! Items are kept as raw JSON objects because their `fields` trees are
//! free-form; accessors pull out the handful of keys the compiler reasons
//! about.

use serde_json::{Map, Value};

use crate::error::{CompileError, Result};
use crate::fixture::model;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Page,
    Chart,
    Card,
    Map,
    Metric,
    Trigger,
    Other,
}

impl ItemKind {
    pub fn from_model(name: &str) -> Self {
        match name {
            model::PAGE => ItemKind::Page,
            model::CHART => ItemKind::Chart,
            model::CARD => ItemKind::Card,
            model::MAP => ItemKind::Map,
            model::METRIC => ItemKind::Metric,
            model::TRIGGER | model::TRIGGER_ALIAS => ItemKind::Trigger,
            _ => ItemKind::Other,
        }
    }

    /// Pages and widgets: instantiated once, not per zone or point.
    pub fn is_ui(self) -> bool {
        matches!(
            self,
            ItemKind::Page | ItemKind::Chart | ItemKind::Card | ItemKind::Map
        )
    }

    pub fn is_widget(self) -> bool {
        matches!(self, ItemKind::Chart | ItemKind::Card | ItemKind::Map)
    }

    /// Model name of the rows this kind materializes into.
    pub fn output_model(self) -> Option<&'static str> {
        match self {
            ItemKind::Page => Some(model::PAGE),
            ItemKind::Chart => Some(model::CHART),
            ItemKind::Card => Some(model::CARD),
            ItemKind::Map => Some(model::MAP),
            ItemKind::Metric => Some(model::METRIC),
            ItemKind::Trigger => Some(model::TRIGGER),
            ItemKind::Other => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbstractionItem {
    raw: Value,
    kind: ItemKind,
}

impl AbstractionItem {
    pub fn new(raw: Map<String, Value>) -> Self {
        let kind = raw
            .get("model")
            .and_then(Value::as_str)
            .map_or(ItemKind::Other, ItemKind::from_model);
        Self {
            raw: Value::Object(raw),
            kind,
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    /// Numeric IDs are compared by their decimal text.
    pub fn abstraction_id(&self) -> Option<String> {
        match self.raw.get("abstraction_id")? {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn fields(&self) -> Option<&Map<String, Value>> {
        self.raw.get("fields").and_then(Value::as_object)
    }

    /// `fields`, or an empty object when absent.
    pub fn fields_value(&self) -> Value {
        Value::Object(self.fields().cloned().unwrap_or_default())
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields()?.get(key)?.as_str()
    }

    pub fn output_metric(&self) -> Option<&str> {
        self.raw.get("output_metric").and_then(Value::as_str)
    }

    pub fn calculators(&self) -> Vec<&Value> {
        arrayify(self.raw.get("calculators"))
    }

    /// Descriptor-ish strings under `calculators[*].calc_args.inputs.metrics`.
    pub fn calculator_input_metrics(&self) -> Vec<&str> {
        self.calculators()
            .into_iter()
            .flat_map(|calc| {
                arrayify(
                    calc.get("calc_args")
                        .and_then(|args| args.get("inputs"))
                        .and_then(|inputs| inputs.get("metrics")),
                )
            })
            .filter_map(Value::as_str)
            .collect()
    }

    /// Human-readable name for logs.
    pub fn display_name(&self) -> String {
        self.abstraction_id()
            .unwrap_or_else(|| format!("<{:?} without abstraction_id>", self.kind))
    }
}

pub fn parse_template(value: &Value) -> Result<Vec<AbstractionItem>> {
    let items = value
        .as_array()
        .ok_or(CompileError::NotAnArray { what: "template" })?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(object) => Ok(AbstractionItem::new(object.clone())),
            _ => Err(CompileError::NotAnObject {
                what: "template item",
                index,
            }),
        })
        .collect()
}

/// `null`/absent as empty, a list as its items, anything else as one item.
pub fn arrayify(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

/// Visits every string leaf (values only, not keys) in document order.
pub fn for_each_string<'v>(value: &'v Value, visit: &mut impl FnMut(&'v str)) {
    match value {
        Value::String(text) => visit(text),
        Value::Array(items) => items.iter().for_each(|item| for_each_string(item, visit)),
        Value::Object(object) => object.values().for_each(|item| for_each_string(item, visit)),
        _ => {}
    }
}
