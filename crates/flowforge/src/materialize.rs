//! Metric definitions and triggers: shared constructors used by both the
//! domain compiler and template materialization, plus the per-context
//! template passes.

use serde_json::{Map, Value, json};

use crate::compiler::Compiler;
use crate::context::contexts_for;
use crate::fixture::{FixtureRow, Pk, model};
use crate::ids::IdKind;
use crate::network::MetricKey;
use crate::template::{AbstractionItem, ItemKind, arrayify};

/// Fields every metric definition starts from before its own fields apply.
fn metric_defaults(storage_table: i64) -> Map<String, Value> {
    object(json!({
        "factor": 1,
        "offset": 0,
        "source": "FORMULA",
        "data_type": "ANALOG",
        "value_range": [],
        "is_optimized": false,
        "storage_table": storage_table,
        "aggregation_type": "gauge",
        "pulse_round_down": false,
        "histogram_interval": { "days": 0, "hours": 0, "minutes": 0 }
    }))
}

pub(crate) fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Everything a trigger row carries besides its identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct TriggerSpec {
    pub calculators: Vec<Value>,
    pub description: String,
    pub schedule_job: String,
    pub input_metrics: Vec<String>,
    pub output_metric: String,
}

impl TriggerSpec {
    fn into_fields(self, id: Value) -> Map<String, Value> {
        object(json!({
            "id": id,
            "caller": "REAL_TIME",
            "is_active": true,
            "calculator": "",
            "calculators": self.calculators,
            "description": self.description,
            "schedule_job": self.schedule_job,
            "input_metrics": self.input_metrics,
            "output_metric": self.output_metric,
        }))
    }
}

/// `{ calc_args: { inputs, metric_id, time_range_type }, calc_name }`.
pub(crate) fn calculator(calc_name: &str, inputs: Value, metric_id: String) -> Value {
    json!({
        "calc_args": {
            "inputs": inputs,
            "metric_id": metric_id,
            "time_range_type": "operation"
        },
        "calc_name": calc_name
    })
}

impl Compiler {
    /// ID of the metric with `fields`' `(category, interval, target_id)`,
    /// creating the definition if none exists yet.
    pub(crate) fn ensure_metric(&mut self, fields: Map<String, Value>) -> String {
        let mut merged = metric_defaults(self.options.storage_table);
        merged.extend(fields);
        for (key, normalize) in [
            ("category", &self.aliases.category),
            ("interval", &self.aliases.interval),
        ] {
            if let Some(Value::String(token)) = merged.get_mut(key) {
                if let Some(canonical) = normalize.get(token.as_str()) {
                    *token = canonical.clone();
                }
            }
        }
        let text = |key: &str| {
            merged
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        let key = MetricKey::new(text("category"), text("interval"), text("target_id"));
        if let Some(id) = self.network.metric(&key) {
            log::debug!(
                "metric {}/{} for {} already exists as {id}",
                key.category,
                key.interval,
                key.target_id
            );
            return id.to_owned();
        }

        let id = self.ids.make(
            IdKind::Metric,
            &format!("metric|{}|{}|{}", key.category, key.interval, key.target_id),
        );
        merged.insert("id".into(), Value::from(id.as_str()));
        self.push(FixtureRow::new(model::METRIC, id.as_str(), merged));
        self.network.insert_metric(key, id.clone());
        id
    }

    /// Creates the trigger producing `spec.output_metric`, or rewrites the
    /// existing one in place. Returns `None` when the trigger would have no
    /// output or no inputs.
    pub(crate) fn upsert_trigger(&mut self, spec: TriggerSpec) -> Option<Pk> {
        if spec.output_metric.is_empty() || spec.input_metrics.is_empty() {
            log::debug!(
                "trigger \"{}\" skipped: output {:?}, {} input(s)",
                spec.description,
                spec.output_metric,
                spec.input_metrics.len()
            );
            return None;
        }
        if let Some(row_index) = self.network.trigger_row(&spec.output_metric) {
            let row = &mut self.rows[row_index];
            log::debug!("trigger {} for {} updated in place", row.pk, spec.output_metric);
            row.fields = spec.into_fields(row.pk.to_json());
            return Some(row.pk.clone());
        }
        let output = spec.output_metric.clone();
        let id = self.ids.make(IdKind::Trigger, &format!("trigger|{output}"));
        let fields = spec.into_fields(Value::from(id.as_str()));
        let row = FixtureRow::new(model::TRIGGER, id.as_str(), fields);
        let row_index = self.push(row);
        self.network.insert_trigger(output, row_index);
        Some(Pk::Text(id))
    }

    /// One metric definition per kept metric template and context.
    pub(crate) fn create_metrics(&mut self, kept: &[&AbstractionItem]) {
        for item in kept.iter().filter(|item| item.kind() == ItemKind::Metric) {
            let contexts = contexts_for(item, &self.network, &self.aliases);
            if contexts.is_empty() {
                log::debug!(
                    "metric template {} has no targets to expand over",
                    item.display_name()
                );
            }
            for context in contexts {
                let fields = self.resolver().resolve(&item.fields_value(), &context);
                let id = self.ensure_metric(object(fields));
                if let Some(abstraction_id) = item.abstraction_id() {
                    self.instances.bind(&abstraction_id, context.key(), Pk::Text(id));
                }
            }
        }
    }

    /// One trigger per kept trigger template and context, deduplicated by
    /// output metric.
    pub(crate) fn create_triggers(&mut self, kept: &[&AbstractionItem]) {
        for item in kept.iter().filter(|item| item.kind() == ItemKind::Trigger) {
            let contexts = contexts_for(item, &self.network, &self.aliases);
            for context in contexts {
                let resolved = self.resolver().resolve(item.raw(), &context);
                let calculators: Vec<Value> = arrayify(resolved.get("calculators"))
                    .into_iter()
                    .map(|calc| self.normalize_calculator(calc, &context.key().to_string()))
                    .collect();
                let mut input_metrics: Vec<String> = Vec::new();
                for calc in &calculators {
                    for id in arrayify(calc["calc_args"]["inputs"].get("metrics"))
                        .into_iter()
                        .filter_map(Value::as_str)
                        .filter(|id| !id.is_empty())
                    {
                        if !input_metrics.iter().any(|seen| seen == id) {
                            input_metrics.push(id.to_owned());
                        }
                    }
                }
                let text = |key: &str| {
                    resolved
                        .get(key)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned()
                };
                let spec = TriggerSpec {
                    calculators,
                    description: text("description"),
                    schedule_job: text("schedule_job"),
                    input_metrics,
                    output_metric: text("output_metric"),
                };
                match (self.upsert_trigger(spec), item.abstraction_id()) {
                    (Some(pk), Some(abstraction_id)) => {
                        self.instances.bind(&abstraction_id, context.key(), pk);
                    }
                    (Some(_), None) => {}
                    (None, _) => log::debug!(
                        "trigger template {} produced nothing in {}",
                        item.display_name(),
                        context.key()
                    ),
                }
            }
        }
    }

    /// Fills the calculator defaults: an inputs object with a metrics list, a
    /// correlation token and the `operation` time range.
    fn normalize_calculator(&mut self, calc: &Value, seed: &str) -> Value {
        let mut calc = object(calc.clone());
        // Nested objects are taken out and written back to the same slot so
        // key order survives.
        let args_slot = calc.entry("calc_args").or_insert(Value::Null);
        let mut args = object(std::mem::take(args_slot));
        let inputs_slot = args.entry("inputs").or_insert(Value::Null);
        let mut inputs = object(std::mem::take(inputs_slot));
        let metrics = inputs.entry("metrics").or_insert(Value::Null);
        if !metrics.is_array() {
            *metrics = Value::Array(Vec::new());
        }
        *inputs_slot = Value::Object(inputs);
        if is_falsy(args.get("metric_id")) {
            args.insert("metric_id".into(), Value::from(self.ids.correlation_token(seed)));
        }
        if is_falsy(args.get("time_range_type")) {
            args.insert("time_range_type".into(), Value::from("operation"));
        }
        *args_slot = Value::Object(args);
        Value::Object(calc)
    }
}

fn is_falsy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(flag)) => !flag,
        Some(Value::String(text)) => text.is_empty(),
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(_) => false,
    }
}
