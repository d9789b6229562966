//! Cards, charts, maps and pages.
//!
//! UI artifacts are instantiated once each in the global context and keyed
//! by integers from the shared counter. Widgets come first so that pages can
//! refer to their keys.

use serde_json::{Map, Value};

use crate::compiler::Compiler;
use crate::context::{Context, ContextKey};
use crate::descriptor::Descriptor;
use crate::fixture::{FixtureRow, Pk};
use crate::map_bindings;
use crate::materialize::object;
use crate::resolve::metric_ids_everywhere;
use crate::template::{AbstractionItem, ItemKind, arrayify};

impl Compiler {
    pub(crate) fn create_widgets(&mut self, kept: &[&AbstractionItem]) {
        for kind in [ItemKind::Card, ItemKind::Chart, ItemKind::Map] {
            for item in kept.iter().filter(|item| item.kind() == kind) {
                self.create_ui_artifact(item);
            }
        }
    }

    pub(crate) fn create_pages(&mut self, kept: &[&AbstractionItem]) {
        for item in kept.iter().filter(|item| item.kind() == ItemKind::Page) {
            self.create_ui_artifact(item);
        }
    }

    fn create_ui_artifact(&mut self, item: &AbstractionItem) {
        let Some(model) = item.kind().output_model() else {
            return;
        };
        let pk = self.ids.next_int();
        let mut fields = object(self.resolver().resolve(&item.fields_value(), &Context::Global));

        match item.kind() {
            ItemKind::Card => {
                self.descriptors_to_metric_ids(&mut fields);
            }
            ItemKind::Chart => {
                let metric_ids = self.descriptors_to_metric_ids(&mut fields);
                fields.insert(
                    "metrics".into(),
                    metric_ids.unwrap_or_else(|| Value::Array(Vec::new())),
                );
            }
            ItemKind::Map => map_bindings::repair(&mut fields, self.network.zones()),
            ItemKind::Page => {
                for key in ["charts", "cards", "maps"] {
                    let refs = fields.get(key).cloned().unwrap_or(Value::Null);
                    let keys = arrayify(Some(&refs)).into_iter().cloned().collect();
                    fields.insert(key.into(), Value::Array(keys));
                }
            }
            ItemKind::Metric | ItemKind::Trigger | ItemKind::Other => {}
        }

        let mut row_fields = Map::new();
        row_fields.insert("id".into(), Value::from(pk));
        row_fields.extend(fields.into_iter().filter(|(key, _)| key != "id"));
        self.push(FixtureRow::new(model, pk, row_fields));

        match item.abstraction_id() {
            Some(abstraction_id) => {
                self.instances.bind(&abstraction_id, ContextKey::Global, Pk::Int(pk));
            }
            None => log::warn!("{:?} without abstraction_id cannot be referenced", item.kind()),
        }
    }

    /// Replaces `args.metric_descriptors` with `args.metric_ids` resolved
    /// across every zone and point. Returns the current `args.metric_ids`.
    fn descriptors_to_metric_ids(&self, fields: &mut Map<String, Value>) -> Option<Value> {
        let args = match fields.get_mut("args") {
            Some(Value::Object(args)) => args,
            None | Some(Value::Null) => return None,
            Some(_) => {
                log::warn!("widget args is not an object; metric descriptors left alone");
                return None;
            }
        };
        let descriptors: Vec<Descriptor> = arrayify(args.get("metric_descriptors"))
            .into_iter()
            .filter_map(Value::as_str)
            .filter_map(|text| Descriptor::parse_with(text, &self.aliases))
            .collect();
        if !descriptors.is_empty() {
            let ids = metric_ids_everywhere(&self.network, &descriptors);
            if ids.is_empty() {
                log::debug!("widget descriptors match no metric");
            }
            let rebuilt: Map<String, Value> = std::mem::take(args)
                .into_iter()
                .filter(|(key, _)| key != "metric_descriptors")
                .collect();
            *args = rebuilt;
            args.insert("metric_ids".into(), Value::from(ids));
        }
        args.get("metric_ids").filter(|ids| ids.is_array()).cloned()
    }
}
