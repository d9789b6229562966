//! Dependency closure over a template, starting from selected page sections.
//!
//! Pages pull in the widgets they reference, widgets contribute every
//! descriptor string they mention, and triggers whose output is needed pull
//! in their input descriptors until nothing new is reached. Metric templates
//! are kept when some needed descriptor has their category and interval.

use std::collections::BTreeSet;

use indexmap::IndexSet;
use serde_json::Value;

use crate::descriptor::{Aliases, Descriptor, is_descriptor};
use crate::template::{AbstractionItem, ItemKind, arrayify, for_each_string};

/// What survived slicing, as indices into the template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Slice {
    /// Pages, charts, cards, maps, metrics, triggers; template order within
    /// each kind.
    pub kept: Vec<usize>,
    /// Every descriptor the kept items need, canonical spelling.
    pub descriptors: BTreeSet<Descriptor>,
}

impl Slice {
    pub fn items<'t>(&self, template: &'t [AbstractionItem]) -> Vec<&'t AbstractionItem> {
        self.kept.iter().map(|&index| &template[index]).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}

/// Section code of a page, read from `section.code` or `page` in that order.
pub fn page_code(item: &AbstractionItem) -> Option<String> {
    let fields = item.get("fields");
    let fields_args = fields.and_then(|fields| fields.get("args"));
    let item_args = item.get("args");

    let section = [fields, fields_args, item_args]
        .into_iter()
        .flatten()
        .find_map(|holder| holder.get("section").filter(|v| !v.is_null()));
    if let Some(code) = section.and_then(|section| section.get("code")).and_then(code_text) {
        return Some(code);
    }

    let page = [fields, fields_args, item_args]
        .into_iter()
        .flatten()
        .find_map(|holder| holder.get("page").filter(|v| !v.is_null()))?;
    match page {
        Value::Object(_) => page.get("code").and_then(code_text),
        other => code_text(other),
    }
}

fn code_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Widget abstraction IDs referenced by a page.
pub fn page_widget_refs(item: &AbstractionItem) -> IndexSet<String> {
    let mut refs = IndexSet::new();
    let mut collect = |value: Option<&Value>| {
        refs.extend(arrayify(value).into_iter().filter_map(code_text));
    };
    let fields = item.get("fields");
    for key in ["charts", "cards", "maps"] {
        collect(fields.and_then(|fields| fields.get(key)));
    }
    let by_category = fields
        .and_then(|fields| fields.get("args"))
        .and_then(|args| args.get("sidepane"))
        .and_then(|sidepane| sidepane.get("by_target_category"));
    for block in sidepane_blocks(by_category) {
        collect(block.get("charts"));
        collect(block.get("cards"));
    }
    collect(
        item.get("dependencies")
            .and_then(|dependencies| dependencies.get("cards_ids")),
    );
    refs
}

/// Sidepane blocks: a list of blocks, a single block, or blocks keyed by
/// target category.
fn sidepane_blocks(value: Option<&Value>) -> Vec<&Value> {
    arrayify(value)
        .into_iter()
        .flat_map(|block| {
            let keyed = block
                .as_object()
                .into_iter()
                .flat_map(|object| object.values())
                .filter(|value| value.is_object());
            std::iter::once(block).chain(keyed)
        })
        .collect()
}

struct TriggerEdges {
    index: usize,
    output: Descriptor,
    /// Prefixed inputs exactly as written; `None` when malformed.
    inputs: Vec<Option<Descriptor>>,
}

/// Computes the subset of `template` needed by the pages in `sections`.
///
/// An empty selection keeps nothing.
pub fn slice(template: &[AbstractionItem], sections: &[String], aliases: &Aliases) -> Slice {
    if sections.is_empty() {
        return Slice::default();
    }
    let wanted: BTreeSet<&str> = sections.iter().map(String::as_str).collect();

    let pages: Vec<usize> = indices_of(template, ItemKind::Page)
        .filter(|&index| {
            page_code(&template[index]).is_some_and(|code| wanted.contains(code.as_str()))
        })
        .collect();

    let mut referenced = IndexSet::new();
    for &index in &pages {
        referenced.extend(page_widget_refs(&template[index]));
    }

    let is_referenced = |index: &usize| {
        template[*index]
            .abstraction_id()
            .is_some_and(|id| referenced.contains(&id))
    };
    let charts: Vec<usize> = indices_of(template, ItemKind::Chart).filter(is_referenced).collect();
    let cards: Vec<usize> = indices_of(template, ItemKind::Card).filter(is_referenced).collect();
    let maps: Vec<usize> = indices_of(template, ItemKind::Map).filter(is_referenced).collect();

    let mut closure: BTreeSet<Descriptor> = BTreeSet::new();
    for &index in charts.iter().chain(&cards).chain(&maps) {
        for_each_string(template[index].raw(), &mut |text| {
            if let Some(descriptor) = Descriptor::parse_with(text, aliases) {
                closure.insert(descriptor);
            }
        });
    }
    log::debug!(
        "{} page(s), {} widget(s), {} seed descriptor(s)",
        pages.len(),
        charts.len() + cards.len() + maps.len(),
        closure.len()
    );

    let edges: Vec<TriggerEdges> = indices_of(template, ItemKind::Trigger)
        .filter_map(|index| {
            let item = &template[index];
            let output = item
                .output_metric()
                .and_then(|text| Descriptor::parse_with(text, aliases))?;
            let inputs = item
                .calculator_input_metrics()
                .into_iter()
                .filter(|text| is_descriptor(text))
                .map(|text| Descriptor::parse_with(text, aliases))
                .collect();
            Some(TriggerEdges {
                index,
                output,
                inputs,
            })
        })
        .collect();

    let mut reached: IndexSet<usize> = IndexSet::new();
    loop {
        let mut advanced = false;
        for edge in &edges {
            if !closure.contains(&edge.output) {
                continue;
            }
            advanced |= reached.insert(edge.index);
            for input in edge.inputs.iter().flatten() {
                advanced |= closure.insert(input.clone());
            }
        }
        if !advanced {
            break;
        }
    }

    // A reached trigger is kept only if every prefixed input is a descriptor
    // the closure contains; malformed inputs can never satisfy that.
    let triggers: Vec<usize> = edges
        .iter()
        .filter(|edge| reached.contains(&edge.index))
        .filter(|edge| {
            let complete = edge
                .inputs
                .iter()
                .all(|input| input.as_ref().is_some_and(|d| closure.contains(d)));
            if !complete {
                log::warn!(
                    "trigger {} has inputs that are not well-formed descriptors; dropped",
                    template[edge.index].display_name()
                );
            }
            complete
        })
        .map(|edge| edge.index)
        .collect();

    let metrics: Vec<usize> = indices_of(template, ItemKind::Metric)
        .filter(|&index| {
            let item = &template[index];
            let (Some(category), Some(interval)) =
                (item.field_str("category"), item.field_str("interval"))
            else {
                return false;
            };
            if category.is_empty() || interval.is_empty() {
                return false;
            }
            let category = aliases.category(category);
            let interval = aliases.interval(interval);
            closure
                .iter()
                .any(|d| d.category == category && d.interval == interval)
        })
        .collect();

    log::info!(
        "sliced {} section(s): {} page(s), {} chart(s), {} card(s), {} map(s), {} metric(s), {} trigger(s)",
        wanted.len(),
        pages.len(),
        charts.len(),
        cards.len(),
        maps.len(),
        metrics.len(),
        triggers.len()
    );

    let kept = [pages, charts, cards, maps, metrics, triggers].concat();
    Slice {
        kept,
        descriptors: closure,
    }
}

fn indices_of(template: &[AbstractionItem], kind: ItemKind) -> impl Iterator<Item = usize> + '_ {
    template
        .iter()
        .enumerate()
        .filter(move |(_, item)| item.kind() == kind)
        .map(|(index, _)| index)
}
