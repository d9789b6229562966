//! Domain items (zones and sensors) into targets, links and starter metrics.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::compiler::Compiler;
use crate::error::{CompileError, Result};
use crate::fixture::{FixtureRow, model};
use crate::geo::{self, Coord};
use crate::ids::IdKind;
use crate::materialize::{TriggerSpec, calculator, object};
use crate::network::{MetricKey, Point, Zone};

pub const ZONE: &str = "zone";
pub const FLOW_METER: &str = "flow_meter";
pub const PRESSURE_SENSOR: &str = "pressure_sensor";

const LINK_RELATION: &str = "flow_meter_in_zone";
const QUARTER_HOUR: &str = "QUARTER_HOUR";

/// One zone or sensor as written by a user.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DomainItem {
    pub category: String,
    pub label: String,
    /// Polygon rings for zones, `[x, y]` for points; may also be JSON text.
    #[serde(default)]
    pub coords: Value,
    /// Label of a zone this sensor feeds.
    #[serde(default, rename = "inletFor", alias = "inlet_for")]
    pub inlet_for: Option<String>,
    #[serde(default, rename = "outletFor", alias = "outlet_for")]
    pub outlet_for: Option<String>,
    #[serde(default)]
    pub metric_unit: Option<String>,
    #[serde(default)]
    pub metric_interval: Option<String>,
    #[serde(default)]
    pub metric_category: Option<String>,
    #[serde(default)]
    pub metric_storage_table: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub attribute: Option<Value>,
    #[serde(default)]
    pub tags_list: Option<Vec<Value>>,
}

impl DomainItem {
    fn kind(&self) -> String {
        self.category.to_lowercase()
    }
}

/// Parses and validates the domain array.
///
/// Each item needs a non-empty `category` and `label`.
pub fn parse_domain(value: &Value) -> Result<Vec<DomainItem>> {
    let items = value
        .as_array()
        .ok_or(CompileError::NotAnArray { what: "domain" })?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let object = item.as_object().ok_or(CompileError::NotAnObject {
                what: "domain item",
                index,
            })?;
            let label = object
                .get("label")
                .and_then(Value::as_str)
                .filter(|label| !label.is_empty());
            let category = object
                .get("category")
                .and_then(Value::as_str)
                .filter(|category| !category.is_empty());
            let shown = label.unwrap_or("<unlabelled>").to_owned();
            if category.is_none() {
                return Err(CompileError::MissingField {
                    index,
                    field: "category",
                    label: shown,
                });
            }
            if label.is_none() {
                return Err(CompileError::MissingField {
                    index,
                    field: "label",
                    label: shown,
                });
            }
            serde_json::from_value(item.clone()).map_err(|source| {
                CompileError::json(format!("domain item #{index} ({shown})"), source)
            })
        })
        .collect()
}

enum Geometry {
    Area(geo::Polygon),
    /// `None` when the item had no usable coordinate.
    Spot(Option<Coord>),
}

/// Reads an item's geometry and the JSON its target row stores.
///
/// Missing or malformed coords still yield a target: a zone with no ring
/// contains nothing, a point without a coordinate lies in no zone.
fn geometry_of(item: &DomainItem) -> (Geometry, Value) {
    let coords = match &item.coords {
        Value::String(text) => serde_json::from_str(text).unwrap_or(Value::Null),
        other => other.clone(),
    };
    if item.kind() == ZONE {
        match geo::polygon_from_json(&coords) {
            Some(polygon) => (Geometry::Area(polygon), coords),
            None => {
                log::warn!("zone {:?} has no usable coords; it contains nothing", item.label);
                (Geometry::Area(Vec::new()), Value::Array(Vec::new()))
            }
        }
    } else {
        match geo::coord_from_json(&coords) {
            Some(coord) => (Geometry::Spot(Some(coord)), coords),
            None => {
                log::warn!("{:?} has no usable [x, y] coords; it is not placed", item.label);
                (Geometry::Spot(None), Value::Null)
            }
        }
    }
}

fn icon_code(kind: &str) -> &'static str {
    match kind {
        ZONE => "Zone",
        FLOW_METER => "Flow_Meter",
        PRESSURE_SENSOR => "Pressure_Sensor",
        _ => "Device",
    }
}

/// Polygon and point rows share one field layout.
fn target_fields(
    item: &DomainItem,
    id: &str,
    kind: &str,
    coord: Value,
    coords_text: String,
) -> Map<String, Value> {
    let attribute = item.attribute.clone().unwrap_or_else(|| {
        json!({ "metadata": [], "icon_code": icon_code(kind), "icon_size": 1 })
    });
    object(json!({
        "id": id,
        "tags": "[]",
        "coord": coord,
        "label": item.label,
        "notes": item.notes.clone().unwrap_or_else(|| item.label.clone()),
        "coords": coords_text,
        "category": kind,
        "attribute": attribute,
        "is_active": true,
        "tags_list": item.tags_list.clone().unwrap_or_default(),
    }))
}

/// A target this call placed or reused, with the item it came from.
struct Placed<'d> {
    item: &'d DomainItem,
    kind: String,
    id: String,
}

impl Compiler {
    /// Compiles domain items and returns the rows this call appended.
    ///
    /// Every item gets its own target. The n-th item with a given
    /// `(category, label)` reuses the n-th target already known under that
    /// label, so compiling the same items twice adds nothing.
    pub fn compile_domain(&mut self, items: &[DomainItem]) -> Result<&[FixtureRow]> {
        let start = self.rows.len();
        let mut occurrences: HashMap<(String, String), usize> = HashMap::new();
        let mut placed = Vec::with_capacity(items.len());
        for item in items {
            let kind = item.kind();
            let seen = occurrences.entry((kind.clone(), item.label.clone())).or_insert(0);
            let nth = *seen;
            *seen += 1;
            if let Some(id) = self.network.target_ids(&kind, &item.label).get(nth) {
                log::debug!("{kind} {:?} already exists as {id}", item.label);
                let id = id.clone();
                placed.push(Placed { item, kind, id });
                continue;
            }
            if nth > 0 {
                log::warn!("{kind} label {:?} is shared by several items", item.label);
            }
            let (geometry, coords) = geometry_of(item);
            let id = match geometry {
                Geometry::Area(polygon) => self.place_zone(item, polygon, coords),
                Geometry::Spot(coord) => self.place_point(item, &kind, coord, coords),
            };
            placed.push(Placed { item, kind, id });
        }

        let inlets = self.link_sensors(&placed);
        if self.options.starter_metrics {
            self.starter_metrics(&placed, &inlets);
        }
        log::info!(
            "{} domain item(s) produced {} row(s)",
            items.len(),
            self.rows.len() - start
        );
        Ok(&self.rows[start..])
    }

    fn place_zone(&mut self, item: &DomainItem, polygon: geo::Polygon, coords: Value) -> String {
        let id = self.ids.make(IdKind::Polygon, &format!("zone|{}", item.label));
        let text = serde_json::to_string_pretty(&coords).unwrap_or_default();
        let fields = target_fields(item, &id, ZONE, coords, text);
        self.push(FixtureRow::new(model::POLYGON, id.as_str(), fields));
        self.network.add_zone(Zone {
            id: id.clone(),
            label: item.label.clone(),
            polygon,
        });
        id
    }

    fn place_point(
        &mut self,
        item: &DomainItem,
        kind: &str,
        coord: Option<Coord>,
        coords: Value,
    ) -> String {
        if ![FLOW_METER, PRESSURE_SENSOR].contains(&kind) {
            log::warn!(
                "unknown category {:?} for {:?}; placed as a generic point",
                item.category,
                item.label
            );
        }
        let id = self.ids.make(IdKind::Point, &format!("point|{kind}|{}", item.label));
        let text = coord.map_or_else(String::new, |[x, y]| format!("{x}, {y}"));
        let fields = target_fields(item, &id, kind, coords, text);
        self.push(FixtureRow::new(model::POINT, id.as_str(), fields));
        match coord {
            Some(coord) => self.network.add_point(Point {
                id: id.clone(),
                label: item.label.clone(),
                category: kind.to_owned(),
                coord,
            }),
            None => self.network.register_target(kind, &item.label, &id),
        }
        id
    }

    /// Emits inlet/outlet links and returns, per zone, the flow meters feeding
    /// it.
    fn link_sensors(&mut self, placed: &[Placed<'_>]) -> IndexMap<String, Vec<String>> {
        let mut seen: HashSet<(String, String, String)> = self
            .rows
            .iter()
            .filter(|row| row.is(model::LINK))
            .filter_map(|row| {
                let role = row.fields.get("args")?.get("role")?.get(0)?.as_str()?;
                Some((
                    row.field_str("target_id1")?.to_owned(),
                    row.field_str("target_id2")?.to_owned(),
                    role.to_owned(),
                ))
            })
            .collect();
        let mut inlets: IndexMap<String, Vec<String>> = IndexMap::new();

        for sensor in placed.iter().filter(|p| p.kind != ZONE) {
            let mut wanted: Vec<(String, &str)> = Vec::new();
            if sensor.kind == FLOW_METER {
                let coord = self.network.point(&sensor.id).map(|point| point.coord);
                match coord.and_then(|coord| self.network.zones_containing(coord).next()) {
                    Some(zone) => wanted.push((zone.id.clone(), "inlet")),
                    None => log::debug!("flow meter {:?} lies in no zone", sensor.item.label),
                }
            }
            for (label, role) in [
                (&sensor.item.inlet_for, "inlet"),
                (&sensor.item.outlet_for, "outlet"),
            ] {
                let Some(label) = label else { continue };
                match self.network.zone_by_label(label) {
                    Some(zone) => wanted.push((zone.id.clone(), role)),
                    None => log::warn!(
                        "{:?} names unknown zone {label:?} as {role}; ignored",
                        sensor.item.label
                    ),
                }
            }

            for (zone_id, role) in wanted {
                if role == "inlet" && sensor.kind == FLOW_METER {
                    let meters = inlets.entry(zone_id.clone()).or_default();
                    if !meters.contains(&sensor.id) {
                        meters.push(sensor.id.clone());
                    }
                }
                if !seen.insert((sensor.id.clone(), zone_id.clone(), role.to_owned())) {
                    continue;
                }
                let id = self.ids.next_int();
                let fields = object(json!({
                    "id": id,
                    "args": { "role": [role], "order": null },
                    "notes": "",
                    "target_id1": sensor.id,
                    "target_id2": zone_id,
                    "relation_type": LINK_RELATION,
                }));
                self.push(FixtureRow::new(model::LINK, id, fields));
            }
        }
        inlets
    }

    fn starter_metrics(&mut self, placed: &[Placed<'_>], inlets: &IndexMap<String, Vec<String>>) {
        let raw_table = self.options.raw_storage_table;
        for target in placed {
            let label = &target.item.label;
            match target.kind.as_str() {
                ZONE => {
                    self.ensure_metric(object(json!({
                        "unit": "m³/h",
                        "label": format!("Zone Demand – {label}"),
                        "category": "zone_demand",
                        "interval": QUARTER_HOUR,
                        "describes": QUARTER_HOUR,
                        "tags_list": ["sum_aggregated"],
                        "target_id": target.id,
                    })));
                    self.ensure_metric(object(json!({
                        "unit": "m",
                        "label": format!("AZP – {label}"),
                        "category": "average_zone_pressure",
                        "interval": QUARTER_HOUR,
                        "describes": QUARTER_HOUR,
                        "tags_list": ["avg_aggregated"],
                        "target_id": target.id,
                    })));
                }
                FLOW_METER => {
                    let hints = target.item;
                    let interval = hints.metric_interval.as_deref().unwrap_or(QUARTER_HOUR);
                    let reading = self.ensure_metric(object(json!({
                        "unit": hints.metric_unit.as_deref().unwrap_or("m³"),
                        "label": format!("Flow Reading – {label}"),
                        "source": "USER",
                        "category": hints.metric_category.as_deref().unwrap_or("flow_reading"),
                        "interval": interval,
                        "describes": interval,
                        "tags_list": ["raw_data"],
                        "target_id": target.id,
                        "storage_table": hints.metric_storage_table.unwrap_or(raw_table),
                    })));
                    let volume = self.ensure_metric(object(json!({
                        "unit": "m³",
                        "label": format!("Flow Volume – {label}"),
                        "category": "flow_volume",
                        "interval": QUARTER_HOUR,
                        "describes": QUARTER_HOUR,
                        "tags_list": ["sum_aggregated"],
                        "target_id": target.id,
                    })));
                    let token = self.ids.correlation_token(&format!("delta|{}", target.id));
                    self.upsert_trigger(TriggerSpec {
                        calculators: vec![calculator("CALCULATE_DELTA", json!({}), token)],
                        description: format!("Compute Flow Volume – {label}"),
                        schedule_job: String::new(),
                        input_metrics: vec![reading],
                        output_metric: volume,
                    });
                }
                PRESSURE_SENSOR => {
                    let hints = target.item;
                    let interval = hints.metric_interval.as_deref().unwrap_or(QUARTER_HOUR);
                    self.ensure_metric(object(json!({
                        "unit": hints.metric_unit.as_deref().unwrap_or("m"),
                        "label": format!("Pressure – {label}"),
                        "category": hints.metric_category.as_deref().unwrap_or("pressure"),
                        "interval": interval,
                        "describes": interval,
                        "tags_list": ["raw_data"],
                        "target_id": target.id,
                        "storage_table": hints.metric_storage_table.unwrap_or(raw_table),
                    })));
                }
                _ => {}
            }
        }

        for zone in placed.iter().filter(|p| p.kind == ZONE) {
            self.zone_triggers(&zone.id, &zone.item.label, inlets.get(&zone.id));
        }
    }

    fn zone_triggers(&mut self, zone_id: &str, label: &str, meters: Option<&Vec<String>>) {
        let metric = |category: &str, target: &str| MetricKey::new(category, QUARTER_HOUR, target);

        let volumes: Vec<String> = meters
            .into_iter()
            .flatten()
            .filter_map(|meter| self.network.metric(&metric("flow_volume", meter.as_str())))
            .map(str::to_owned)
            .collect();
        let demand = self
            .network
            .metric(&metric("zone_demand", zone_id))
            .filter(|_| !volumes.is_empty())
            .map(str::to_owned);
        if let Some(demand) = demand {
            let token = self.ids.correlation_token(&format!("demand|{zone_id}"));
            self.upsert_trigger(TriggerSpec {
                calculators: vec![calculator("CALCULATE_ZONE_DEMAND", json!({}), token)],
                description: format!("Zone Demand – {label}"),
                schedule_job: String::new(),
                input_metrics: volumes,
                output_metric: demand,
            });
        }

        let Some(zone) = self.network.zones().iter().find(|zone| zone.id == zone_id) else {
            return;
        };
        let pressures = self.network.sensor_metrics_in_zone("pressure", None, zone);
        let azp = self
            .network
            .metric(&metric("average_zone_pressure", zone_id))
            .filter(|_| !pressures.is_empty())
            .map(str::to_owned);
        if let Some(azp) = azp {
            let token = self.ids.correlation_token(&format!("azp|{zone_id}"));
            let mut calc = calculator("CALCULATE_AVG", json!({}), token);
            calc["calc_args"]["aggregation_groups"] = json!([]);
            self.upsert_trigger(TriggerSpec {
                calculators: vec![calc],
                description: format!("AZP – {label}"),
                schedule_job: String::new(),
                input_metrics: pressures,
                output_metric: azp,
            });
        }
    }
}
