//! Lookup indices over the targets and metrics known to a compile session.
//!
//! Rows are the source of truth; the network only remembers where things are
//! so descriptor resolution and deduplication never rescan the output.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;

use crate::descriptor::Descriptor;
use crate::fixture::{FixtureRow, model};
use crate::geo::{self, Coord, Polygon};

#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub id: String,
    pub label: String,
    pub polygon: Polygon,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: String,
    pub label: String,
    pub category: String,
    pub coord: Coord,
}

/// Uniqueness key of a metric definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub category: String,
    pub interval: String,
    pub target_id: String,
}

impl MetricKey {
    pub fn new(
        category: impl Into<String>,
        interval: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            interval: interval.into(),
            target_id: target_id.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Network {
    zones: Vec<Zone>,
    points: Vec<Point>,
    point_index: HashMap<String, usize>,
    /// Every target placed for a `(category, label)`, in creation order.
    target_by_label: HashMap<(String, String), Vec<String>>,
    /// Insertion order matters: zone-scoped lookups of point metrics scan it.
    metrics: IndexMap<MetricKey, String>,
    /// Output metric ID -> row index of the trigger producing it.
    triggers: HashMap<String, usize>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes rows that came from outside this run.
    pub fn index_rows(&mut self, rows: &[FixtureRow]) {
        for (row_index, row) in rows.iter().enumerate() {
            match row.model.as_str() {
                model::POLYGON => {
                    let polygon = row
                        .field("coord")
                        .and_then(geo::polygon_from_json)
                        .or_else(|| {
                            row.field_str("coords")
                                .and_then(|text| serde_json::from_str::<Value>(text).ok())
                                .and_then(|value| geo::polygon_from_json(&value))
                        })
                        .unwrap_or_default();
                    self.add_zone(Zone {
                        id: row.pk.to_string(),
                        label: row.field_str("label").unwrap_or_default().to_owned(),
                        polygon,
                    });
                }
                model::POINT => {
                    let id = row.pk.to_string();
                    let label = row.field_str("label").unwrap_or_default();
                    let category = row.field_str("category").unwrap_or_default();
                    let Some(coord) = row.field("coord").and_then(geo::coord_from_json) else {
                        log::warn!("existing point {id} has no usable coord; not placed");
                        self.register_target(category, label, &id);
                        continue;
                    };
                    self.add_point(Point {
                        id,
                        label: label.to_owned(),
                        category: category.to_owned(),
                        coord,
                    });
                }
                model::METRIC => {
                    let key = MetricKey::new(
                        row.field_str("category").unwrap_or_default(),
                        row.field_str("interval").unwrap_or_default(),
                        row.field_str("target_id").unwrap_or_default(),
                    );
                    self.metrics.entry(key).or_insert_with(|| row.pk.to_string());
                }
                model::TRIGGER => {
                    if let Some(output) = row.field_str("output_metric").filter(|o| !o.is_empty()) {
                        self.triggers.insert(output.to_owned(), row_index);
                    }
                }
                _ => {}
            }
        }
    }

    pub fn add_zone(&mut self, zone: Zone) {
        self.register_target("zone", &zone.label, &zone.id);
        self.zones.push(zone);
    }

    pub fn add_point(&mut self, point: Point) {
        self.register_target(&point.category, &point.label, &point.id);
        self.point_index.insert(point.id.clone(), self.points.len());
        self.points.push(point);
    }

    /// Records a target under its label without placing it spatially.
    pub fn register_target(&mut self, category: &str, label: &str, id: &str) {
        let ids = self
            .target_by_label
            .entry((category.to_owned(), label.to_owned()))
            .or_default();
        if !ids.iter().any(|known| known == id) {
            ids.push(id.to_owned());
        }
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn point(&self, id: &str) -> Option<&Point> {
        self.point_index.get(id).map(|&index| &self.points[index])
    }

    pub fn zone_by_label(&self, label: &str) -> Option<&Zone> {
        self.zones.iter().find(|zone| zone.label == label)
    }

    /// First target created for `(category, label)`.
    pub fn target_id(&self, category: &str, label: &str) -> Option<&str> {
        self.target_ids(category, label).first().map(String::as_str)
    }

    /// Every target created for `(category, label)`, oldest first.
    pub fn target_ids(&self, category: &str, label: &str) -> &[String] {
        self.target_by_label
            .get(&(category.to_owned(), label.to_owned()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Zones whose outer ring contains `coord`, in creation order.
    pub fn zones_containing(&self, coord: Coord) -> impl Iterator<Item = &Zone> {
        self.zones
            .iter()
            .filter(move |zone| geo::contains(&zone.polygon, coord))
    }

    pub fn metric(&self, key: &MetricKey) -> Option<&str> {
        self.metrics.get(key).map(String::as_str)
    }

    pub fn insert_metric(&mut self, key: MetricKey, id: String) {
        self.metrics.insert(key, id);
    }

    pub fn trigger_row(&self, output_metric: &str) -> Option<usize> {
        self.triggers.get(output_metric).copied()
    }

    pub fn insert_trigger(&mut self, output_metric: String, row_index: usize) {
        self.triggers.insert(output_metric, row_index);
    }

    /// Metrics matching `descriptor` owned by sensors inside `zone`.
    ///
    /// The owning point must carry the sensor category the metric category
    /// requires (pressure metrics on pressure sensors, `flow_*` on meters).
    pub fn point_metrics_in_zone(&self, descriptor: &Descriptor, zone: &Zone) -> Vec<String> {
        self.sensor_metrics_in_zone(&descriptor.category, Some(&descriptor.interval), zone)
    }

    /// Like [`Network::point_metrics_in_zone`], with the interval optional.
    pub fn sensor_metrics_in_zone(
        &self,
        category: &str,
        interval: Option<&str>,
        zone: &Zone,
    ) -> Vec<String> {
        let required = crate::descriptor::required_sensor_category(category);
        self.metrics
            .iter()
            .filter(|(key, _)| {
                key.category == category && interval.is_none_or(|interval| key.interval == interval)
            })
            .filter_map(|(key, id)| {
                let point = self.point(&key.target_id)?;
                if required.is_some_and(|category| point.category != category) {
                    return None;
                }
                geo::contains(&zone.polygon, point.coord).then(|| id.clone())
            })
            .collect()
    }
}
