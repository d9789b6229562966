//! Bulk-load rows: `{ "model": ..., "pk": ..., "fields": { ... } }`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CompileError, Result};

pub mod model {
    pub const POLYGON: &str = "fl_monitoring.polygon";
    pub const POINT: &str = "fl_monitoring.point";
    pub const LINK: &str = "fl_monitoring.link";
    pub const METRIC: &str = "fl_monitoring.metricdefinition";
    pub const TRIGGER: &str = "fl_dispatcher.metrictrigger";
    /// Short trigger model name accepted in templates.
    pub const TRIGGER_ALIAS: &str = "metrictrigger";
    pub const PAGE: &str = "fl_page_settings.pagesettings";
    pub const CHART: &str = "fl_page_settings.chart";
    pub const CARD: &str = "fl_page_settings.card";
    pub const MAP: &str = "fl_page_settings.map";
}

/// Primary key: prefixed text for targets/metrics/triggers, integers for
/// links and UI artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pk {
    Int(i64),
    Text(String),
}

impl Pk {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Pk::Text(text) => Some(text),
            Pk::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Pk::Int(n) => Some(*n),
            Pk::Text(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Pk::Int(n) => Value::from(*n),
            Pk::Text(text) => Value::from(text.as_str()),
        }
    }
}

impl fmt::Display for Pk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pk::Int(n) => write!(f, "{n}"),
            Pk::Text(text) => f.write_str(text),
        }
    }
}

impl From<String> for Pk {
    fn from(text: String) -> Self {
        Pk::Text(text)
    }
}

impl From<&str> for Pk {
    fn from(text: &str) -> Self {
        Pk::Text(text.to_owned())
    }
}

impl From<i64> for Pk {
    fn from(n: i64) -> Self {
        Pk::Int(n)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureRow {
    pub model: String,
    pub pk: Pk,
    pub fields: Map<String, Value>,
}

impl FixtureRow {
    pub fn new(model: &str, pk: impl Into<Pk>, fields: Map<String, Value>) -> Self {
        Self {
            model: model.to_owned(),
            pk: pk.into(),
            fields,
        }
    }

    pub fn is(&self, model: &str) -> bool {
        self.model == model
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Reads an array of rows, as produced by a previous run or a database dump.
pub fn rows_from_json(value: &Value) -> Result<Vec<FixtureRow>> {
    let items = value
        .as_array()
        .ok_or(CompileError::NotAnArray { what: "existing fixture" })?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value(item.clone())
                .map_err(|source| CompileError::InvalidRow { index, source })
        })
        .collect()
}

pub fn rows_to_json(rows: &[FixtureRow]) -> Value {
    Value::Array(
        rows.iter()
            .map(|row| {
                let mut object = Map::new();
                object.insert("model".into(), Value::from(row.model.as_str()));
                object.insert("pk".into(), row.pk.to_json());
                object.insert("fields".into(), Value::Object(row.fields.clone()));
                Value::Object(object)
            })
            .collect(),
    )
}
