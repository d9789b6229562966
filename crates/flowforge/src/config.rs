use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::descriptor::Aliases;
use crate::error::{CompileError, Result};
use crate::ids::IdPolicy;

/// Storage table used by metric definitions unless a hint overrides it.
pub const DEFAULT_STORAGE_TABLE: i64 = 68;

/// Compile settings, usually read from a `flowforge.toml`:
///
/// ```toml
/// id_policy = "deterministic"
/// storage_table = 68
/// raw_storage_table = 60
/// starter_metrics = true
///
/// [aliases.category]
/// zd = "zone_demand"
///
/// [aliases.interval]
/// "15m" = "QUARTER_HOUR"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub id_policy: IdPolicy,
    pub storage_table: i64,
    pub raw_storage_table: i64,
    /// Emit per-zone and per-sensor starter metrics and triggers.
    pub starter_metrics: bool,
    /// Extra synonyms layered over the built-in alias tables.
    pub aliases: AliasOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasOverrides {
    pub category: HashMap<String, String>,
    pub interval: HashMap<String, String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            id_policy: IdPolicy::default(),
            storage_table: DEFAULT_STORAGE_TABLE,
            raw_storage_table: DEFAULT_STORAGE_TABLE,
            starter_metrics: true,
            aliases: AliasOverrides::default(),
        }
    }
}

impl CompileOptions {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CompileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn aliases(&self) -> Aliases {
        Aliases::extended(&Aliases {
            category: self.aliases.category.clone(),
            interval: self.aliases.interval.clone(),
        })
    }
}
