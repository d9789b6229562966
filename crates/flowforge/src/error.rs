use thiserror::Error;

pub type Result<T, E = CompileError> = std::result::Result<T, E>;

/// Structural failures that abort a compile.
///
/// Semantic gaps (a descriptor with no matching metric, a trigger whose inputs
/// resolve to nothing, a zone-scoped item with no zones, unusable coords) are
/// never errors; the affected record is skipped and logged instead.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{what} must be a JSON array")]
    NotAnArray { what: &'static str },

    #[error("{what} #{index} must be a JSON object")]
    NotAnObject { what: &'static str, index: usize },

    #[error("domain item #{index} ({label}) is missing `{field}`; each item needs at least {{ category, label }}")]
    MissingField {
        index: usize,
        field: &'static str,
        label: String,
    },

    #[error("failed to parse {what} as JSON: {source}")]
    Json {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("existing row #{index} is not a fixture row: {source}")]
    InvalidRow {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl CompileError {
    pub(crate) fn json(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            what: what.into(),
            source,
        }
    }
}
