//! Text input: a JSON document, or newline-delimited JSON values.

use serde_json::Value;

use crate::error::{CompileError, Result};

/// Parses `text` as one JSON document, falling back to one value per line.
///
/// Blank input reads as an empty array. When both readings fail the error of
/// the whole-document parse is reported, since that is what the author most
/// likely meant.
pub fn parse_json_text(text: &str, what: &str) -> Result<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    let document_error = match serde_json::from_str(trimmed) {
        Ok(value) => return Ok(value),
        Err(error) => error,
    };
    let lines: Vec<&str> = trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.len() < 2 {
        return Err(CompileError::json(what, document_error));
    }
    lines
        .iter()
        .map(|line| serde_json::from_str(line))
        .collect::<Result<Vec<Value>, _>>()
        .map(Value::Array)
        .map_err(|_| CompileError::json(what, document_error))
}

/// Pretty JSON with two-space indentation.
pub fn to_pretty(value: &Value) -> String {
    // Serializing a `Value` cannot fail: every map key is already a string.
    serde_json::to_string_pretty(value).unwrap_or_default()
}
