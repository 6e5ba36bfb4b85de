use serde_json::{Map, Value};
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A loosely-typed configuration document: a flat object of keys to values.
///
/// Bridges build their typed configuration from this explicitly instead of
/// deriving it, so that defaults and missing fields can be reported by name.
pub type Document = Map<String, Value>;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}' (use text or json)", other)),
        }
    }
}

/// Common logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,

    /// Log output format: "text" or "json".
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Returns true if a document value counts as "not provided".
///
/// `null`, empty strings, numeric zero, and empty arrays or objects are falsy.
/// Booleans are always explicit, so `false` is not falsy.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) => false,
    }
}

/// Load a configuration document from a JSON or JSON5 file.
pub fn load_document(path: impl AsRef<Path>) -> Result<Document> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(Error::NotFound {
            path: path.display().to_string(),
        });
    }

    tracing::debug!(path = %path.display(), "Loading configuration document");
    let content = std::fs::read_to_string(path)?;
    parse_document(&content)
}

/// Parse a configuration document from a JSON or JSON5 string.
///
/// The top level must be an object.
pub fn parse_document(content: &str) -> Result<Document> {
    match json5::from_str::<Value>(content)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Malformed(format!(
            "top level must be an object, found {}",
            value_kind(&other)
        ))),
    }
}

/// Short description of a value's JSON type, for error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
