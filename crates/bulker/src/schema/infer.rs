//! Type inference over untyped objects.

use std::fmt;

use serde_json::Value;

use super::flatten::flatten;
use crate::core::{
    parse_timestamp, BatchHeader, DataType, Field, Fields, Object, SqlColumn, SqlTypeSuggestion,
};

/// Key prefix of per-field SQL type hints carried inside objects, e.g.
/// `"__sql_type_price": "numeric(12,2)"`.
pub const SQL_TYPE_HINT_PREFIX: &str = "__sql_type_";

/// A recoverable inference problem, reported instead of logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDiagnostic {
    pub field: String,
    pub message: String,
}

impl fmt::Display for SchemaDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Generic type of a single JSON value. `None` for null.
pub fn value_type(value: &Value) -> Option<DataType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(DataType::Bool),
        Value::Number(n) if n.is_i64() => Some(DataType::Int64),
        Value::Number(_) => Some(DataType::Float64),
        Value::String(s) if parse_timestamp(s).is_some() => Some(DataType::Timestamp),
        Value::String(_) => Some(DataType::String),
        Value::Array(_) | Value::Object(_) => Some(DataType::Json),
    }
}

/// An object after flattening and hint extraction, with its fields.
#[derive(Debug, Clone, Default)]
pub struct ProcessedObject {
    pub object: Object,
    pub fields: Fields,
    pub diagnostics: Vec<SchemaDiagnostic>,
}

/// Result of inferring a schema from many objects.
#[derive(Debug, Clone, Default)]
pub struct InferredSchema {
    pub header: BatchHeader,
    pub diagnostics: Vec<SchemaDiagnostic>,
}

/// Turns raw objects into typed fields.
#[derive(Debug, Clone)]
pub struct TypeResolver {
    flatten: bool,
}

impl Default for TypeResolver {
    fn default() -> Self {
        Self { flatten: true }
    }
}

impl TypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep nested objects as JSON values instead of flattening them.
    pub fn without_flattening(mut self) -> Self {
        self.flatten = false;
        self
    }

    pub fn process(&self, object: &Object) -> ProcessedObject {
        let mut object = if self.flatten {
            flatten(object)
        } else {
            object.clone()
        };

        let mut diagnostics = Vec::new();
        let hints = extract_hints(&mut object, &mut diagnostics);

        let mut fields = Fields::new();
        for (name, value) in &object {
            if let Some(data_type) = value_type(value) {
                fields.insert(name.clone(), Field::new(data_type));
            }
        }
        for (name, suggestion) in hints {
            match fields.get_mut(&name) {
                Some(field) => field.set_suggestion(suggestion),
                None => {
                    let mut field = Field::from_occurrences([DataType::Unknown]);
                    field.set_suggestion(suggestion);
                    fields.insert(name, field);
                }
            }
        }

        ProcessedObject {
            object,
            fields,
            diagnostics,
        }
    }
}

fn extract_hints(
    object: &mut Object,
    diagnostics: &mut Vec<SchemaDiagnostic>,
) -> Vec<(String, SqlTypeSuggestion)> {
    let hint_keys: Vec<String> = object
        .keys()
        .filter(|k| k.starts_with(SQL_TYPE_HINT_PREFIX))
        .cloned()
        .collect();

    let mut hints = Vec::with_capacity(hint_keys.len());
    for key in hint_keys {
        let Some(value) = object.remove(&key) else {
            continue;
        };
        let field = key[SQL_TYPE_HINT_PREFIX.len()..].to_string();
        if field.is_empty() {
            diagnostics.push(SchemaDiagnostic {
                field: key,
                message: "SQL type hint without a field name".into(),
            });
            continue;
        }
        match parse_hint(&value) {
            Some(column) => hints.push((field, SqlTypeSuggestion::new(column))),
            None => diagnostics.push(SchemaDiagnostic {
                field,
                message: format!(
                    "SQL type hint must be a type name or [type, ddl], got {}",
                    value
                ),
            }),
        }
    }
    hints
}

fn parse_hint(value: &Value) -> Option<SqlColumn> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(SqlColumn::new(s.trim())),
        Value::Array(items) => match items.as_slice() {
            [Value::String(t)] if !t.is_empty() => Some(SqlColumn::new(t.as_str())),
            [Value::String(t), Value::String(ddl)] if !t.is_empty() => {
                Some(SqlColumn::new(t.as_str()).with_column_type(ddl.as_str()))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Infer the merged schema of `objects` for `table`.
pub fn infer_schema(table: &str, objects: &[Object]) -> InferredSchema {
    let resolver = TypeResolver::new();
    let mut header = BatchHeader::new(table);
    let mut diagnostics = Vec::new();
    for object in objects {
        let processed = resolver.process(object);
        header.fields.merge(&processed.fields);
        diagnostics.extend(processed.diagnostics);
    }
    diagnostics.extend(resolve_fields(&mut header.fields));
    InferredSchema {
        header,
        diagnostics,
    }
}

/// Resolve and memoize every field, collecting diagnostics.
pub fn resolve_fields(fields: &mut Fields) -> Vec<SchemaDiagnostic> {
    let mut diagnostics = Vec::new();
    for (name, field) in fields.iter_mut() {
        if let Some(message) = field.resolve().diagnostic {
            diagnostics.push(SchemaDiagnostic {
                field: name.clone(),
                message,
            });
        }
    }
    diagnostics
}
