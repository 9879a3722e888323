//! Destination SQL column types and per-destination type suggestions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::data_type::DataType;

/// A column type as the destination understands it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlColumn {
    /// Short SQL type name, e.g. `text` or `bigint`.
    pub type_name: String,

    /// Full DDL fragment. Falls back to `type_name` when empty.
    #[serde(default)]
    pub column_type: String,

    /// True when the type came from a user suggestion rather than the
    /// destination's generic mapping.
    #[serde(default)]
    pub is_override: bool,

    /// Generic type the column stores, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
}

impl SqlColumn {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn with_column_type(mut self, column_type: impl Into<String>) -> Self {
        self.column_type = column_type.into();
        self
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    /// Fragment to use in `CREATE TABLE` / `ADD COLUMN` statements.
    pub fn ddl_type(&self) -> &str {
        if self.column_type.is_empty() {
            &self.type_name
        } else {
            &self.column_type
        }
    }
}

/// User-supplied SQL types for one field: a default plus overrides keyed by
/// destination id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlTypeSuggestion {
    pub default: SqlColumn,
    pub per_destination: HashMap<String, SqlColumn>,
}

impl SqlTypeSuggestion {
    pub fn new(default: SqlColumn) -> Self {
        Self {
            default,
            per_destination: HashMap::new(),
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>, column: SqlColumn) -> Self {
        self.per_destination.insert(destination.into(), column);
        self
    }

    /// Suggested column for a destination: its own entry first, then the
    /// default when it names a type. The result is always marked as an
    /// override.
    pub fn for_destination(&self, destination: &str) -> Option<SqlColumn> {
        let chosen = match self.per_destination.get(destination) {
            Some(column) => column,
            None if !self.default.type_name.is_empty() => &self.default,
            None => return None,
        };
        Some(SqlColumn {
            type_name: chosen.type_name.clone(),
            column_type: chosen.column_type.clone(),
            is_override: true,
            data_type: chosen.data_type,
        })
    }
}
