//! Generic type to destination SQL type tables.

use std::collections::HashMap;

use crate::core::{DataType, SqlColumn};

/// Mapping from [`DataType`] to the destination's column type, plus the
/// reverse lookup used when reading a live table back.
#[derive(Debug, Clone)]
pub struct TypeMapping {
    forward: HashMap<DataType, String>,
    /// Lower-cased SQL type name (without modifiers) to generic type.
    reverse: HashMap<String, DataType>,
}

impl TypeMapping {
    /// `forward` must cover `DataType::String`; it doubles as the fallback.
    pub fn new(forward: &[(DataType, &str)], reverse: &[(&str, DataType)]) -> Self {
        Self {
            forward: forward
                .iter()
                .map(|(t, sql)| (*t, sql.to_string()))
                .collect(),
            reverse: reverse
                .iter()
                .map(|(sql, t)| (sql.to_lowercase(), *t))
                .collect(),
        }
    }

    /// SQL type name for a generic type. `Unknown` maps like `String`.
    pub fn sql_type(&self, data_type: DataType) -> &str {
        self.forward
            .get(&data_type)
            .or_else(|| self.forward.get(&DataType::String))
            .map(String::as_str)
            .unwrap_or("text")
    }

    /// Column for a generic type.
    pub fn column(&self, data_type: DataType) -> SqlColumn {
        let stored = if data_type == DataType::Unknown {
            DataType::String
        } else {
            data_type
        };
        SqlColumn::new(self.sql_type(data_type)).with_data_type(stored)
    }

    /// Generic type stored by a destination column type such as
    /// `character varying(255)`.
    pub fn data_type_of(&self, sql_type: &str) -> Option<DataType> {
        let lowered = sql_type.trim().to_lowercase();
        if let Some(t) = self.reverse.get(&lowered) {
            return Some(*t);
        }
        let base = lowered.split('(').next().unwrap_or("").trim();
        self.reverse.get(base).copied()
    }
}
