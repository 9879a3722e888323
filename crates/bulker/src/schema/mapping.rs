//! Mapping an inferred header onto a destination table definition.

use std::collections::{BTreeSet, HashMap};

use crate::adapter::TypeMapping;
use crate::core::identifier::validate_identifier;
use crate::core::{build_constraint_name, BatchHeader, Fields, SqlTypeSuggestion, Table};
use crate::error::{BulkerError, Result};

/// Attach configured SQL type suggestions to the fields they name.
pub fn apply_column_types(fields: &mut Fields, column_types: &HashMap<String, SqlTypeSuggestion>) {
    for (name, suggestion) in column_types {
        if let Some(field) = fields.get_mut(name) {
            field.set_suggestion(suggestion.clone());
        }
    }
}

/// Desired table for a header: every field becomes a column typed by its
/// suggestion for `destination`, or by the destination's generic mapping of
/// its resolved type.
pub fn map_table(
    destination: &str,
    mapping: &TypeMapping,
    schema: &str,
    header: &BatchHeader,
    primary_keys: &BTreeSet<String>,
) -> Result<Table> {
    validate_identifier(&header.table_name)?;

    let mut table = Table::new(schema, header.table_name.clone());
    for (name, field) in header.fields.iter() {
        validate_identifier(name)?;
        let data_type = field.resolved_type();
        let column = match field.suggested_sql_type(destination) {
            Some(mut suggested) => {
                if suggested.data_type.is_none() {
                    suggested.data_type = mapping
                        .data_type_of(&suggested.type_name)
                        .or(Some(data_type));
                }
                suggested
            }
            None => mapping.column(data_type),
        };
        table.columns.insert(name.clone(), column);
    }

    if let Some(missing) = primary_keys
        .iter()
        .find(|pk| !table.columns.contains_key(*pk))
    {
        return Err(BulkerError::Validation(format!(
            "primary key field '{}' is missing from the data for table {}",
            missing, header.table_name
        )));
    }
    if !primary_keys.is_empty() {
        table.pk_fields = primary_keys.clone();
        table.primary_key_name = build_constraint_name(schema, &header.table_name);
    }
    table.partition = header.partition.clone();

    Ok(table)
}
