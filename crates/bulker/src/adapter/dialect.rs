//! SQL text generation shared by the SQL drivers.
//!
//! Dialects only build statements; executing them is the adapter's job. The
//! default methods produce ANSI SQL and drivers override what their engine
//! spells differently.

use std::collections::BTreeSet;

use serde_json::Value;

use super::conditions::WhenConditions;
use crate::core::{Object, SqlColumn, SqlValue, Table};
use crate::error::{BulkerError, Result};

/// Parameter limit per statement (both PostgreSQL and MySQL cap at 65535).
pub const MAX_PARAMS: usize = 65_535;

/// SQL text with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Columns an insert of `rows` must list: the sorted union of the rows'
/// keys. Every key must exist in `table`.
pub fn insert_columns(table: &Table, rows: &[Object]) -> Result<Vec<String>> {
    let mut names = BTreeSet::new();
    for row in rows {
        for key in row.keys() {
            if !table.columns.contains_key(key) {
                return Err(BulkerError::Validation(format!(
                    "column '{}' does not exist in table {}",
                    key, table.name
                )));
            }
            names.insert(key.clone());
        }
    }
    Ok(names.into_iter().collect())
}

/// Rows per multi-row insert for the given column count.
pub fn rows_per_statement(columns: usize) -> usize {
    (MAX_PARAMS / columns.max(1)).max(1)
}

pub trait Dialect: Send + Sync {
    /// Dialect identifier (e.g., "postgres", "mysql").
    fn name(&self) -> &str;

    fn quote_ident(&self, name: &str) -> String;

    /// Bind placeholder for the 1-based `index`, typed for `column`.
    fn placeholder(&self, index: usize, column: &SqlColumn) -> String;

    fn create_schema(&self, schema: &str) -> String;

    /// Clause that turns an insert into an upsert keyed by the table's
    /// primary key. `columns` are the inserted columns.
    fn upsert_clause(&self, table: &Table, columns: &[String]) -> String;

    fn drop_primary_key(&self, table: &Table, constraint: &str) -> String;

    fn rename_table(&self, schema: &str, from: &str, to: &str) -> String;

    /// SELECT returning one JSON document per row.
    fn select_json(&self, table: &Table, conditions: &WhenConditions) -> Statement;

    fn qualify(&self, schema: &str, table: &str) -> String {
        if schema.is_empty() {
            self.quote_ident(table)
        } else {
            format!("{}.{}", self.quote_ident(schema), self.quote_ident(table))
        }
    }

    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// DDL type of a column. Drivers override to adjust key columns.
    fn column_ddl(&self, _table: &Table, _name: &str, column: &SqlColumn) -> String {
        column.ddl_type().to_string()
    }

    fn primary_key_clause(&self, constraint: &str, fields: &[String]) -> String {
        format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            self.quote_ident(constraint),
            self.column_list(fields)
        )
    }

    fn create_table(&self, table: &Table) -> String {
        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|(name, column)| {
                format!(
                    "{} {}",
                    self.quote_ident(name),
                    self.column_ddl(table, name, column)
                )
            })
            .collect();
        if !table.pk_fields.is_empty() {
            defs.push(self.primary_key_clause(&table.primary_key_name, &table.pk_fields_sorted()));
        }
        format!(
            "CREATE TABLE {} ({})",
            self.qualify(&table.schema, &table.name),
            defs.join(", ")
        )
    }

    fn add_column(&self, table: &Table, name: &str, column: &SqlColumn) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.qualify(&table.schema, &table.name),
            self.quote_ident(name),
            self.column_ddl(table, name, column)
        )
    }

    fn add_primary_key(&self, table: &Table) -> String {
        format!(
            "ALTER TABLE {} ADD {}",
            self.qualify(&table.schema, &table.name),
            self.primary_key_clause(&table.primary_key_name, &table.pk_fields_sorted())
        )
    }

    fn insert(&self, table: &Table, columns: &[String], rows: &[Object], merge: bool) -> Statement {
        let mut params = Vec::with_capacity(rows.len() * columns.len());
        let mut tuples = Vec::with_capacity(rows.len());
        let fallback = SqlColumn::default();
        for row in rows {
            let mut holders = Vec::with_capacity(columns.len());
            for name in columns {
                let column = table.columns.get(name).unwrap_or(&fallback);
                params.push(SqlValue::from_json(
                    row.get(name).unwrap_or(&Value::Null),
                    column.data_type,
                ));
                holders.push(self.placeholder(params.len(), column));
            }
            tuples.push(format!("({})", holders.join(", ")));
        }
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.qualify(&table.schema, &table.name),
            self.column_list(columns),
            tuples.join(", ")
        );
        if merge && !table.pk_fields.is_empty() {
            sql.push(' ');
            sql.push_str(&self.upsert_clause(table, columns));
        }
        Statement { sql, params }
    }

    /// Server-side copy of the columns both tables share.
    fn copy(&self, target: &Table, source: &Table, merge: bool) -> String {
        let columns: Vec<String> = source
            .columns
            .keys()
            .filter(|c| target.columns.contains_key(*c))
            .cloned()
            .collect();
        let list = self.column_list(&columns);
        let mut sql = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            self.qualify(&target.schema, &target.name),
            list,
            list,
            self.qualify(&source.schema, &source.name)
        );
        if merge && !target.pk_fields.is_empty() {
            sql.push(' ');
            sql.push_str(&self.upsert_clause(target, &columns));
        }
        sql
    }

    fn truncate(&self, schema: &str, table: &str) -> String {
        format!("TRUNCATE TABLE {}", self.qualify(schema, table))
    }

    fn drop_table(&self, schema: &str, table: &str, if_exists: bool) -> String {
        format!(
            "DROP TABLE {}{}",
            if if_exists { "IF EXISTS " } else { "" },
            self.qualify(schema, table)
        )
    }

    /// WHERE clause (without the keyword) and its parameters. Placeholders
    /// start after `offset` already-bound parameters.
    fn where_clause(
        &self,
        table: &Table,
        conditions: &WhenConditions,
        offset: usize,
    ) -> (String, Vec<SqlValue>) {
        let fallback = SqlColumn::default();
        let mut params = Vec::new();
        let mut parts = Vec::with_capacity(conditions.conditions.len());
        for condition in &conditions.conditions {
            let column = table.columns.get(&condition.field).unwrap_or(&fallback);
            let field = self.quote_ident(&condition.field);
            if condition.clause.takes_value() {
                params.push(SqlValue::from_json(&condition.value, column.data_type));
                parts.push(format!(
                    "{} {} {}",
                    field,
                    condition.clause.as_sql(),
                    self.placeholder(offset + params.len(), column)
                ));
            } else {
                parts.push(format!("{} {}", field, condition.clause.as_sql()));
            }
        }
        (parts.join(conditions.joiner.as_sql()), params)
    }

    fn delete(&self, table: &Table, conditions: &WhenConditions) -> Statement {
        let mut sql = format!("DELETE FROM {}", self.qualify(&table.schema, &table.name));
        let (clause, params) = self.where_clause(table, conditions, 0);
        if !clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        Statement { sql, params }
    }

    fn count(&self, table: &Table, conditions: &WhenConditions) -> Statement {
        let mut sql = format!(
            "SELECT COUNT(*) FROM {}",
            self.qualify(&table.schema, &table.name)
        );
        let (clause, params) = self.where_clause(table, conditions, 0);
        if !clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        Statement { sql, params }
    }

    fn update(&self, table: &Table, object: &Object, where_key: &str, where_value: &Value) -> Statement {
        let fallback = SqlColumn::default();
        let mut params = Vec::new();
        let mut sets = Vec::new();
        let mut names: Vec<&String> = object.keys().collect();
        names.sort();
        for name in names {
            let column = table.columns.get(name).unwrap_or(&fallback);
            params.push(SqlValue::from_json(&object[name], column.data_type));
            sets.push(format!(
                "{} = {}",
                self.quote_ident(name),
                self.placeholder(params.len(), column)
            ));
        }
        let key_column = table.columns.get(where_key).unwrap_or(&fallback);
        params.push(SqlValue::from_json(where_value, key_column.data_type));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.qualify(&table.schema, &table.name),
            sets.join(", "),
            self.quote_ident(where_key),
            self.placeholder(params.len(), key_column)
        );
        Statement { sql, params }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_columns_union_sorted() {
        let table = Table::new("s", "t")
            .with_column("a", SqlColumn::new("text"))
            .with_column("b", SqlColumn::new("text"))
            .with_column("c", SqlColumn::new("text"));
        let rows = vec![
            json!({"c": 1}).as_object().cloned().unwrap(),
            json!({"a": 1}).as_object().cloned().unwrap(),
        ];
        assert_eq!(insert_columns(&table, &rows).unwrap(), vec!["a", "c"]);
    }

    #[test]
    fn test_insert_columns_rejects_unknown() {
        let table = Table::new("s", "t").with_column("a", SqlColumn::new("text"));
        let rows = vec![json!({"zzz": 1}).as_object().cloned().unwrap()];
        let err = insert_columns(&table, &rows).unwrap_err();
        assert!(err.to_string().contains("column 'zzz' does not exist"));
    }

    #[test]
    fn test_rows_per_statement() {
        assert_eq!(rows_per_statement(0), MAX_PARAMS);
        assert_eq!(rows_per_statement(5), 13_107);
        assert_eq!(rows_per_statement(100_000), 1);
    }
}
