//! PostgreSQL dialect.

use crate::adapter::{Dialect, Statement, TypeMapping, WhenConditions};
use crate::core::identifier::quote_double;
use crate::core::{DataType, SqlColumn, Table};

/// PostgreSQL SQL generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    pub fn new() -> Self {
        Self
    }

    pub fn rename_constraint(&self, schema: &str, table: &str, from: &str, to: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
            self.qualify(schema, table),
            self.quote_ident(from),
            self.quote_ident(to)
        )
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_double(name)
    }

    /// Values travel as text and are cast server-side to the column type.
    fn placeholder(&self, index: usize, column: &SqlColumn) -> String {
        let type_name = if column.type_name.is_empty() {
            "text"
        } else {
            column.type_name.as_str()
        };
        format!("CAST(${}::text AS {})", index, type_name)
    }

    fn create_schema(&self, schema: &str) -> String {
        format!("CREATE SCHEMA IF NOT EXISTS {}", self.quote_ident(schema))
    }

    fn upsert_clause(&self, table: &Table, columns: &[String]) -> String {
        let conflict = self.column_list(&table.pk_fields_sorted());
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !table.pk_fields.contains(*c))
            .map(|c| {
                let quoted = self.quote_ident(c);
                format!("{} = EXCLUDED.{}", quoted, quoted)
            })
            .collect();
        if updates.is_empty() {
            format!("ON CONFLICT ({}) DO NOTHING", conflict)
        } else {
            format!("ON CONFLICT ({}) DO UPDATE SET {}", conflict, updates.join(", "))
        }
    }

    fn drop_primary_key(&self, table: &Table, constraint: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.qualify(&table.schema, &table.name),
            self.quote_ident(constraint)
        )
    }

    fn rename_table(&self, schema: &str, from: &str, to: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME TO {}",
            self.qualify(schema, from),
            self.quote_ident(to)
        )
    }

    fn select_json(&self, table: &Table, conditions: &WhenConditions) -> Statement {
        let mut inner = format!("SELECT * FROM {}", self.qualify(&table.schema, &table.name));
        let (clause, params) = self.where_clause(table, conditions, 0);
        if !clause.is_empty() {
            inner.push_str(" WHERE ");
            inner.push_str(&clause);
        }
        Statement {
            sql: format!("SELECT row_to_json(t)::text FROM ({}) t", inner),
            params,
        }
    }
}

/// Generic to PostgreSQL type tables.
pub fn postgres_type_mapping() -> TypeMapping {
    TypeMapping::new(
        &[
            (DataType::Bool, "boolean"),
            (DataType::Int64, "bigint"),
            (DataType::Float64, "double precision"),
            (DataType::Timestamp, "timestamp with time zone"),
            (DataType::Json, "jsonb"),
            (DataType::String, "text"),
        ],
        &[
            ("boolean", DataType::Bool),
            ("smallint", DataType::Int64),
            ("integer", DataType::Int64),
            ("bigint", DataType::Int64),
            ("int", DataType::Int64),
            ("int4", DataType::Int64),
            ("int8", DataType::Int64),
            ("real", DataType::Float64),
            ("double precision", DataType::Float64),
            ("numeric", DataType::Float64),
            ("decimal", DataType::Float64),
            ("timestamp with time zone", DataType::Timestamp),
            ("timestamp without time zone", DataType::Timestamp),
            ("timestamptz", DataType::Timestamp),
            ("timestamp", DataType::Timestamp),
            ("date", DataType::Timestamp),
            ("json", DataType::Json),
            ("jsonb", DataType::Json),
            ("text", DataType::String),
            ("character varying", DataType::String),
            ("varchar", DataType::String),
            ("character", DataType::String),
            ("uuid", DataType::String),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlValue;
    use serde_json::json;

    fn events() -> Table {
        Table::new("public", "events")
            .with_column("id", SqlColumn::new("bigint").with_data_type(DataType::Int64))
            .with_column("name", SqlColumn::new("text").with_data_type(DataType::String))
            .with_primary_key(["id"])
    }

    #[test]
    fn test_quote_and_qualify() {
        let d = PostgresDialect::new();
        assert_eq!(d.qualify("public", "ev\"il"), "\"public\".\"ev\"\"il\"");
        assert_eq!(d.qualify("", "t"), "\"t\"");
    }

    #[test]
    fn test_create_table_with_managed_pk() {
        let sql = PostgresDialect::new().create_table(&events());
        assert_eq!(
            sql,
            "CREATE TABLE \"public\".\"events\" (\"id\" bigint, \"name\" text, \
             CONSTRAINT \"public_events_pk\" PRIMARY KEY (\"id\"))"
        );
    }

    #[test]
    fn test_insert_with_upsert() {
        let rows = vec![json!({"id": 1, "name": "a"}).as_object().cloned().unwrap()];
        let columns = vec!["id".to_string(), "name".to_string()];
        let stmt = PostgresDialect::new().insert(&events(), &columns, &rows, true);
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"public\".\"events\" (\"id\", \"name\") VALUES \
             (CAST($1::text AS bigint), CAST($2::text AS text)) \
             ON CONFLICT (\"id\") DO UPDATE SET \"name\" = EXCLUDED.\"name\""
        );
        assert_eq!(stmt.params, vec![SqlValue::Int(1), SqlValue::Text("a".into())]);
    }

    #[test]
    fn test_upsert_with_only_key_columns() {
        let clause = PostgresDialect::new().upsert_clause(&events(), &["id".to_string()]);
        assert_eq!(clause, "ON CONFLICT (\"id\") DO NOTHING");
    }

    #[test]
    fn test_select_json_with_conditions() {
        let conditions = WhenConditions::eq("id", json!(5));
        let stmt = PostgresDialect::new().select_json(&events(), &conditions);
        assert_eq!(
            stmt.sql,
            "SELECT row_to_json(t)::text FROM (SELECT * FROM \"public\".\"events\" \
             WHERE \"id\" = CAST($1::text AS bigint)) t"
        );
        assert_eq!(stmt.params, vec![SqlValue::Int(5)]);
    }

    #[test]
    fn test_primary_key_statements() {
        let d = PostgresDialect::new();
        let table = events();
        assert_eq!(
            d.drop_primary_key(&table, "public_events_pk"),
            "ALTER TABLE \"public\".\"events\" DROP CONSTRAINT \"public_events_pk\""
        );
        assert_eq!(
            d.add_primary_key(&table),
            "ALTER TABLE \"public\".\"events\" ADD CONSTRAINT \"public_events_pk\" PRIMARY KEY (\"id\")"
        );
        assert_eq!(
            d.rename_constraint("public", "events", "a", "b"),
            "ALTER TABLE \"public\".\"events\" RENAME CONSTRAINT \"a\" TO \"b\""
        );
    }

    #[test]
    fn test_type_mapping_round_trip() {
        let mapping = postgres_type_mapping();
        for dt in [
            DataType::Bool,
            DataType::Int64,
            DataType::Float64,
            DataType::Timestamp,
            DataType::Json,
            DataType::String,
        ] {
            assert_eq!(mapping.data_type_of(mapping.sql_type(dt)), Some(dt));
        }
        assert_eq!(mapping.data_type_of("character varying(255)"), Some(DataType::String));
        assert_eq!(mapping.data_type_of("numeric(10,2)"), Some(DataType::Float64));
    }
}
