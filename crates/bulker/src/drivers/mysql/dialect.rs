//! MySQL dialect.

use crate::adapter::{Dialect, Statement, TypeMapping, WhenConditions};
use crate::core::identifier::{quote_backtick, quote_literal};
use crate::core::{DataType, SqlColumn, Table};

/// Key columns cannot be TEXT in MySQL; they are declared with this type.
pub const KEY_TEXT_TYPE: &str = "VARCHAR(255)";

/// MySQL SQL generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    pub fn new() -> Self {
        Self
    }

    /// Atomic multi-table rename.
    pub fn rename_tables(&self, schema: &str, renames: &[(&str, &str)]) -> String {
        let parts: Vec<String> = renames
            .iter()
            .map(|(from, to)| format!("{} TO {}", self.qualify(schema, from), self.qualify(schema, to)))
            .collect();
        format!("RENAME TABLE {}", parts.join(", "))
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_backtick(name)
    }

    fn placeholder(&self, _index: usize, _column: &SqlColumn) -> String {
        "?".to_string()
    }

    fn create_schema(&self, schema: &str) -> String {
        format!("CREATE DATABASE IF NOT EXISTS {}", self.quote_ident(schema))
    }

    fn upsert_clause(&self, table: &Table, columns: &[String]) -> String {
        let mut updates: Vec<String> = columns
            .iter()
            .filter(|c| !table.pk_fields.contains(*c))
            .map(|c| {
                let quoted = self.quote_ident(c);
                format!("{} = VALUES({})", quoted, quoted)
            })
            .collect();
        if updates.is_empty() {
            // No-op update keeps duplicate keys from failing the statement.
            if let Some(pk) = table.pk_fields.iter().next() {
                let quoted = self.quote_ident(pk);
                updates.push(format!("{} = {}", quoted, quoted));
            }
        }
        format!("ON DUPLICATE KEY UPDATE {}", updates.join(", "))
    }

    fn column_ddl(&self, table: &Table, name: &str, column: &SqlColumn) -> String {
        let ddl = column.ddl_type();
        if table.pk_fields.contains(name) && ddl.eq_ignore_ascii_case("text") {
            KEY_TEXT_TYPE.to_string()
        } else {
            ddl.to_string()
        }
    }

    fn drop_primary_key(&self, table: &Table, _constraint: &str) -> String {
        format!(
            "ALTER TABLE {} DROP PRIMARY KEY",
            self.qualify(&table.schema, &table.name)
        )
    }

    fn rename_table(&self, schema: &str, from: &str, to: &str) -> String {
        self.rename_tables(schema, &[(from, to)])
    }

    fn select_json(&self, table: &Table, conditions: &WhenConditions) -> Statement {
        let pairs: Vec<String> = table
            .columns
            .keys()
            .map(|c| format!("{}, {}", quote_literal(c), self.quote_ident(c)))
            .collect();
        let mut sql = format!(
            "SELECT JSON_OBJECT({}) FROM {}",
            pairs.join(", "),
            self.qualify(&table.schema, &table.name)
        );
        let (clause, params) = self.where_clause(table, conditions, 0);
        if !clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        Statement { sql, params }
    }
}

/// Generic to MySQL type tables.
pub fn mysql_type_mapping() -> TypeMapping {
    TypeMapping::new(
        &[
            (DataType::Bool, "boolean"),
            (DataType::Int64, "bigint"),
            (DataType::Float64, "double"),
            (DataType::Timestamp, "datetime(6)"),
            (DataType::Json, "json"),
            (DataType::String, "text"),
        ],
        &[
            ("boolean", DataType::Bool),
            ("tinyint(1)", DataType::Bool),
            ("tinyint", DataType::Int64),
            ("smallint", DataType::Int64),
            ("mediumint", DataType::Int64),
            ("int", DataType::Int64),
            ("bigint", DataType::Int64),
            ("float", DataType::Float64),
            ("double", DataType::Float64),
            ("decimal", DataType::Float64),
            ("datetime", DataType::Timestamp),
            ("timestamp", DataType::Timestamp),
            ("date", DataType::Timestamp),
            ("json", DataType::Json),
            ("text", DataType::String),
            ("mediumtext", DataType::String),
            ("longtext", DataType::String),
            ("varchar", DataType::String),
            ("char", DataType::String),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users() -> Table {
        Table::new("app", "users")
            .with_column("email", SqlColumn::new("text").with_data_type(DataType::String))
            .with_column("age", SqlColumn::new("bigint").with_data_type(DataType::Int64))
            .with_primary_key(["email"])
    }

    #[test]
    fn test_text_key_becomes_varchar() {
        let sql = MysqlDialect::new().create_table(&users());
        assert_eq!(
            sql,
            "CREATE TABLE `app`.`users` (`age` bigint, `email` VARCHAR(255), \
             CONSTRAINT `app_users_pk` PRIMARY KEY (`email`))"
        );
    }

    #[test]
    fn test_insert_on_duplicate_key() {
        let rows = vec![json!({"email": "a@x", "age": 3}).as_object().cloned().unwrap()];
        let columns = vec!["age".to_string(), "email".to_string()];
        let stmt = MysqlDialect::new().insert(&users(), &columns, &rows, true);
        assert_eq!(
            stmt.sql,
            "INSERT INTO `app`.`users` (`age`, `email`) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE `age` = VALUES(`age`)"
        );
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_upsert_with_only_key_columns() {
        let clause = MysqlDialect::new().upsert_clause(&users(), &["email".to_string()]);
        assert_eq!(clause, "ON DUPLICATE KEY UPDATE `email` = `email`");
    }

    #[test]
    fn test_rename_and_drop_primary_key() {
        let d = MysqlDialect::new();
        assert_eq!(
            d.rename_tables("app", &[("users", "users_old"), ("users_tmp", "users")]),
            "RENAME TABLE `app`.`users` TO `app`.`users_old`, `app`.`users_tmp` TO `app`.`users`"
        );
        assert_eq!(
            d.drop_primary_key(&users(), "ignored"),
            "ALTER TABLE `app`.`users` DROP PRIMARY KEY"
        );
    }

    #[test]
    fn test_select_json() {
        let stmt = MysqlDialect::new().select_json(&users(), &WhenConditions::eq("age", json!(3)));
        assert_eq!(
            stmt.sql,
            "SELECT JSON_OBJECT('age', `age`, 'email', `email`) FROM `app`.`users` WHERE `age` = ?"
        );
    }

    #[test]
    fn test_tinyint_one_is_bool() {
        let mapping = mysql_type_mapping();
        assert_eq!(mapping.data_type_of("tinyint(1)"), Some(DataType::Bool));
        assert_eq!(mapping.data_type_of("tinyint(4)"), Some(DataType::Int64));
        assert_eq!(mapping.data_type_of("varchar(255)"), Some(DataType::String));
        assert_eq!(mapping.data_type_of("datetime(6)"), Some(DataType::Timestamp));
    }
}
