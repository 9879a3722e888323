//! Table snapshots and the additive schema diff.

use std::collections::{BTreeMap, BTreeSet};

use super::column::SqlColumn;
use super::identifier::derived_name;
use super::partition::DatePartition;

/// Column name to SQL column type.
pub type Columns = BTreeMap<String, SqlColumn>;

/// Primary-key constraint name the loader uses for tables it manages:
/// `<schema>_<table>_pk`, shortened to a valid identifier the same way the
/// destination would truncate it.
pub fn build_constraint_name(schema: &str, table: &str) -> String {
    derived_name(&format!("{}_{}", schema, table), "_pk")
}

/// Snapshot of a destination table, or a schema patch to apply to one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub columns: Columns,
    pub pk_fields: BTreeSet<String>,
    pub primary_key_name: String,
    pub partition: Option<DatePartition>,
    /// Patch flag: drop the current primary key before (re)creating it.
    pub delete_pk_fields: bool,
}

impl Table {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, column: SqlColumn) -> Self {
        self.columns.insert(name.into(), column);
        self
    }

    pub fn with_primary_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pk_fields = fields.into_iter().map(Into::into).collect();
        self.primary_key_name = if self.pk_fields.is_empty() {
            String::new()
        } else {
            build_constraint_name(&self.schema, &self.name)
        };
        self
    }

    /// False for the "no such table" sentinel and for empty patches.
    pub fn exists(&self) -> bool {
        !self.columns.is_empty() || !self.pk_fields.is_empty() || self.delete_pk_fields
    }

    pub fn sorted_column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    pub fn pk_fields_sorted(&self) -> Vec<String> {
        self.pk_fields.iter().cloned().collect()
    }

    /// True when the primary key was created by this loader (or there is none).
    pub fn has_managed_primary_key(&self) -> bool {
        self.primary_key_name.is_empty()
            || self.primary_key_name == build_constraint_name(&self.schema, &self.name)
    }

    /// Patch that converges `self` (the live table) toward `desired`.
    ///
    /// Only adds: columns missing from `self` are added, existing columns are
    /// never dropped or retyped. The primary key is reconciled only when it
    /// is absent or carries the managed constraint name.
    pub fn diff(&self, desired: &Table) -> Table {
        let mut patch = Table::new(self.schema.clone(), self.name.clone());
        if !desired.exists() {
            return patch;
        }

        for (name, column) in &desired.columns {
            if !self.columns.contains_key(name) {
                patch.columns.insert(name.clone(), column.clone());
            }
        }

        if !self.has_managed_primary_key() {
            return patch;
        }

        let managed_name = build_constraint_name(&self.schema, &self.name);
        if !self.pk_fields.is_empty() {
            if self.pk_fields != desired.pk_fields {
                patch.delete_pk_fields = true;
                patch.pk_fields = desired.pk_fields.clone();
                patch.primary_key_name = managed_name;
            }
        } else if !desired.pk_fields.is_empty() {
            patch.pk_fields = desired.pk_fields.clone();
            patch.primary_key_name = managed_name;
        }

        patch
    }

    /// The table as it looks after `patch` was applied.
    pub fn apply_patch(&self, patch: &Table) -> Table {
        let mut result = self.clone();
        for (name, column) in &patch.columns {
            result
                .columns
                .entry(name.clone())
                .or_insert_with(|| column.clone());
        }
        if patch.delete_pk_fields || !patch.pk_fields.is_empty() {
            result.pk_fields = patch.pk_fields.clone();
            result.primary_key_name = if patch.pk_fields.is_empty() {
                String::new()
            } else {
                patch.primary_key_name.clone()
            };
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], pk: &[&str]) -> Table {
        let mut t = Table::new("public", "events");
        for c in columns {
            t.columns.insert(c.to_string(), SqlColumn::new("text"));
        }
        t.with_primary_key(pk.iter().copied())
    }

    #[test]
    fn test_constraint_name() {
        assert_eq!(build_constraint_name("public", "events"), "public_events_pk");
    }

    #[test]
    fn test_constraint_name_of_long_table_fits_identifier() {
        use crate::core::identifier::{validate_identifier, MAX_IDENTIFIER_LENGTH};

        let long = "e".repeat(60);
        let name = build_constraint_name("public", &long);
        assert_eq!(name.len(), MAX_IDENTIFIER_LENGTH);
        assert!(name.starts_with("public_eee"));
        assert!(name.ends_with("_pk"));
        assert!(validate_identifier(&name).is_ok());
    }

    #[test]
    fn test_long_table_pk_read_back_stays_managed() {
        let long = "e".repeat(60);
        // The destination reports the key under the shortened name.
        let current = Table::new("public", long.as_str())
            .with_column("id", SqlColumn::new("bigint"))
            .with_column("ts", SqlColumn::new("text"))
            .with_primary_key(["id"]);
        assert_eq!(current.primary_key_name.len(), 63);
        assert!(current.has_managed_primary_key());

        let desired = Table::new("public", long.as_str())
            .with_column("id", SqlColumn::new("bigint"))
            .with_column("ts", SqlColumn::new("text"))
            .with_primary_key(["id", "ts"]);
        let patch = current.diff(&desired);
        assert!(patch.delete_pk_fields);
        assert_eq!(patch.pk_fields_sorted(), vec!["id", "ts"]);
        assert_eq!(patch.primary_key_name, current.primary_key_name);
    }

    #[test]
    fn test_exists() {
        assert!(!Table::new("s", "t").exists());
        let mut patch = Table::new("s", "t");
        patch.delete_pk_fields = true;
        assert!(patch.exists());
    }

    #[test]
    fn test_diff_against_missing_desired_is_empty() {
        let current = table(&["a"], &["a"]);
        let patch = current.diff(&Table::new("public", "events"));
        assert!(!patch.exists());
    }

    #[test]
    fn test_diff_is_additive() {
        let current = table(&["a", "b"], &[]);
        let desired = table(&["b", "c"], &[]);
        let patch = current.diff(&desired);
        assert_eq!(patch.sorted_column_names(), vec!["c"]);
        assert!(!patch.delete_pk_fields);
        assert!(patch.pk_fields.is_empty());

        let converged = current.apply_patch(&patch);
        for name in current.columns.keys().chain(desired.columns.keys()) {
            assert!(converged.columns.contains_key(name));
        }
    }

    #[test]
    fn test_diff_ignores_type_changes() {
        let current = Table::new("public", "events").with_column("a", SqlColumn::new("bigint"));
        let desired = Table::new("public", "events").with_column("a", SqlColumn::new("text"));
        assert!(!current.diff(&desired).exists());
    }

    #[test]
    fn test_pk_created_when_absent() {
        let current = table(&["id"], &[]);
        let desired = table(&["id"], &["id"]);
        let patch = current.diff(&desired);
        assert!(!patch.delete_pk_fields);
        assert_eq!(patch.pk_fields_sorted(), vec!["id"]);
        assert_eq!(patch.primary_key_name, "public_events_pk");
    }

    #[test]
    fn test_pk_recreated_when_fields_differ() {
        let current = table(&["id", "ts"], &["id"]);
        let desired = table(&["id", "ts"], &["id", "ts"]);
        let patch = current.diff(&desired);
        assert!(patch.delete_pk_fields);
        assert_eq!(patch.pk_fields_sorted(), vec!["id", "ts"]);
        assert_eq!(patch.primary_key_name, "public_events_pk");
    }

    #[test]
    fn test_pk_dropped_when_desired_has_none() {
        let current = table(&["id"], &["id"]);
        let desired = table(&["id", "x"], &[]);
        let patch = current.diff(&desired);
        assert!(patch.delete_pk_fields);
        assert!(patch.pk_fields.is_empty());

        let converged = current.apply_patch(&patch);
        assert!(converged.pk_fields.is_empty());
        assert!(converged.primary_key_name.is_empty());
    }

    #[test]
    fn test_same_pk_set_is_noop() {
        let current = table(&["a", "b"], &["b", "a"]);
        let desired = table(&["a", "b"], &["a", "b"]);
        assert!(!current.diff(&desired).exists());
    }

    #[test]
    fn test_foreign_pk_is_left_alone() {
        let mut current = table(&["id"], &["id"]);
        current.primary_key_name = "events_pkey".into();
        let desired = table(&["id", "extra"], &["extra"]);
        let patch = current.diff(&desired);
        assert_eq!(patch.sorted_column_names(), vec!["extra"]);
        assert!(!patch.delete_pk_fields);
        assert!(patch.pk_fields.is_empty());
        assert!(patch.primary_key_name.is_empty());
    }
}
