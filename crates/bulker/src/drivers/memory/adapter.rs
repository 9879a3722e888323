//! In-process SQL adapter.
//!
//! Keeps tables and rows in memory behind a tokio mutex. A transaction holds
//! the mutex for its whole lifetime and restores a snapshot when it is rolled
//! back or dropped, so transactional sessions are fully isolated. Without
//! transactional DDL, any DDL statement commits the open transaction first
//! and the rest of it runs in autocommit, the way MySQL behaves. Used by
//! tests and dry runs; supports injecting a failure into any operation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::dialect::insert_columns;
use crate::adapter::{cancellable, Capabilities, Session, SqlAdapter, TypeMapping, WhenConditions};
use crate::config::{DataSourceConfig, MemoryConfig};
use crate::core::identifier::derived_name;
use crate::core::{build_constraint_name, DataType, Object, SqlColumn, SqlValue, Table};
use crate::error::{BulkerError, ErrorKind, ErrorPayload, Result};

pub const MEMORY_TYPE_ID: &str = "memory";

#[derive(Debug, Clone)]
struct StoredTable {
    table: Table,
    rows: Vec<Object>,
}

#[derive(Debug, Clone, Default)]
struct Catalog {
    schemas: BTreeSet<String>,
    tables: BTreeMap<String, StoredTable>,
}

struct MemoryTx {
    guard: OwnedMutexGuard<Catalog>,
    snapshot: Option<Catalog>,
}

/// Session over the in-memory catalog.
pub struct MemorySession {
    cancel: CancellationToken,
    tx: Option<MemoryTx>,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.as_mut() {
            if let Some(snapshot) = tx.snapshot.take() {
                debug!("Rolling back unfinished in-memory transaction");
                *tx.guard = snapshot;
            }
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    fn is_transactional(&self) -> bool {
        self.tx.is_some()
    }

    fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    async fn commit(mut self) -> Result<()> {
        if let Some(tx) = self.tx.as_mut() {
            tx.snapshot = None;
        }
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        if let Some(tx) = self.tx.as_mut() {
            if let Some(snapshot) = tx.snapshot.take() {
                *tx.guard = snapshot;
            }
        }
        Ok(())
    }
}

/// In-memory destination.
pub struct MemoryAdapter {
    config: DataSourceConfig,
    mapping: TypeMapping,
    transactional: bool,
    catalog: Arc<Mutex<Catalog>>,
    faults: StdMutex<Vec<ErrorKind>>,
    journal: StdMutex<Vec<ErrorKind>>,
}

impl MemoryAdapter {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            config: DataSourceConfig {
                default_schema: config.schema.clone(),
                ..Default::default()
            },
            mapping: memory_type_mapping(),
            transactional: config.transactional,
            catalog: Arc::new(Mutex::new(Catalog::default())),
            faults: StdMutex::new(Vec::new()),
            journal: StdMutex::new(Vec::new()),
        }
    }

    /// Make the next operation of `kind` fail.
    pub fn fail_on(&self, kind: ErrorKind) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(kind);
    }

    /// Kinds of the operations executed so far, in order.
    pub fn operations(&self) -> Vec<ErrorKind> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Schemas created through `create_db_schema`.
    pub async fn schemas(&self) -> Vec<String> {
        self.catalog.lock().await.schemas.iter().cloned().collect()
    }

    /// Names of the tables in the default schema.
    pub async fn table_names(&self) -> Vec<String> {
        let prefix = format!("{}.", self.config.default_schema);
        self.catalog
            .lock()
            .await
            .tables
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    fn key(&self, table: &str) -> String {
        format!("{}.{}", self.config.default_schema, table)
    }

    fn payload(&self, table: &str) -> ErrorPayload {
        ErrorPayload::new(MEMORY_TYPE_ID).table(self.config.default_schema.clone(), table)
    }

    fn error(&self, kind: ErrorKind, table: &str, message: impl Into<String>) -> BulkerError {
        BulkerError::destination_msg(kind, self.payload(table), message)
    }

    fn take_fault(&self, kind: ErrorKind, table: &str) -> Result<()> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        match faults.iter().position(|k| *k == kind) {
            Some(i) => {
                faults.remove(i);
                Err(self.error(kind, table, "injected failure"))
            }
            None => Ok(()),
        }
    }

    async fn run<T, F>(&self, conn: &mut MemorySession, kind: ErrorKind, table: &str, op: F) -> Result<T>
    where
        F: FnOnce(&mut Catalog) -> Result<T> + Send,
        T: Send,
    {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(kind);
        if conn.cancel.is_cancelled() {
            return Err(BulkerError::Cancelled);
        }
        self.implicit_commit(conn, kind);
        self.take_fault(kind, table)?;
        match conn.tx.as_mut() {
            Some(tx) => op(&mut *tx.guard),
            None => {
                let mut guard = cancellable(&conn.cancel, async { Ok(self.catalog.lock().await) }).await?;
                op(&mut *guard)
            }
        }
    }

    /// DDL ends the open transaction unless DDL is transactional.
    fn implicit_commit(&self, conn: &mut MemorySession, kind: ErrorKind) {
        if self.transactional || !is_ddl(kind) {
            return;
        }
        if let Some(tx) = conn.tx.as_mut() {
            if tx.snapshot.take().is_some() {
                debug!("{} committed the open in-memory transaction", kind);
            }
        }
    }

    fn stored<'a>(&self, catalog: &'a mut Catalog, kind: ErrorKind, table: &str) -> Result<&'a mut StoredTable> {
        catalog
            .tables
            .get_mut(&self.key(table))
            .ok_or_else(|| self.error(kind, table, format!("relation \"{}\" does not exist", table)))
    }

    async fn open(&self, cancel: &CancellationToken, transactional: bool) -> Result<MemorySession> {
        if !transactional {
            return Ok(MemorySession {
                cancel: cancel.clone(),
                tx: None,
            });
        }
        let guard = cancellable(cancel, async {
            Ok(self.catalog.clone().lock_owned().await)
        })
        .await?;
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ErrorKind::BeginTransaction);
        let snapshot = Some((*guard).clone());
        Ok(MemorySession {
            cancel: cancel.clone(),
            tx: Some(MemoryTx { guard, snapshot }),
        })
    }
}

fn is_ddl(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::CreateSchema
            | ErrorKind::CreateTable
            | ErrorKind::PatchTableSchema
            | ErrorKind::TruncateTable
            | ErrorKind::DropTable
            | ErrorKind::ReplaceTable
    )
}

/// Type names reported by the in-memory destination.
pub fn memory_type_mapping() -> TypeMapping {
    TypeMapping::new(
        &[
            (DataType::Bool, "boolean"),
            (DataType::Int64, "bigint"),
            (DataType::Float64, "double"),
            (DataType::Timestamp, "timestamp"),
            (DataType::Json, "json"),
            (DataType::String, "text"),
        ],
        &[
            ("boolean", DataType::Bool),
            ("bigint", DataType::Int64),
            ("double", DataType::Float64),
            ("timestamp", DataType::Timestamp),
            ("json", DataType::Json),
            ("text", DataType::String),
            ("varchar", DataType::String),
        ],
    )
}

/// Value as stored in a column of the given type.
fn normalize(value: &Value, column: Option<&SqlColumn>) -> Value {
    match SqlValue::from_json(value, column.and_then(|c| c.data_type)) {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => Value::Bool(b),
        SqlValue::Int(i) => Value::from(i),
        SqlValue::Float(f) => Value::from(f),
        SqlValue::Timestamp(ts) => Value::String(ts.to_rfc3339()),
        SqlValue::Json(_) => value.clone(),
        SqlValue::Text(s) => Value::String(s),
    }
}

fn key_of(row: &Object, pk: &BTreeSet<String>) -> Vec<Value> {
    pk.iter()
        .map(|f| row.get(f).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Insert or upsert `rows` (already normalized) into `stored`.
fn write_rows(stored: &mut StoredTable, rows: Vec<Object>, merge: bool) -> std::result::Result<(), String> {
    let pk = stored.table.pk_fields.clone();
    for row in rows {
        if pk.is_empty() {
            stored.rows.push(row);
            continue;
        }
        let key = key_of(&row, &pk);
        if key.iter().any(Value::is_null) {
            return Err(format!(
                "null value in primary key column of \"{}\"",
                stored.table.name
            ));
        }
        match stored.rows.iter().position(|r| key_of(r, &pk) == key) {
            Some(i) if merge => {
                let existing = &mut stored.rows[i];
                for (name, value) in row {
                    existing.insert(name, value);
                }
            }
            Some(_) => {
                return Err(format!(
                    "duplicate key value violates unique constraint \"{}\"",
                    stored.table.primary_key_name
                ))
            }
            None => stored.rows.push(row),
        }
    }
    Ok(())
}

fn full_row(table: &Table, row: &Object) -> Object {
    table
        .columns
        .keys()
        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
        .collect()
}

#[async_trait]
impl SqlAdapter for MemoryAdapter {
    type Conn = MemorySession;

    fn type_id(&self) -> &str {
        MEMORY_TYPE_ID
    }

    fn config(&self) -> &DataSourceConfig {
        &self.config
    }

    fn default_schema(&self) -> &str {
        &self.config.default_schema
    }

    fn type_mapping(&self) -> &TypeMapping {
        &self.mapping
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            transactional_ddl: self.transactional,
            partitions: true,
        }
    }

    async fn open_tx(&self, cancel: &CancellationToken) -> Result<MemorySession> {
        self.open(cancel, true).await
    }

    async fn db(&self, cancel: &CancellationToken) -> Result<MemorySession> {
        self.open(cancel, false).await
    }

    async fn create_db_schema(&self, conn: &mut MemorySession, schema: &str) -> Result<()> {
        let schema = schema.to_string();
        self.run(conn, ErrorKind::CreateSchema, "", move |catalog| {
            catalog.schemas.insert(schema);
            Ok(())
        })
        .await
    }

    async fn get_table_schema(&self, conn: &mut MemorySession, table: &str) -> Result<Table> {
        let key = self.key(table);
        let missing = Table::new(self.config.default_schema.clone(), table);
        self.run(conn, ErrorKind::GetTableSchema, table, move |catalog| {
            Ok(catalog
                .tables
                .get(&key)
                .map(|s| s.table.clone())
                .unwrap_or(missing))
        })
        .await
    }

    async fn create_table(&self, conn: &mut MemorySession, table: &Table) -> Result<()> {
        let key = self.key(&table.name);
        self.run(conn, ErrorKind::CreateTable, &table.name, |catalog| {
            if catalog.tables.contains_key(&key) {
                return Err(self.error(
                    ErrorKind::CreateTable,
                    &table.name,
                    format!("relation \"{}\" already exists", table.name),
                ));
            }
            let mut created = table.clone();
            created.schema = self.config.default_schema.clone();
            created.delete_pk_fields = false;
            catalog.tables.insert(
                key,
                StoredTable {
                    table: created,
                    rows: Vec::new(),
                },
            );
            Ok(())
        })
        .await
    }

    async fn patch_table_schema(&self, conn: &mut MemorySession, patch: &Table) -> Result<()> {
        let kind = ErrorKind::PatchTableSchema;
        self.run(conn, kind, &patch.name, |catalog| {
            let stored = self.stored(catalog, kind, &patch.name)?;
            for (name, column) in &patch.columns {
                if stored.table.columns.contains_key(name) {
                    return Err(self.error(
                        kind,
                        &patch.name,
                        format!("column \"{}\" already exists", name),
                    ));
                }
                stored.table.columns.insert(name.clone(), column.clone());
            }
            if patch.delete_pk_fields {
                if stored.table.primary_key_name.is_empty() {
                    return Err(self.error(kind, &patch.name, "table has no primary key to drop"));
                }
                stored.table.pk_fields.clear();
                stored.table.primary_key_name.clear();
            }
            if !patch.pk_fields.is_empty() {
                if let Some(missing) = patch
                    .pk_fields
                    .iter()
                    .find(|f| !stored.table.columns.contains_key(*f))
                {
                    return Err(self.error(
                        kind,
                        &patch.name,
                        format!("column \"{}\" named in key does not exist", missing),
                    ));
                }
                let mut seen = BTreeSet::new();
                for row in &stored.rows {
                    let key = key_of(row, &patch.pk_fields);
                    if key.iter().any(Value::is_null) || !seen.insert(serde_json::to_string(&key)?) {
                        return Err(self.error(
                            kind,
                            &patch.name,
                            "existing rows violate the new primary key",
                        ));
                    }
                }
                stored.table.pk_fields = patch.pk_fields.clone();
                stored.table.primary_key_name = patch.primary_key_name.clone();
            }
            Ok(())
        })
        .await
    }

    async fn insert(
        &self,
        conn: &mut MemorySession,
        table: &Table,
        merge: bool,
        objects: &[Object],
    ) -> Result<()> {
        let kind = ErrorKind::Insert;
        self.run(conn, kind, &table.name, |catalog| {
            let stored = self.stored(catalog, kind, &table.name)?;
            insert_columns(&stored.table, objects)?;
            let rows: Vec<Object> = objects
                .iter()
                .map(|o| {
                    o.iter()
                        .map(|(k, v)| (k.clone(), normalize(v, stored.table.columns.get(k))))
                        .collect()
                })
                .collect();
            write_rows(stored, rows, merge).map_err(|m| self.error(kind, &table.name, m))
        })
        .await
    }

    async fn copy_tables(
        &self,
        conn: &mut MemorySession,
        target: &Table,
        source: &Table,
        merge: bool,
    ) -> Result<()> {
        let kind = ErrorKind::CopyTables;
        let source_key = self.key(&source.name);
        self.run(conn, kind, &target.name, |catalog| {
            let rows = catalog
                .tables
                .get(&source_key)
                .map(|s| s.rows.clone())
                .ok_or_else(|| {
                    self.error(
                        kind,
                        &source.name,
                        format!("relation \"{}\" does not exist", source.name),
                    )
                })?;
            let stored = self.stored(catalog, kind, &target.name)?;
            let projected: Vec<Object> = rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .filter(|(k, _)| stored.table.columns.contains_key(k))
                        .collect()
                })
                .collect();
            write_rows(stored, projected, merge).map_err(|m| self.error(kind, &target.name, m))
        })
        .await
    }

    async fn truncate_table(&self, conn: &mut MemorySession, table: &str) -> Result<()> {
        let kind = ErrorKind::TruncateTable;
        self.run(conn, kind, table, |catalog| {
            self.stored(catalog, kind, table)?.rows.clear();
            Ok(())
        })
        .await
    }

    async fn update(
        &self,
        conn: &mut MemorySession,
        table: &Table,
        object: &Object,
        where_key: &str,
        where_value: &Value,
    ) -> Result<()> {
        let kind = ErrorKind::Update;
        self.run(conn, kind, &table.name, |catalog| {
            let stored = self.stored(catalog, kind, &table.name)?;
            insert_columns(&stored.table, std::slice::from_ref(object))?;
            let wanted = normalize(where_value, stored.table.columns.get(where_key));
            let columns = stored.table.columns.clone();
            for row in stored
                .rows
                .iter_mut()
                .filter(|r| r.get(where_key) == Some(&wanted))
            {
                for (name, value) in object {
                    row.insert(name.clone(), normalize(value, columns.get(name)));
                }
            }
            Ok(())
        })
        .await
    }

    async fn delete(
        &self,
        conn: &mut MemorySession,
        table: &str,
        conditions: &WhenConditions,
    ) -> Result<()> {
        let kind = ErrorKind::Delete;
        self.run(conn, kind, table, |catalog| {
            let stored = self.stored(catalog, kind, table)?;
            let before = stored.rows.len();
            stored.rows.retain(|row| !conditions.matches(row));
            debug!("Deleted {} rows from {}", before - stored.rows.len(), table);
            Ok(())
        })
        .await
    }

    async fn select(
        &self,
        conn: &mut MemorySession,
        table: &str,
        conditions: &WhenConditions,
    ) -> Result<Vec<Object>> {
        let kind = ErrorKind::Select;
        self.run(conn, kind, table, |catalog| {
            let stored = self.stored(catalog, kind, table)?;
            Ok(stored
                .rows
                .iter()
                .filter(|row| conditions.matches(row))
                .map(|row| full_row(&stored.table, row))
                .collect())
        })
        .await
    }

    async fn count(
        &self,
        conn: &mut MemorySession,
        table: &str,
        conditions: &WhenConditions,
    ) -> Result<u64> {
        let kind = ErrorKind::Count;
        self.run(conn, kind, table, |catalog| {
            let stored = self.stored(catalog, kind, table)?;
            Ok(stored.rows.iter().filter(|r| conditions.matches(r)).count() as u64)
        })
        .await
    }

    async fn drop_table(&self, conn: &mut MemorySession, table: &str, if_exists: bool) -> Result<()> {
        let kind = ErrorKind::DropTable;
        let key = self.key(table);
        self.run(conn, kind, table, |catalog| {
            if catalog.tables.remove(&key).is_none() && !if_exists {
                return Err(self.error(kind, table, format!("table \"{}\" does not exist", table)));
            }
            Ok(())
        })
        .await
    }

    async fn replace_table(
        &self,
        conn: &mut MemorySession,
        original: &str,
        replacement: &str,
        drop_old: bool,
    ) -> Result<()> {
        let kind = ErrorKind::ReplaceTable;
        let schema = self.config.default_schema.clone();
        let original_key = self.key(original);
        let replacement_key = self.key(replacement);
        self.run(conn, kind, original, |catalog| {
            let mut incoming = catalog.tables.remove(&replacement_key).ok_or_else(|| {
                self.error(
                    kind,
                    replacement,
                    format!("relation \"{}\" does not exist", replacement),
                )
            })?;
            if let Some(mut old) = catalog.tables.remove(&original_key) {
                if !drop_old {
                    let deprecated = derived_name(
                        original,
                        &format!("_deprecated_{}", Utc::now().format("%y%m%d_%H%M%S")),
                    );
                    if old.table.primary_key_name == build_constraint_name(&schema, original) {
                        old.table.primary_key_name = build_constraint_name(&schema, &deprecated);
                    }
                    old.table.name = deprecated.clone();
                    catalog.tables.insert(self.key(&deprecated), old);
                }
            }
            if incoming.table.primary_key_name == build_constraint_name(&schema, replacement) {
                incoming.table.primary_key_name = build_constraint_name(&schema, original);
            }
            incoming.table.name = original.to_string();
            catalog.tables.insert(original_key, incoming);
            Ok(())
        })
        .await
    }
}
