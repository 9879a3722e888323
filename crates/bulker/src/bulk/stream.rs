//! Stream and bulker contracts, plus the plumbing shared by SQL streams.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::options::{BulkMode, State, StreamOptions, StreamStatus};
use crate::adapter::{SqlAdapter, PARTITION_ID_COLUMN};
use crate::core::identifier::validate_identifier;
use crate::core::{BatchHeader, DataType, Field, Fields, Object, Table};
use crate::error::{BulkerError, Result};
use crate::schema::{
    apply_column_types, ensure_table, map_table, resolve_fields, ProcessedObject, TypeResolver,
};

/// One load into one table.
///
/// After `complete` or `abort` every call fails with
/// [`BulkerError::StreamClosed`].
#[async_trait]
pub trait BulkerStream: Send {
    fn id(&self) -> &str;

    fn mode(&self) -> BulkMode;

    fn state(&self) -> &State;

    async fn consume(&mut self, object: Object) -> Result<()>;

    /// Finish the load. Failed loads leave the destination as it was
    /// before the stream for every mode except Stream.
    async fn complete(&mut self) -> Result<State>;

    /// Discard everything not yet written.
    async fn abort(&mut self) -> Result<State>;
}

/// A destination that hands out streams.
#[async_trait]
pub trait Bulker: Send + Sync {
    fn type_id(&self) -> &str;

    /// Fails immediately for modes the destination does not support.
    async fn create_stream(
        &self,
        id: &str,
        table: &str,
        mode: BulkMode,
        options: StreamOptions,
    ) -> Result<Box<dyn BulkerStream>>;

    async fn close(&self) -> Result<()>;
}

/// State and helpers every SQL stream carries.
pub(crate) struct StreamCore<A: SqlAdapter> {
    pub adapter: Arc<A>,
    pub id: String,
    pub table_name: String,
    pub mode: BulkMode,
    pub options: StreamOptions,
    pub state: State,
    resolver: TypeResolver,
    partition_id: Option<String>,
    schema_ready: bool,
    closed: bool,
}

impl<A: SqlAdapter> StreamCore<A> {
    pub fn new(
        adapter: Arc<A>,
        id: &str,
        table: &str,
        mode: BulkMode,
        options: StreamOptions,
    ) -> Result<Self> {
        validate_identifier(table)?;
        if options.merge_rows && options.primary_keys.is_empty() {
            return Err(BulkerError::Validation(format!(
                "stream {}: merge_rows requires primary keys",
                id
            )));
        }
        if options.batch_size == 0 {
            return Err(BulkerError::Validation(format!(
                "stream {}: batch_size must be at least 1",
                id
            )));
        }
        let partition_id = match mode {
            BulkMode::ReplacePartition => {
                if !adapter.capabilities().partitions {
                    return Err(BulkerError::unsupported_mode(
                        adapter.type_id(),
                        mode,
                        "destination does not support partitions",
                    ));
                }
                let id_value = options.effective_partition_id().ok_or_else(|| {
                    BulkerError::Validation(format!(
                        "stream {}: replace_partition requires a partition id",
                        id
                    ))
                })?;
                Some(id_value)
            }
            _ => None,
        };

        Ok(Self {
            adapter,
            id: id.to_string(),
            table_name: table.to_string(),
            mode,
            options,
            state: State::default(),
            resolver: TypeResolver::new(),
            partition_id,
            schema_ready: false,
            closed: false,
        })
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(BulkerError::StreamClosed(format!(
                "stream {} is already {}",
                self.id, self.state.status
            )));
        }
        Ok(())
    }

    pub fn cancel(&self) -> CancellationToken {
        self.options.cancel.clone()
    }

    pub fn partition_id(&self) -> Option<&str> {
        self.partition_id.as_deref()
    }

    /// Flatten and type one object.
    pub fn process(&mut self, object: &Object) -> ProcessedObject {
        let mut processed = self.resolver.process(object);
        if let Some(partition_id) = &self.partition_id {
            processed.object.insert(
                PARTITION_ID_COLUMN.to_string(),
                Value::String(partition_id.clone()),
            );
            processed
                .fields
                .insert(PARTITION_ID_COLUMN, Field::new(DataType::String));
        }
        apply_column_types(&mut processed.fields, &self.options.column_types);
        for diagnostic in &processed.diagnostics {
            warn!(stream = %self.id, table = %self.table_name, "{}", diagnostic);
            self.state.warnings.push(diagnostic.to_string());
        }
        self.state.processed_rows += 1;
        processed
    }

    /// Desired table `name` for the accumulated `fields`.
    pub fn desired_table(&mut self, name: &str, fields: &mut Fields) -> Result<Table> {
        for diagnostic in resolve_fields(fields) {
            warn!(stream = %self.id, table = %name, "{}", diagnostic);
            self.state.warnings.push(diagnostic.to_string());
        }
        let mut header = BatchHeader::new(name).with_fields(fields.clone());
        header.partition = self.options.time_partition.clone();
        map_table(
            self.adapter.type_id(),
            self.adapter.type_mapping(),
            self.adapter.default_schema(),
            &header,
            &self.options.primary_keys,
        )
    }

    /// Create the default schema once per stream.
    pub async fn ensure_schema(&mut self, conn: &mut A::Conn) -> Result<()> {
        if !self.schema_ready {
            let schema = self.adapter.default_schema().to_string();
            self.adapter.create_db_schema(conn, &schema).await?;
            self.schema_ready = true;
        }
        Ok(())
    }

    /// Create the schema and converge `desired` on an autocommit session.
    /// Destinations without transactional DDL run this ahead of the load
    /// transaction, since their DDL commits any open transaction.
    pub async fn converge(&mut self, desired: &Table) -> Result<Table> {
        let adapter = self.adapter.clone();
        let mut conn = adapter.db(&self.cancel()).await?;
        self.ensure_schema(&mut conn).await?;
        ensure_table(adapter.as_ref(), &mut conn, desired).await
    }

    /// Forget the schema creation of a rolled back transaction.
    pub fn forget_schema(&mut self) {
        self.schema_ready = false;
    }

    /// Record the outcome and close the stream.
    pub fn finish(&mut self, status: StreamStatus, result: Result<()>) -> Result<State> {
        self.closed = true;
        match result {
            Ok(()) => {
                self.state.status = status;
                Ok(self.state.clone())
            }
            Err(e) => {
                self.state.status = StreamStatus::Failed;
                self.state.set_error(&e);
                Err(e)
            }
        }
    }
}

/// Drop null values of columns the table does not have. Such fields were
/// never typed, so no column exists for them.
pub(crate) fn prune_nulls(table: &Table, object: &Object) -> Object {
    object
        .iter()
        .filter(|(k, v)| !v.is_null() || table.columns.contains_key(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Client-side row buffer. When deduplicating, a row whose primary key was
/// already buffered replaces the earlier row in place.
pub(crate) struct RowBuffer {
    rows: Vec<Object>,
    index: HashMap<String, usize>,
    keys: Vec<String>,
}

impl RowBuffer {
    pub fn new(options: &StreamOptions) -> Self {
        let keys = if options.merge_rows {
            options.primary_keys.iter().cloned().collect()
        } else {
            Vec::new()
        };
        Self {
            rows: Vec::new(),
            index: HashMap::new(),
            keys,
        }
    }

    fn key_of(&self, row: &Object) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        let values: Option<Vec<&Value>> = self.keys.iter().map(|k| row.get(k)).collect();
        values.map(|v| Value::from(v.into_iter().cloned().collect::<Vec<_>>()).to_string())
    }

    pub fn push(&mut self, row: Object) {
        match self.key_of(&row) {
            Some(key) => match self.index.get(&key) {
                Some(&i) => self.rows[i] = row,
                None => {
                    self.index.insert(key, self.rows.len());
                    self.rows.push(row);
                }
            },
            None => self.rows.push(row),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn take(&mut self) -> Vec<Object> {
        self.index.clear();
        std::mem::take(&mut self.rows)
    }
}
