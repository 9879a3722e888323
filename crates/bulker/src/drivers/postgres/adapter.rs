//! PostgreSQL adapter over a deadpool-postgres pool.

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Config as PgConfig, NoTls};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dialect::{postgres_type_mapping, PostgresDialect};
use crate::adapter::dialect::{insert_columns, rows_per_statement};
use crate::adapter::{
    cancellable, Capabilities, Dialect, Session, SqlAdapter, Statement, TypeMapping,
    WhenConditions,
};
use crate::config::DataSourceConfig;
use crate::core::identifier::derived_name;
use crate::core::{build_constraint_name, Object as Row, SqlColumn, SqlValue, Table};
use crate::drivers::common::{tls::postgres_connector, SslMode};
use crate::error::{BulkerError, ErrorKind, ErrorPayload, Result};

pub const POSTGRES_TYPE_ID: &str = "postgres";

const COLUMNS_QUERY: &str = "SELECT a.attname, format_type(a.atttypid, a.atttypmod) \
     FROM pg_attribute a \
     JOIN pg_class c ON c.oid = a.attrelid \
     JOIN pg_namespace n ON n.oid = c.relnamespace \
     WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped \
     ORDER BY a.attnum";

const PRIMARY_KEY_QUERY: &str = "SELECT tc.constraint_name, kcu.column_name \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON kcu.constraint_name = tc.constraint_name \
      AND kcu.table_schema = tc.table_schema \
      AND kcu.table_name = tc.table_name \
     WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = $1 AND tc.table_name = $2 \
     ORDER BY kcu.ordinal_position";

/// A pooled connection, optionally inside `BEGIN`.
pub struct PostgresSession {
    client: Option<Object>,
    transactional: bool,
    finished: bool,
    cancel: CancellationToken,
}

impl PostgresSession {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| BulkerError::Internal("postgres session already closed".into()))
    }

    async fn finish(&mut self, sql: &str, kind: ErrorKind) -> Result<()> {
        if !self.transactional {
            return Ok(());
        }
        let client = self.client()?;
        let result = client.batch_execute(sql).await;
        self.finished = true;
        result.map_err(|e| BulkerError::destination(kind, ErrorPayload::new(POSTGRES_TYPE_ID), e))
    }
}

impl Drop for PostgresSession {
    fn drop(&mut self) {
        if self.transactional && !self.finished {
            if let Some(client) = self.client.take() {
                // Closing the connection makes the server roll back.
                warn!("Discarding connection with an unfinished transaction");
                drop(Object::take(client));
            }
        }
    }
}

#[async_trait]
impl Session for PostgresSession {
    fn is_transactional(&self) -> bool {
        self.transactional
    }

    fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    async fn commit(mut self) -> Result<()> {
        self.finish("COMMIT", ErrorKind::Commit).await
    }

    async fn rollback(mut self) -> Result<()> {
        self.finish("ROLLBACK", ErrorKind::Rollback).await
    }
}

/// PostgreSQL destination.
pub struct PostgresAdapter {
    pool: Pool,
    config: DataSourceConfig,
    schema: String,
    dialect: PostgresDialect,
    mapping: TypeMapping,
}

impl PostgresAdapter {
    /// Create the pool and verify connectivity.
    pub async fn connect(config: &DataSourceConfig) -> Result<Self> {
        let pg_config: PgConfig = config
            .pg_connection_string()
            .parse()
            .map_err(|e| BulkerError::Config(format!("invalid postgres settings: {}", e)))?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        let mgr = match postgres_connector(ssl_mode) {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => Manager::from_config(pg_config, NoTls, mgr_config),
        };
        let pool = Pool::builder(mgr)
            .max_size(config.max_connections.max(1))
            .build()
            .map_err(|e| BulkerError::Config(format!("failed to create pool: {}", e)))?;

        let adapter = Self {
            pool,
            config: config.clone(),
            schema: config.schema_or("public").to_string(),
            dialect: PostgresDialect::new(),
            mapping: postgres_type_mapping(),
        };

        let client = adapter.checkout().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| BulkerError::destination(ErrorKind::Connect, adapter.payload(""), e))?;

        info!(
            "Connected to PostgreSQL: {}:{}/{} (ssl_mode={})",
            config.host,
            config.port_or(5432),
            config.database,
            ssl_mode
        );
        Ok(adapter)
    }

    pub fn dialect(&self) -> &PostgresDialect {
        &self.dialect
    }

    fn payload(&self, table: &str) -> ErrorPayload {
        let payload = ErrorPayload::new(POSTGRES_TYPE_ID);
        if table.is_empty() {
            payload
        } else {
            payload.table(self.schema.clone(), table)
        }
    }

    async fn checkout(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| BulkerError::destination(ErrorKind::Connect, self.payload(""), e))
    }

    async fn session(&self, cancel: &CancellationToken, transactional: bool) -> Result<PostgresSession> {
        let client = cancellable(cancel, self.checkout()).await?;
        if transactional {
            client.batch_execute("BEGIN").await.map_err(|e| {
                BulkerError::destination(ErrorKind::BeginTransaction, self.payload(""), e)
            })?;
        }
        Ok(PostgresSession {
            client: Some(client),
            transactional,
            finished: false,
            cancel: cancel.clone(),
        })
    }

    async fn execute(
        &self,
        conn: &mut PostgresSession,
        kind: ErrorKind,
        table: &str,
        stmt: &Statement,
    ) -> Result<u64> {
        let client = conn.client()?;
        let values: Vec<Option<String>> = stmt.params.iter().map(SqlValue::to_text).collect();
        let params: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        debug!("{}: {}", kind, stmt.sql);
        cancellable(&conn.cancel, async {
            client.execute(stmt.sql.as_str(), &params).await.map_err(|e| {
                BulkerError::destination(kind, self.payload(table).statement(stmt.sql.clone()), e)
            })
        })
        .await
    }

    async fn execute_sql(
        &self,
        conn: &mut PostgresSession,
        kind: ErrorKind,
        table: &str,
        sql: String,
    ) -> Result<u64> {
        self.execute(conn, kind, table, &Statement::new(sql)).await
    }

    /// Live table or an error naming `kind` when it does not exist.
    async fn existing(&self, conn: &mut PostgresSession, kind: ErrorKind, table: &str) -> Result<Table> {
        let live = self.get_table_schema(conn, table).await?;
        if !live.exists() {
            return Err(BulkerError::destination_msg(
                kind,
                self.payload(table),
                format!("relation \"{}\" does not exist", table),
            ));
        }
        Ok(live)
    }
}

#[async_trait]
impl SqlAdapter for PostgresAdapter {
    type Conn = PostgresSession;

    fn type_id(&self) -> &str {
        POSTGRES_TYPE_ID
    }

    fn config(&self) -> &DataSourceConfig {
        &self.config
    }

    fn default_schema(&self) -> &str {
        &self.schema
    }

    fn type_mapping(&self) -> &TypeMapping {
        &self.mapping
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            transactional_ddl: true,
            partitions: true,
        }
    }

    async fn open_tx(&self, cancel: &CancellationToken) -> Result<PostgresSession> {
        self.session(cancel, true).await
    }

    async fn db(&self, cancel: &CancellationToken) -> Result<PostgresSession> {
        self.session(cancel, false).await
    }

    async fn create_db_schema(&self, conn: &mut PostgresSession, schema: &str) -> Result<()> {
        let sql = self.dialect.create_schema(schema);
        self.execute_sql(conn, ErrorKind::CreateSchema, "", sql).await?;
        Ok(())
    }

    async fn get_table_schema(&self, conn: &mut PostgresSession, table: &str) -> Result<Table> {
        let client = conn.client()?;
        let map_err = |sql: &str, e: tokio_postgres::Error| {
            BulkerError::destination(
                ErrorKind::GetTableSchema,
                self.payload(table).statement(sql),
                e,
            )
        };

        let rows = cancellable(&conn.cancel, async {
            client
                .query(COLUMNS_QUERY, &[&self.schema, &table])
                .await
                .map_err(|e| map_err(COLUMNS_QUERY, e))
        })
        .await?;

        let mut live = Table::new(self.schema.clone(), table);
        for row in rows {
            let name: String = row.get(0);
            let type_name: String = row.get(1);
            let mut column = SqlColumn::new(type_name.clone());
            column.data_type = self.mapping.data_type_of(&type_name);
            live.columns.insert(name, column);
        }
        if live.columns.is_empty() {
            return Ok(live);
        }

        let rows = cancellable(&conn.cancel, async {
            client
                .query(PRIMARY_KEY_QUERY, &[&self.schema, &table])
                .await
                .map_err(|e| map_err(PRIMARY_KEY_QUERY, e))
        })
        .await?;
        for row in rows {
            let constraint: String = row.get(0);
            let column: String = row.get(1);
            live.primary_key_name = constraint;
            live.pk_fields.insert(column);
        }
        Ok(live)
    }

    async fn create_table(&self, conn: &mut PostgresSession, table: &Table) -> Result<()> {
        let sql = self.dialect.create_table(table);
        self.execute_sql(conn, ErrorKind::CreateTable, &table.name, sql).await?;
        Ok(())
    }

    async fn patch_table_schema(&self, conn: &mut PostgresSession, patch: &Table) -> Result<()> {
        for (name, column) in &patch.columns {
            let sql = self.dialect.add_column(patch, name, column);
            self.execute_sql(conn, ErrorKind::PatchTableSchema, &patch.name, sql)
                .await?;
        }
        if patch.delete_pk_fields {
            let constraint = build_constraint_name(&patch.schema, &patch.name);
            let sql = self.dialect.drop_primary_key(patch, &constraint);
            self.execute_sql(conn, ErrorKind::PatchTableSchema, &patch.name, sql)
                .await?;
        }
        if !patch.pk_fields.is_empty() {
            let sql = self.dialect.add_primary_key(patch);
            self.execute_sql(conn, ErrorKind::PatchTableSchema, &patch.name, sql)
                .await?;
        }
        Ok(())
    }

    async fn insert(
        &self,
        conn: &mut PostgresSession,
        table: &Table,
        merge: bool,
        objects: &[Row],
    ) -> Result<()> {
        if objects.is_empty() {
            return Ok(());
        }
        let columns = insert_columns(table, objects)?;
        for chunk in objects.chunks(rows_per_statement(columns.len())) {
            let stmt = self.dialect.insert(table, &columns, chunk, merge);
            self.execute(conn, ErrorKind::Insert, &table.name, &stmt).await?;
        }
        Ok(())
    }

    async fn copy_tables(
        &self,
        conn: &mut PostgresSession,
        target: &Table,
        source: &Table,
        merge: bool,
    ) -> Result<()> {
        let sql = self.dialect.copy(target, source, merge);
        let copied = self
            .execute_sql(conn, ErrorKind::CopyTables, &target.name, sql)
            .await?;
        debug!("Copied {} rows from {} into {}", copied, source.name, target.name);
        Ok(())
    }

    async fn truncate_table(&self, conn: &mut PostgresSession, table: &str) -> Result<()> {
        let sql = self.dialect.truncate(&self.schema, table);
        self.execute_sql(conn, ErrorKind::TruncateTable, table, sql).await?;
        Ok(())
    }

    async fn update(
        &self,
        conn: &mut PostgresSession,
        table: &Table,
        object: &Row,
        where_key: &str,
        where_value: &Value,
    ) -> Result<()> {
        let stmt = self.dialect.update(table, object, where_key, where_value);
        self.execute(conn, ErrorKind::Update, &table.name, &stmt).await?;
        Ok(())
    }

    async fn delete(
        &self,
        conn: &mut PostgresSession,
        table: &str,
        conditions: &WhenConditions,
    ) -> Result<()> {
        let live = self.existing(conn, ErrorKind::Delete, table).await?;
        let stmt = self.dialect.delete(&live, conditions);
        let deleted = self.execute(conn, ErrorKind::Delete, table, &stmt).await?;
        debug!("Deleted {} rows from {}", deleted, table);
        Ok(())
    }

    async fn select(
        &self,
        conn: &mut PostgresSession,
        table: &str,
        conditions: &WhenConditions,
    ) -> Result<Vec<Row>> {
        let live = self.existing(conn, ErrorKind::Select, table).await?;
        let stmt = self.dialect.select_json(&live, conditions);
        let client = conn.client()?;
        let values: Vec<Option<String>> = stmt.params.iter().map(SqlValue::to_text).collect();
        let params: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        let rows = cancellable(&conn.cancel, async {
            client.query(stmt.sql.as_str(), &params).await.map_err(|e| {
                BulkerError::destination(
                    ErrorKind::Select,
                    self.payload(table).statement(stmt.sql.clone()),
                    e,
                )
            })
        })
        .await?;

        let mut objects = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row.get(0);
            objects.push(serde_json::from_str::<Row>(&json)?);
        }
        Ok(objects)
    }

    async fn count(
        &self,
        conn: &mut PostgresSession,
        table: &str,
        conditions: &WhenConditions,
    ) -> Result<u64> {
        let live = self.existing(conn, ErrorKind::Count, table).await?;
        let stmt = self.dialect.count(&live, conditions);
        let client = conn.client()?;
        let values: Vec<Option<String>> = stmt.params.iter().map(SqlValue::to_text).collect();
        let params: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        let row = cancellable(&conn.cancel, async {
            client.query_one(stmt.sql.as_str(), &params).await.map_err(|e| {
                BulkerError::destination(
                    ErrorKind::Count,
                    self.payload(table).statement(stmt.sql.clone()),
                    e,
                )
            })
        })
        .await?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn drop_table(&self, conn: &mut PostgresSession, table: &str, if_exists: bool) -> Result<()> {
        let sql = self.dialect.drop_table(&self.schema, table, if_exists);
        self.execute_sql(conn, ErrorKind::DropTable, table, sql).await?;
        Ok(())
    }

    async fn replace_table(
        &self,
        conn: &mut PostgresSession,
        original: &str,
        replacement: &str,
        drop_old: bool,
    ) -> Result<()> {
        let managed = build_constraint_name(&self.schema, original);
        let current = self.get_table_schema(conn, original).await?;
        let incoming = self.get_table_schema(conn, replacement).await?;
        if !incoming.exists() {
            return Err(BulkerError::destination_msg(
                ErrorKind::ReplaceTable,
                self.payload(replacement),
                format!("relation \"{}\" does not exist", replacement),
            ));
        }

        let mut deprecated = None;
        if current.exists() {
            let name = derived_name(
                original,
                &format!("_deprecated_{}", Utc::now().format("%y%m%d_%H%M%S")),
            );
            let sql = self.dialect.rename_table(&self.schema, original, &name);
            self.execute_sql(conn, ErrorKind::ReplaceTable, original, sql).await?;
            if current.primary_key_name == managed {
                let sql = self.dialect.rename_constraint(
                    &self.schema,
                    &name,
                    &managed,
                    &build_constraint_name(&self.schema, &name),
                );
                self.execute_sql(conn, ErrorKind::ReplaceTable, &name, sql).await?;
            }
            deprecated = Some(name);
        }

        let sql = self.dialect.rename_table(&self.schema, replacement, original);
        self.execute_sql(conn, ErrorKind::ReplaceTable, replacement, sql).await?;
        if !incoming.primary_key_name.is_empty() && incoming.primary_key_name != managed {
            let sql = self.dialect.rename_constraint(
                &self.schema,
                original,
                &incoming.primary_key_name,
                &managed,
            );
            self.execute_sql(conn, ErrorKind::ReplaceTable, original, sql).await?;
        }

        if let Some(name) = deprecated {
            if drop_old {
                let sql = self.dialect.drop_table(&self.schema, &name, false);
                self.execute_sql(conn, ErrorKind::ReplaceTable, &name, sql).await?;
            } else {
                info!("Kept previous version of {} as {}", original, name);
            }
        }
        Ok(())
    }
}
