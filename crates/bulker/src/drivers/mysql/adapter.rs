//! MySQL adapter over a mysql_async pool.
//!
//! MySQL commits DDL implicitly, so schema changes are never rolled back
//! with the surrounding transaction. Primary keys carry no user-visible
//! name; a live key is reported under the managed constraint name.

use async_trait::async_trait;
use chrono::{Datelike, Timelike, Utc};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, SslOpts};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dialect::{mysql_type_mapping, MysqlDialect};
use crate::adapter::dialect::{insert_columns, rows_per_statement};
use crate::adapter::{
    cancellable, Capabilities, Dialect, Session, SqlAdapter, Statement, TypeMapping,
    WhenConditions,
};
use crate::config::DataSourceConfig;
use crate::core::identifier::derived_name;
use crate::core::{build_constraint_name, Object, SqlColumn, SqlValue, Table};
use crate::drivers::common::SslMode;
use crate::error::{BulkerError, ErrorKind, ErrorPayload, Result};

pub const MYSQL_TYPE_ID: &str = "mysql";

const COLUMNS_QUERY: &str = "SELECT COLUMN_NAME, COLUMN_TYPE FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION";

const PRIMARY_KEY_QUERY: &str = "SELECT COLUMN_NAME FROM information_schema.KEY_COLUMN_USAGE \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
     ORDER BY ORDINAL_POSITION";

fn to_mysql(value: &SqlValue) -> mysql_async::Value {
    match value {
        SqlValue::Null => mysql_async::Value::NULL,
        SqlValue::Bool(b) => mysql_async::Value::Int(i64::from(*b)),
        SqlValue::Int(i) => mysql_async::Value::Int(*i),
        SqlValue::Float(f) => mysql_async::Value::Double(*f),
        SqlValue::Timestamp(ts) => mysql_async::Value::Date(
            ts.year() as u16,
            ts.month() as u8,
            ts.day() as u8,
            ts.hour() as u8,
            ts.minute() as u8,
            ts.second() as u8,
            ts.timestamp_subsec_micros(),
        ),
        SqlValue::Json(s) | SqlValue::Text(s) => mysql_async::Value::Bytes(s.as_bytes().to_vec()),
    }
}

/// A pooled connection, optionally inside `START TRANSACTION`.
pub struct MysqlSession {
    conn: Option<Conn>,
    transactional: bool,
    finished: bool,
    cancel: CancellationToken,
}

impl MysqlSession {
    fn conn_mut(&mut self) -> Result<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| BulkerError::Internal("mysql session already closed".into()))
    }

    async fn finish(&mut self, sql: &str, kind: ErrorKind) -> Result<()> {
        if !self.transactional {
            return Ok(());
        }
        let conn = self.conn_mut()?;
        let result = conn.query_drop(sql).await;
        self.finished = true;
        result.map_err(|e| BulkerError::destination(kind, ErrorPayload::new(MYSQL_TYPE_ID), e))
    }
}

impl Drop for MysqlSession {
    fn drop(&mut self) {
        if !self.transactional || self.finished {
            return;
        }
        if let Some(mut conn) = self.conn.take() {
            warn!("Rolling back unfinished MySQL transaction");
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = conn.query_drop("ROLLBACK").await {
                        warn!("Rollback of unfinished transaction failed: {}", e);
                    }
                });
            }
        }
    }
}

#[async_trait]
impl Session for MysqlSession {
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

/// MySQL destination.
pub struct MysqlAdapter {
    pool: Pool,
    config: DataSourceConfig,
    schema: String,
    dialect: MysqlDialect,
    mapping: TypeMapping,
}

impl MysqlAdapter {
    /// Create the pool and verify connectivity.
    pub async fn connect(config: &DataSourceConfig) -> Result<Self> {
        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        let ssl_opts = match ssl_mode {
            SslMode::Disable => {
                warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
                None
            }
            SslMode::Require => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
            SslMode::VerifyCa => Some(SslOpts::default().with_danger_skip_domain_validation(true)),
            SslMode::VerifyFull => Some(SslOpts::default()),
        };

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port_or(3306))
            .db_name(Some(config.database.clone()))
            .user(Some(config.username.clone()))
            .pass(Some(config.password.clone()))
            .init(vec!["SET NAMES utf8mb4", "SET time_zone = '+00:00'"]);
        if let Some(ssl) = ssl_opts {
            builder = builder.ssl_opts(ssl);
        }
        let constraints = PoolConstraints::new(1, config.max_connections.max(1)).ok_or_else(|| {
            BulkerError::Config(format!(
                "invalid max_connections {} for MySQL pool",
                config.max_connections
            ))
        })?;
        let opts: Opts = builder
            .pool_opts(PoolOpts::new().with_constraints(constraints))
            .into();

        let adapter = Self {
            pool: Pool::new(opts),
            config: config.clone(),
            schema: config.schema_or(&config.database).to_string(),
            dialect: MysqlDialect::new(),
            mapping: mysql_type_mapping(),
        };

        let mut conn = adapter.checkout().await?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| BulkerError::destination(ErrorKind::Connect, adapter.payload(""), e))?;
        drop(conn);

        info!(
            "Connected to MySQL: {}:{}/{} (ssl_mode={})",
            config.host,
            config.port_or(3306),
            config.database,
            ssl_mode
        );
        Ok(adapter)
    }

    fn payload(&self, table: &str) -> ErrorPayload {
        let payload = ErrorPayload::new(MYSQL_TYPE_ID);
        if table.is_empty() {
            payload
        } else {
            payload.table(self.schema.clone(), table)
        }
    }

    async fn checkout(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| BulkerError::destination(ErrorKind::Connect, self.payload(""), e))
    }

    async fn session(&self, cancel: &CancellationToken, transactional: bool) -> Result<MysqlSession> {
        let mut conn = cancellable(cancel, self.checkout()).await?;
        if transactional {
            conn.query_drop("START TRANSACTION").await.map_err(|e| {
                BulkerError::destination(ErrorKind::BeginTransaction, self.payload(""), e)
            })?;
        }
        Ok(MysqlSession {
            conn: Some(conn),
            transactional,
            finished: false,
            cancel: cancel.clone(),
        })
    }

    async fn execute(
        &self,
        session: &mut MysqlSession,
        kind: ErrorKind,
        table: &str,
        stmt: &Statement,
    ) -> Result<u64> {
        let cancel = session.cancel.clone();
        let conn = session.conn_mut()?;
        let params: Vec<mysql_async::Value> = stmt.params.iter().map(to_mysql).collect();
        debug!("{}: {}", kind, stmt.sql);
        cancellable(&cancel, async {
            let result = if params.is_empty() {
                conn.query_drop(stmt.sql.as_str()).await
            } else {
                conn.exec_drop(stmt.sql.as_str(), params).await
            };
            result.map_err(|e| {
                BulkerError::destination(kind, self.payload(table).statement(stmt.sql.clone()), e)
            })?;
            Ok(conn.affected_rows())
        })
        .await
    }

    async fn execute_sql(
        &self,
        session: &mut MysqlSession,
        kind: ErrorKind,
        table: &str,
        sql: String,
    ) -> Result<u64> {
        self.execute(session, kind, table, &Statement::new(sql)).await
    }

    async fn existing(&self, session: &mut MysqlSession, kind: ErrorKind, table: &str) -> Result<Table> {
        let live = self.get_table_schema(session, table).await?;
        if !live.exists() {
            return Err(BulkerError::destination_msg(
                kind,
                self.payload(table),
                format!("table '{}' doesn't exist", table),
            ));
        }
        Ok(live)
    }
}

#[async_trait]
impl SqlAdapter for MysqlAdapter {
    type Conn = MysqlSession;

    fn type_id(&self) -> &str {
        MYSQL_TYPE_ID
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
            transactional_ddl: false,
            partitions: true,
        }
    }

    async fn open_tx(&self, cancel: &CancellationToken) -> Result<MysqlSession> {
        self.session(cancel, true).await
    }

    async fn db(&self, cancel: &CancellationToken) -> Result<MysqlSession> {
        self.session(cancel, false).await
    }

    async fn create_db_schema(&self, session: &mut MysqlSession, schema: &str) -> Result<()> {
        let sql = self.dialect.create_schema(schema);
        self.execute_sql(session, ErrorKind::CreateSchema, "", sql).await?;
        Ok(())
    }

    async fn get_table_schema(&self, session: &mut MysqlSession, table: &str) -> Result<Table> {
        let cancel = session.cancel.clone();
        let conn = session.conn_mut()?;
        let schema = self.schema.clone();
        let (columns, keys) = cancellable(&cancel, async {
            let map_err = |sql: &str, e: mysql_async::Error| {
                BulkerError::destination(
                    ErrorKind::GetTableSchema,
                    self.payload(table).statement(sql),
                    e,
                )
            };
            let columns: Vec<(String, String)> = conn
                .exec(COLUMNS_QUERY, (schema.as_str(), table))
                .await
                .map_err(|e| map_err(COLUMNS_QUERY, e))?;
            let keys: Vec<String> = conn
                .exec(PRIMARY_KEY_QUERY, (schema.as_str(), table))
                .await
                .map_err(|e| map_err(PRIMARY_KEY_QUERY, e))?;
            Ok((columns, keys))
        })
        .await?;

        let mut live = Table::new(self.schema.clone(), table);
        for (name, type_name) in columns {
            let mut column = SqlColumn::new(type_name.clone());
            column.data_type = self.mapping.data_type_of(&type_name);
            live.columns.insert(name, column);
        }
        if !keys.is_empty() {
            live.pk_fields = keys.into_iter().collect();
            live.primary_key_name = build_constraint_name(&self.schema, table);
        }
        Ok(live)
    }

    async fn create_table(&self, session: &mut MysqlSession, table: &Table) -> Result<()> {
        let sql = self.dialect.create_table(table);
        self.execute_sql(session, ErrorKind::CreateTable, &table.name, sql).await?;
        Ok(())
    }

    async fn patch_table_schema(&self, session: &mut MysqlSession, patch: &Table) -> Result<()> {
        for (name, column) in &patch.columns {
            let sql = self.dialect.add_column(patch, name, column);
            self.execute_sql(session, ErrorKind::PatchTableSchema, &patch.name, sql)
                .await?;
        }
        if patch.delete_pk_fields {
            let sql = self.dialect.drop_primary_key(patch, "");
            self.execute_sql(session, ErrorKind::PatchTableSchema, &patch.name, sql)
                .await?;
        }
        if !patch.pk_fields.is_empty() {
            let sql = self.dialect.add_primary_key(patch);
            self.execute_sql(session, ErrorKind::PatchTableSchema, &patch.name, sql)
                .await?;
        }
        Ok(())
    }

    async fn insert(
        &self,
        session: &mut MysqlSession,
        table: &Table,
        merge: bool,
        objects: &[Object],
    ) -> Result<()> {
        if objects.is_empty() {
            return Ok(());
        }
        let columns = insert_columns(table, objects)?;
        for chunk in objects.chunks(rows_per_statement(columns.len())) {
            let stmt = self.dialect.insert(table, &columns, chunk, merge);
            self.execute(session, ErrorKind::Insert, &table.name, &stmt).await?;
        }
        Ok(())
    }

    async fn copy_tables(
        &self,
        session: &mut MysqlSession,
        target: &Table,
        source: &Table,
        merge: bool,
    ) -> Result<()> {
        let sql = self.dialect.copy(target, source, merge);
        self.execute_sql(session, ErrorKind::CopyTables, &target.name, sql)
            .await?;
        Ok(())
    }

    async fn truncate_table(&self, session: &mut MysqlSession, table: &str) -> Result<()> {
        let sql = self.dialect.truncate(&self.schema, table);
        self.execute_sql(session, ErrorKind::TruncateTable, table, sql).await?;
        Ok(())
    }

    async fn update(
        &self,
        session: &mut MysqlSession,
        table: &Table,
        object: &Object,
        where_key: &str,
        where_value: &Value,
    ) -> Result<()> {
        let stmt = self.dialect.update(table, object, where_key, where_value);
        self.execute(session, ErrorKind::Update, &table.name, &stmt).await?;
        Ok(())
    }

    async fn delete(
        &self,
        session: &mut MysqlSession,
        table: &str,
        conditions: &WhenConditions,
    ) -> Result<()> {
        let live = self.existing(session, ErrorKind::Delete, table).await?;
        let stmt = self.dialect.delete(&live, conditions);
        self.execute(session, ErrorKind::Delete, table, &stmt).await?;
        Ok(())
    }

    async fn select(
        &self,
        session: &mut MysqlSession,
        table: &str,
        conditions: &WhenConditions,
    ) -> Result<Vec<Object>> {
        let live = self.existing(session, ErrorKind::Select, table).await?;
        let stmt = self.dialect.select_json(&live, conditions);
        let cancel = session.cancel.clone();
        let conn = session.conn_mut()?;
        let params: Vec<mysql_async::Value> = stmt.params.iter().map(to_mysql).collect();
        let rows: Vec<String> = cancellable(&cancel, async {
            conn.exec(stmt.sql.as_str(), params).await.map_err(|e| {
                BulkerError::destination(
                    ErrorKind::Select,
                    self.payload(table).statement(stmt.sql.clone()),
                    e,
                )
            })
        })
        .await?;

        let mut objects = Vec::with_capacity(rows.len());
        for json in rows {
            objects.push(serde_json::from_str::<Object>(&json)?);
        }
        Ok(objects)
    }

    async fn count(
        &self,
        session: &mut MysqlSession,
        table: &str,
        conditions: &WhenConditions,
    ) -> Result<u64> {
        let live = self.existing(session, ErrorKind::Count, table).await?;
        let stmt = self.dialect.count(&live, conditions);
        let cancel = session.cancel.clone();
        let conn = session.conn_mut()?;
        let params: Vec<mysql_async::Value> = stmt.params.iter().map(to_mysql).collect();
        let count: Option<i64> = cancellable(&cancel, async {
            conn.exec_first(stmt.sql.as_str(), params).await.map_err(|e| {
                BulkerError::destination(
                    ErrorKind::Count,
                    self.payload(table).statement(stmt.sql.clone()),
                    e,
                )
            })
        })
        .await?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }

    async fn drop_table(&self, session: &mut MysqlSession, table: &str, if_exists: bool) -> Result<()> {
        let sql = self.dialect.drop_table(&self.schema, table, if_exists);
        self.execute_sql(session, ErrorKind::DropTable, table, sql).await?;
        Ok(())
    }

    async fn replace_table(
        &self,
        session: &mut MysqlSession,
        original: &str,
        replacement: &str,
        drop_old: bool,
    ) -> Result<()> {
        let current = self.get_table_schema(session, original).await?;
        if !current.exists() {
            let sql = self.dialect.rename_table(&self.schema, replacement, original);
            self.execute_sql(session, ErrorKind::ReplaceTable, replacement, sql)
                .await?;
            return Ok(());
        }

        let deprecated = derived_name(
            original,
            &format!("_deprecated_{}", Utc::now().format("%y%m%d_%H%M%S")),
        );
        let sql = self
            .dialect
            .rename_tables(&self.schema, &[(original, &deprecated), (replacement, original)]);
        self.execute_sql(session, ErrorKind::ReplaceTable, original, sql).await?;

        if drop_old {
            let sql = self.dialect.drop_table(&self.schema, &deprecated, false);
            self.execute_sql(session, ErrorKind::ReplaceTable, &deprecated, sql)
                .await?;
        } else {
            info!("Kept previous version of {} as {}", original, deprecated);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_values_bind_natively() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            to_mysql(&SqlValue::Timestamp(ts)),
            mysql_async::Value::Date(2024, 1, 2, 3, 4, 5, 0)
        );
        assert_eq!(to_mysql(&SqlValue::Bool(true)), mysql_async::Value::Int(1));
        assert_eq!(
            to_mysql(&SqlValue::Text("x".into())),
            mysql_async::Value::Bytes(b"x".to_vec())
        );
        assert_eq!(to_mysql(&SqlValue::Null), mysql_async::Value::NULL);
    }
}
