//! The destination adapter contract.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::conditions::WhenConditions;
use super::type_mapping::TypeMapping;
use crate::config::DataSourceConfig;
use crate::core::{Object, Table};
use crate::error::Result;

/// What a destination can do beyond the base contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// DDL participates in transactions and rolls back with them.
    pub transactional_ddl: bool,
    /// Rows can be replaced per partition (delete + copy by partition id).
    pub partitions: bool,
}

/// An execution context: either a transaction or an autocommit connection.
///
/// A transactional session dropped without `commit` or `rollback` is
/// rolled back.
#[async_trait]
pub trait Session: Send {
    fn is_transactional(&self) -> bool;

    fn cancel_token(&self) -> &CancellationToken;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// Destination adapter for SQL stores.
///
/// Every operation runs on a caller-provided [`Session`] and fails with
/// [`BulkerError::Destination`](crate::BulkerError::Destination) carrying the
/// operation kind and destination context. Table names are resolved in the
/// adapter's default schema.
#[async_trait]
pub trait SqlAdapter: Send + Sync + 'static {
    type Conn: Session;

    /// Destination type id, e.g. "postgres".
    fn type_id(&self) -> &str;

    fn config(&self) -> &DataSourceConfig;

    /// Schema new tables are created in.
    fn default_schema(&self) -> &str;

    fn type_mapping(&self) -> &TypeMapping;

    fn capabilities(&self) -> Capabilities;

    /// Open a transaction.
    async fn open_tx(&self, cancel: &CancellationToken) -> Result<Self::Conn>;

    /// Open an autocommit session.
    async fn db(&self, cancel: &CancellationToken) -> Result<Self::Conn>;

    async fn create_db_schema(&self, conn: &mut Self::Conn, schema: &str) -> Result<()>;

    /// Live table, or a table with no columns when it does not exist.
    async fn get_table_schema(&self, conn: &mut Self::Conn, table: &str) -> Result<Table>;

    async fn create_table(&self, conn: &mut Self::Conn, table: &Table) -> Result<()>;

    /// Apply a patch from [`Table::diff`]: columns first, then primary key
    /// drop, then primary key creation.
    async fn patch_table_schema(&self, conn: &mut Self::Conn, patch: &Table) -> Result<()>;

    /// Insert rows. With `merge` and a primary key, rows are upserted.
    async fn insert(
        &self,
        conn: &mut Self::Conn,
        table: &Table,
        merge: bool,
        objects: &[Object],
    ) -> Result<()>;

    /// Copy the rows of `source` into `target` on the server.
    async fn copy_tables(
        &self,
        conn: &mut Self::Conn,
        target: &Table,
        source: &Table,
        merge: bool,
    ) -> Result<()>;

    async fn truncate_table(&self, conn: &mut Self::Conn, table: &str) -> Result<()>;

    async fn update(
        &self,
        conn: &mut Self::Conn,
        table: &Table,
        object: &Object,
        where_key: &str,
        where_value: &Value,
    ) -> Result<()>;

    async fn delete(
        &self,
        conn: &mut Self::Conn,
        table: &str,
        conditions: &WhenConditions,
    ) -> Result<()>;

    async fn select(
        &self,
        conn: &mut Self::Conn,
        table: &str,
        conditions: &WhenConditions,
    ) -> Result<Vec<Object>>;

    async fn count(
        &self,
        conn: &mut Self::Conn,
        table: &str,
        conditions: &WhenConditions,
    ) -> Result<u64>;

    async fn drop_table(&self, conn: &mut Self::Conn, table: &str, if_exists: bool) -> Result<()>;

    /// Swap `replacement` into the place of `original` by renaming. The
    /// displaced table is dropped when `drop_old` is set.
    async fn replace_table(
        &self,
        conn: &mut Self::Conn,
        original: &str,
        replacement: &str,
        drop_old: bool,
    ) -> Result<()>;
}
