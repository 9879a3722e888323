//! Staging tables shared by the replace modes.
//!
//! Rows are flushed in chunks through autocommit sessions so the staging
//! table never holds a transaction open while objects are still arriving.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::stream::{prune_nulls, RowBuffer, StreamCore};
use crate::adapter::SqlAdapter;
use crate::core::identifier::derived_name;
use crate::core::{Fields, Object, Table};
use crate::error::Result;
use crate::schema::{ensure_table, ProcessedObject};

/// `<table>_tmp_<yymmdd_hhmmss>_<8 hex>`, shortened to a valid identifier.
pub fn staging_table_name(table: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    derived_name(
        table,
        &format!("_tmp_{}_{}", Utc::now().format("%y%m%d_%H%M%S"), &suffix[..8]),
    )
}

pub(crate) struct StagingTable {
    pub name: String,
    pub fields: Fields,
    pub staged_rows: u64,
    buffer: RowBuffer,
    table: Option<Table>,
    touched: bool,
}

impl StagingTable {
    pub fn new<A: SqlAdapter>(core: &StreamCore<A>) -> Self {
        Self {
            name: staging_table_name(&core.table_name),
            fields: Fields::new(),
            staged_rows: 0,
            buffer: RowBuffer::new(&core.options),
            table: None,
            touched: false,
        }
    }

    /// Converged staging table, once rows were flushed.
    pub fn table(&self) -> Option<&Table> {
        self.table.as_ref()
    }

    pub fn push(&mut self, processed: ProcessedObject) {
        self.fields.merge(&processed.fields);
        self.buffer.push(processed.object);
    }

    pub fn is_full(&self, batch_size: usize) -> bool {
        self.buffer.len() >= batch_size
    }

    /// Write buffered rows, creating or widening the staging table first.
    pub async fn flush<A: SqlAdapter>(&mut self, core: &mut StreamCore<A>) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let desired = core.desired_table(&self.name, &mut self.fields)?;
        let adapter = core.adapter.clone();
        let mut conn = adapter.db(&core.cancel()).await?;
        core.ensure_schema(&mut conn).await?;

        self.touched = true;
        let table = ensure_table(adapter.as_ref(), &mut conn, &desired).await?;
        let rows: Vec<Object> = self
            .buffer
            .take()
            .iter()
            .map(|r| prune_nulls(&table, r))
            .collect();
        adapter
            .insert(&mut conn, &table, core.options.merge_rows, &rows)
            .await?;
        self.staged_rows += rows.len() as u64;
        debug!(
            stream = %core.id,
            "Staged {} rows in {} ({} total)",
            rows.len(),
            self.name,
            self.staged_rows
        );
        self.table = Some(table);
        Ok(())
    }

    /// The staging table now lives under another name.
    pub fn renamed(&mut self) {
        self.table = None;
        self.touched = false;
    }

    /// Best-effort drop. Runs on a fresh token so cleanup survives a
    /// cancelled load.
    pub async fn cleanup<A: SqlAdapter>(&mut self, core: &StreamCore<A>) {
        self.buffer.take();
        if !self.touched {
            return;
        }
        let adapter = core.adapter.clone();
        let cancel = CancellationToken::new();
        let result = async {
            let mut conn = adapter.db(&cancel).await?;
            adapter.drop_table(&mut conn, &self.name, true).await
        }
        .await;
        match result {
            Ok(()) => debug!(stream = %core.id, "Dropped staging table {}", self.name),
            Err(e) => warn!(
                stream = %core.id,
                "Failed to drop staging table {}: {}", self.name, e
            ),
        }
        self.renamed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identifier::{validate_identifier, MAX_IDENTIFIER_LENGTH};

    #[test]
    fn test_staging_name_shape() {
        let name = staging_table_name("events");
        assert!(name.starts_with("events_tmp_"));
        let parts: Vec<&str> = name.rsplitn(3, '_').collect();
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_ne!(staging_table_name("events"), name);
    }

    #[test]
    fn test_staging_name_of_long_table_is_valid() {
        let name = staging_table_name(&"t".repeat(80));
        assert_eq!(name.len(), MAX_IDENTIFIER_LENGTH);
        assert!(validate_identifier(&name).is_ok());
    }
}
