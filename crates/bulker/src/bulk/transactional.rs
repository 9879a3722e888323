//! Batch mode: buffer everything, write it in one transaction on completion.

use async_trait::async_trait;
use tracing::{info, warn};

use super::options::{BulkMode, State, StreamStatus};
use super::stream::{prune_nulls, BulkerStream, RowBuffer, StreamCore};
use crate::adapter::{Session, SqlAdapter};
use crate::core::{Fields, Object};
use crate::error::Result;
use crate::schema::ensure_table;

pub(crate) struct TransactionalStream<A: SqlAdapter> {
    core: StreamCore<A>,
    buffer: RowBuffer,
    fields: Fields,
}

impl<A: SqlAdapter> TransactionalStream<A> {
    pub fn new(core: StreamCore<A>) -> Self {
        let buffer = RowBuffer::new(&core.options);
        Self {
            core,
            buffer,
            fields: Fields::new(),
        }
    }

    async fn flush(&mut self) -> Result<u64> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let table_name = self.core.table_name.clone();
        let desired = self.core.desired_table(&table_name, &mut self.fields)?;
        let rows = self.buffer.take();
        let adapter = self.core.adapter.clone();
        let merge = self.core.options.merge_rows;
        let converged = if adapter.capabilities().transactional_ddl {
            None
        } else {
            Some(self.core.converge(&desired).await?)
        };

        let core = &mut self.core;
        let mut tx = adapter.open_tx(&core.cancel()).await?;
        let result = async {
            let table = match converged {
                Some(table) => table,
                None => {
                    core.ensure_schema(&mut tx).await?;
                    ensure_table(adapter.as_ref(), &mut tx, &desired).await?
                }
            };
            let rows: Vec<Object> = rows.iter().map(|r| prune_nulls(&table, r)).collect();
            adapter.insert(&mut tx, &table, merge, &rows).await
        }
        .await;

        match result {
            Ok(()) => {
                tx.commit().await?;
                Ok(rows.len() as u64)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(stream = %self.core.id, "rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<A: SqlAdapter> BulkerStream for TransactionalStream<A> {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn mode(&self) -> BulkMode {
        BulkMode::Batch
    }

    fn state(&self) -> &State {
        &self.core.state
    }

    async fn consume(&mut self, object: Object) -> Result<()> {
        self.core.ensure_open()?;
        let processed = self.core.process(&object);
        self.fields.merge(&processed.fields);
        self.buffer.push(processed.object);
        Ok(())
    }

    async fn complete(&mut self) -> Result<State> {
        self.core.ensure_open()?;
        let result = self.flush().await.map(|written| {
            self.core.state.successful_rows = written;
            info!(
                stream = %self.core.id,
                "{} mode: wrote {} rows to {}",
                self.core.mode, written, self.core.table_name
            );
        });
        self.core.finish(StreamStatus::Completed, result)
    }

    async fn abort(&mut self) -> Result<State> {
        self.core.ensure_open()?;
        self.buffer.take();
        self.core.finish(StreamStatus::Aborted, Ok(()))
    }
}
