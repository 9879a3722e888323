//! ReplaceTable mode: stage every row, then swap the staging table in.

use async_trait::async_trait;
use tracing::{info, warn};

use super::options::{BulkMode, State, StreamStatus};
use super::staged::StagingTable;
use super::stream::{BulkerStream, StreamCore};
use crate::adapter::{Session, SqlAdapter};
use crate::core::Object;
use crate::error::Result;

pub(crate) struct ReplaceTableStream<A: SqlAdapter> {
    core: StreamCore<A>,
    staging: StagingTable,
}

impl<A: SqlAdapter> ReplaceTableStream<A> {
    pub fn new(core: StreamCore<A>) -> Self {
        let staging = StagingTable::new(&core);
        Self { core, staging }
    }

    async fn swap(&mut self) -> Result<()> {
        self.staging.flush(&mut self.core).await?;
        let adapter = self.core.adapter.clone();
        let cancel = self.core.cancel();
        let target = self.core.table_name.clone();

        if self.staging.table().is_none() {
            // Nothing consumed: an existing table ends up empty, a missing one
            // stays absent.
            let mut conn = adapter.db(&cancel).await?;
            if adapter.get_table_schema(&mut conn, &target).await?.exists() {
                adapter.truncate_table(&mut conn, &target).await?;
            }
            return Ok(());
        }

        let mut tx = adapter.open_tx(&cancel).await?;
        match adapter
            .replace_table(&mut tx, &target, &self.staging.name, true)
            .await
        {
            Ok(()) => tx.commit().await?,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(stream = %self.core.id, "rollback failed: {}", rollback);
                }
                return Err(e);
            }
        }
        self.staging.renamed();
        Ok(())
    }
}

#[async_trait]
impl<A: SqlAdapter> BulkerStream for ReplaceTableStream<A> {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn mode(&self) -> BulkMode {
        BulkMode::ReplaceTable
    }

    fn state(&self) -> &State {
        &self.core.state
    }

    async fn consume(&mut self, object: Object) -> Result<()> {
        self.core.ensure_open()?;
        let processed = self.core.process(&object);
        self.staging.push(processed);
        if self.staging.is_full(self.core.options.batch_size) {
            if let Err(e) = self.staging.flush(&mut self.core).await {
                self.staging.cleanup(&self.core).await;
                return self.core.finish(StreamStatus::Failed, Err(e)).map(|_| ());
            }
        }
        Ok(())
    }

    async fn complete(&mut self) -> Result<State> {
        self.core.ensure_open()?;
        let result = self.swap().await;
        match &result {
            Ok(()) => {
                self.core.state.successful_rows = self.staging.staged_rows;
                info!(
                    stream = %self.core.id,
                    "{} mode: replaced {} with {} rows",
                    self.core.mode, self.core.table_name, self.staging.staged_rows
                );
            }
            Err(_) => self.staging.cleanup(&self.core).await,
        }
        self.core.finish(StreamStatus::Completed, result)
    }

    async fn abort(&mut self) -> Result<State> {
        self.core.ensure_open()?;
        self.staging.cleanup(&self.core).await;
        self.core.finish(StreamStatus::Aborted, Ok(()))
    }
}
