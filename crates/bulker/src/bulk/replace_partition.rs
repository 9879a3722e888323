//! ReplacePartition mode: stage rows tagged with the partition id, then
//! replace that partition of the target in one transaction.

use async_trait::async_trait;
use tracing::{info, warn};

use super::options::{BulkMode, State, StreamStatus};
use super::staged::StagingTable;
use super::stream::{BulkerStream, StreamCore};
use crate::adapter::{Session, SqlAdapter, WhenConditions, PARTITION_ID_COLUMN};
use crate::core::Object;
use crate::error::{BulkerError, Result};
use crate::schema::ensure_table;

pub(crate) struct ReplacePartitionStream<A: SqlAdapter> {
    core: StreamCore<A>,
    staging: StagingTable,
}

impl<A: SqlAdapter> ReplacePartitionStream<A> {
    pub fn new(core: StreamCore<A>) -> Self {
        let staging = StagingTable::new(&core);
        Self { core, staging }
    }

    async fn replace(&mut self) -> Result<()> {
        self.staging.flush(&mut self.core).await?;
        let partition_id = self
            .core
            .partition_id()
            .map(str::to_string)
            .ok_or_else(|| BulkerError::Internal("partition stream without partition id".into()))?;
        let conditions = WhenConditions::by_partition_id(&partition_id);
        let target = self.core.table_name.clone();
        let desired = if self.staging.table().is_some() {
            Some(self.core.desired_table(&target, &mut self.staging.fields)?)
        } else {
            None
        };
        let adapter = self.core.adapter.clone();
        let merge = self.core.options.merge_rows;
        let converged = match &desired {
            Some(desired) if !adapter.capabilities().transactional_ddl => {
                Some(self.core.converge(desired).await?)
            }
            _ => None,
        };

        let core = &mut self.core;
        let staged = self.staging.table();
        let mut tx = adapter.open_tx(&core.cancel()).await?;
        let result = async {
            match (desired, staged) {
                (Some(desired), Some(staged)) => {
                    let table = match converged {
                        Some(table) => table,
                        None => {
                            core.ensure_schema(&mut tx).await?;
                            ensure_table(adapter.as_ref(), &mut tx, &desired).await?
                        }
                    };
                    adapter.delete(&mut tx, &target, &conditions).await?;
                    adapter.copy_tables(&mut tx, &table, staged, merge).await
                }
                _ => {
                    // Nothing consumed: the partition ends up empty.
                    let live = adapter.get_table_schema(&mut tx, &target).await?;
                    if live.columns.contains_key(PARTITION_ID_COLUMN) {
                        adapter.delete(&mut tx, &target, &conditions).await?;
                    }
                    Ok(())
                }
            }
        }
        .await;

        match result {
            Ok(()) => tx.commit().await,
            Err(e) => {
                self.core.forget_schema();
                if let Err(rollback) = tx.rollback().await {
                    warn!(stream = %self.core.id, "rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<A: SqlAdapter> BulkerStream for ReplacePartitionStream<A> {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn mode(&self) -> BulkMode {
        BulkMode::ReplacePartition
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
        let result = self.replace().await;
        self.staging.cleanup(&self.core).await;
        if result.is_ok() {
            self.core.state.successful_rows = self.staging.staged_rows;
            info!(
                stream = %self.core.id,
                "{} mode: replaced partition {} of {} with {} rows",
                self.core.mode,
                self.core.partition_id().unwrap_or_default(),
                self.core.table_name,
                self.staging.staged_rows
            );
        }
        self.core.finish(StreamStatus::Completed, result)
    }

    async fn abort(&mut self) -> Result<State> {
        self.core.ensure_open()?;
        self.staging.cleanup(&self.core).await;
        self.core.finish(StreamStatus::Aborted, Ok(()))
    }
}
