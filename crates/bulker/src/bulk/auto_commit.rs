//! Stream mode: every object is written as it arrives.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::options::{BulkMode, State, StreamStatus};
use super::stream::{prune_nulls, BulkerStream, StreamCore};
use crate::adapter::{Session, SqlAdapter};
use crate::core::{Object, Table};
use crate::error::Result;
use crate::schema::ensure_table;

pub(crate) struct AutoCommitStream<A: SqlAdapter> {
    core: StreamCore<A>,
}

impl<A: SqlAdapter> AutoCommitStream<A> {
    pub fn new(core: StreamCore<A>) -> Self {
        Self { core }
    }

    async fn write(&mut self, desired: &Table, object: &Object) -> Result<()> {
        let adapter = self.core.adapter.clone();
        let cancel = self.core.cancel();
        let merge = self.core.options.merge_rows;

        if adapter.capabilities().transactional_ddl {
            let mut tx = adapter.open_tx(&cancel).await?;
            let result = async {
                self.core.ensure_schema(&mut tx).await?;
                let table = ensure_table(adapter.as_ref(), &mut tx, desired).await?;
                adapter
                    .insert(&mut tx, &table, merge, &[prune_nulls(&table, object)])
                    .await
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
        } else {
            let table = self.core.converge(desired).await?;
            let mut conn = adapter.db(&cancel).await?;
            adapter
                .insert(&mut conn, &table, merge, &[prune_nulls(&table, object)])
                .await
        }
    }
}

#[async_trait]
impl<A: SqlAdapter> BulkerStream for AutoCommitStream<A> {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn mode(&self) -> BulkMode {
        BulkMode::Stream
    }

    fn state(&self) -> &State {
        &self.core.state
    }

    async fn consume(&mut self, object: Object) -> Result<()> {
        self.core.ensure_open()?;
        let mut processed = self.core.process(&object);
        let table_name = self.core.table_name.clone();
        let result = match self.core.desired_table(&table_name, &mut processed.fields) {
            Ok(desired) => self.write(&desired, &processed.object).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                self.core.state.successful_rows += 1;
                Ok(())
            }
            Err(e) => {
                debug!(stream = %self.core.id, "object rejected: {}", e);
                self.core.state.set_error(&e);
                Err(e)
            }
        }
    }

    async fn complete(&mut self) -> Result<State> {
        self.core.ensure_open()?;
        self.core.finish(StreamStatus::Completed, Ok(()))
    }

    async fn abort(&mut self) -> Result<State> {
        self.core.ensure_open()?;
        self.core.finish(StreamStatus::Aborted, Ok(()))
    }
}
