//! Bulker over any [`SqlAdapter`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::auto_commit::AutoCommitStream;
use super::options::{BulkMode, StreamOptions};
use super::replace_partition::ReplacePartitionStream;
use super::replace_table::ReplaceTableStream;
use super::stream::{Bulker, BulkerStream, StreamCore};
use super::transactional::TransactionalStream;
use crate::adapter::SqlAdapter;
use crate::error::{BulkerError, Result};

/// Hands out streams of every mode for one SQL destination.
pub struct SqlBulker<A: SqlAdapter> {
    adapter: Arc<A>,
    closed: AtomicBool,
}

impl<A: SqlAdapter> SqlBulker<A> {
    pub fn new(adapter: A) -> Self {
        Self::from_arc(Arc::new(adapter))
    }

    pub fn from_arc(adapter: Arc<A>) -> Self {
        Self {
            adapter,
            closed: AtomicBool::new(false),
        }
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }
}

#[async_trait]
impl<A: SqlAdapter> Bulker for SqlBulker<A> {
    fn type_id(&self) -> &str {
        self.adapter.type_id()
    }

    async fn create_stream(
        &self,
        id: &str,
        table: &str,
        mode: BulkMode,
        options: StreamOptions,
    ) -> Result<Box<dyn BulkerStream>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BulkerError::StreamClosed(format!(
                "{} bulker is closed",
                self.adapter.type_id()
            )));
        }
        let core = StreamCore::new(self.adapter.clone(), id, table, mode, options)?;
        debug!(stream = %id, "Opening {} stream into {}", mode, table);
        let stream: Box<dyn BulkerStream> = match mode {
            BulkMode::Stream => Box::new(AutoCommitStream::new(core)),
            BulkMode::Batch => Box::new(TransactionalStream::new(core)),
            BulkMode::ReplaceTable => Box::new(ReplaceTableStream::new(core)),
            BulkMode::ReplacePartition => Box::new(ReplacePartitionStream::new(core)),
        };
        Ok(stream)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
