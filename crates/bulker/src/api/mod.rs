//! HTTP-API destinations.
//!
//! An API destination accepts whole batch files instead of SQL statements.
//! [`ApiBatchStream`] encodes consumed objects into one in-memory
//! [`BatchFile`] and hands it to the destination's [`Uploader`] on
//! `complete`.

mod mixpanel;
mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use mixpanel::{MixpanelBulker, MIXPANEL_TYPE_ID, MIXPANEL_UNSUPPORTED};
pub use retry::{with_retries, Attempt, RETRY_DELAYS_MS};

use crate::bulk::{BulkMode, BulkerStream, State, StreamOptions, StreamStatus};
use crate::core::Object;
use crate::error::{BulkerError, Result};
use crate::staging::BatchFile;

/// Accepted upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    pub body: String,
    /// Set when the destination accepted the file but rejected some rows.
    pub warning: Option<String>,
}

/// Sends one encoded batch file to an HTTP API.
#[async_trait]
pub trait Uploader: Send + Sync + 'static {
    fn type_id(&self) -> &str;

    /// Empty batch file in the format the API expects.
    fn batch_file(&self) -> BatchFile;

    async fn upload(
        &self,
        table: &str,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<UploadResponse>;
}

/// Batch-mode stream for an [`Uploader`].
pub struct ApiBatchStream<U: Uploader> {
    uploader: Arc<U>,
    id: String,
    table: String,
    cancel: CancellationToken,
    file: BatchFile,
    state: State,
    closed: bool,
}

impl<U: Uploader> ApiBatchStream<U> {
    pub fn new(uploader: Arc<U>, id: &str, table: &str, options: StreamOptions) -> Self {
        let file = uploader.batch_file();
        Self {
            uploader,
            id: id.to_string(),
            table: table.to_string(),
            cancel: options.cancel,
            file,
            state: State::default(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(BulkerError::StreamClosed(format!(
                "stream {} is already {}",
                self.id, self.state.status
            )));
        }
        Ok(())
    }

    fn fail(&mut self, error: BulkerError) -> BulkerError {
        self.closed = true;
        self.state.status = StreamStatus::Failed;
        self.state.set_error(&error);
        error
    }
}

#[async_trait]
impl<U: Uploader> BulkerStream for ApiBatchStream<U> {
    fn id(&self) -> &str {
        &self.id
    }

    fn mode(&self) -> BulkMode {
        BulkMode::Batch
    }

    fn state(&self) -> &State {
        &self.state
    }

    async fn consume(&mut self, object: Object) -> Result<()> {
        self.ensure_open()?;
        self.state.processed_rows += 1;
        if let Err(e) = self.file.write(&object) {
            self.state.set_error(&e);
            return Err(e);
        }
        Ok(())
    }

    async fn complete(&mut self) -> Result<State> {
        self.ensure_open()?;
        let rows = self.file.rows();
        if rows == 0 {
            self.closed = true;
            self.state.status = StreamStatus::Completed;
            return Ok(self.state.clone());
        }

        let file = std::mem::replace(&mut self.file, self.uploader.batch_file());
        let data = match file.finish() {
            Ok(data) => data,
            Err(e) => return Err(self.fail(e)),
        };
        let size = data.len();
        match self.uploader.upload(&self.table, data, &self.cancel).await {
            Ok(response) => {
                if let Some(warning) = response.warning {
                    warn!(stream = %self.id, "{}: {}", self.uploader.type_id(), warning);
                    self.state.warnings.push(warning);
                }
                info!(
                    stream = %self.id,
                    "Uploaded {} rows ({} bytes) to {}",
                    rows,
                    size,
                    self.uploader.type_id()
                );
                self.closed = true;
                self.state.successful_rows = rows;
                self.state.status = StreamStatus::Completed;
                Ok(self.state.clone())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn abort(&mut self) -> Result<State> {
        self.ensure_open()?;
        self.closed = true;
        self.state.status = StreamStatus::Aborted;
        Ok(self.state.clone())
    }
}
