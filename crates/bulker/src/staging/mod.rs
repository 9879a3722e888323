//! Staging storage for batch files.
//!
//! Batches are encoded in memory with [`BatchFile`] and handed to a
//! [`FileStorage`] backend (local directory, in-memory store, or Google
//! Cloud Storage).

mod batch_file;
mod store;

use async_trait::async_trait;
use bytes::Bytes;

pub use batch_file::{BatchFile, FileCompression, FileFormat};
pub use store::ObjectStoreStorage;

use crate::error::Result;

/// Object storage that staged files are uploaded to.
#[async_trait]
pub trait FileStorage: Send + Sync {
    fn type_id(&self) -> &str;

    /// Store `data` under `name`, replacing any existing file.
    async fn upload(&self, name: &str, data: Bytes) -> Result<()>;

    /// Remove `name`. Missing files are not an error.
    async fn delete(&self, name: &str) -> Result<()>;
}
