//! [`FileStorage`] on top of the `object_store` crate.

use std::path::Path as FsPath;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use tracing::debug;

use super::FileStorage;
use crate::config::{GoogleConfig, KeyFile, StagingConfig};
use crate::error::{BulkerError, ErrorKind, ErrorPayload, Result};

pub struct ObjectStoreStorage {
    store: Arc<dyn ObjectStore>,
    type_id: &'static str,
    bucket: String,
}

impl ObjectStoreStorage {
    pub fn from_config(config: &StagingConfig) -> Result<Self> {
        match config {
            StagingConfig::Local { path } => Self::local(path),
            StagingConfig::Memory => Ok(Self::in_memory()),
            StagingConfig::Gcs(google) => Self::gcs(google),
        }
    }

    /// Files under a local directory, created if missing.
    pub fn local(path: &FsPath) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let store = LocalFileSystem::new_with_prefix(path).map_err(|e| {
            BulkerError::Config(format!("invalid staging path {}: {}", path.display(), e))
        })?;
        Ok(Self {
            store: Arc::new(store),
            type_id: "local",
            bucket: path.display().to_string(),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            type_id: "memory",
            bucket: "memory".to_string(),
        }
    }

    pub fn gcs(config: &GoogleConfig) -> Result<Self> {
        let builder = GoogleCloudStorageBuilder::new().with_bucket_name(config.bucket.clone());
        let builder = match &config.key_file {
            // Falls back to application default credentials.
            KeyFile::WorkloadIdentity => builder,
            KeyFile::Path(path) => {
                builder.with_service_account_path(path.to_string_lossy().to_string())
            }
            KeyFile::InlineJson(json) => builder.with_service_account_key(json.clone()),
            KeyFile::Json(map) => builder.with_service_account_key(serde_json::to_string(map)?),
        };
        let store = builder.build().map_err(|e| {
            BulkerError::Config(format!("invalid GCS staging for {}: {}", config.bucket, e))
        })?;
        Ok(Self {
            store: Arc::new(store),
            type_id: "gcs",
            bucket: config.bucket.clone(),
        })
    }

    /// Underlying store, for reading staged files back.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.type_id).bucket(self.bucket.clone())
    }
}

#[async_trait]
impl FileStorage for ObjectStoreStorage {
    fn type_id(&self) -> &str {
        self.type_id
    }

    async fn upload(&self, name: &str, data: Bytes) -> Result<()> {
        let size = data.len();
        self.store
            .put(&Path::from(name), data)
            .await
            .map_err(|e| BulkerError::destination(ErrorKind::Upload, self.payload(), e))?;
        debug!(bucket = %self.bucket, "Uploaded {} ({} bytes)", name, size);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.store.delete(&Path::from(name)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(BulkerError::destination(
                ErrorKind::Delete,
                self.payload(),
                e,
            )),
        }
    }
}
