//! # bulker
//!
//! Bulk loading of schemaless JSON objects into SQL and HTTP destinations.
//!
//! The library infers a typed schema from incoming objects, reconciles it
//! with the live destination table, and writes rows through one of four
//! bulk modes:
//!
//! - **Stream**: every object is committed on its own
//! - **Batch**: all objects land in one transaction
//! - **ReplaceTable**: rows are staged, then swapped in for the target
//! - **ReplacePartition**: rows of one partition are replaced atomically
//!
//! ## Example
//!
//! ```rust,no_run
//! use bulker::{create_bulker, BulkMode, Config, StreamOptions};
//!
//! #[tokio::main]
//! async fn main() -> bulker::Result<()> {
//!     let config = Config::load("bulker.yaml")?;
//!     let bulker = create_bulker("warehouse", config.destination("warehouse")?).await?;
//!     let mut stream = bulker
//!         .create_stream("load-1", "events", BulkMode::Batch, StreamOptions::new())
//!         .await?;
//!     let object = serde_json::json!({"id": 1, "event": "signup"});
//!     if let serde_json::Value::Object(map) = object {
//!         stream.consume(map).await?;
//!     }
//!     let state = stream.complete().await?;
//!     println!("Loaded {} rows", state.successful_rows);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod api;
pub mod bulk;
pub mod catalog;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod schema;
pub mod staging;

// Re-exports for convenient access
pub use adapter::{Session, SqlAdapter};
pub use api::MixpanelBulker;
pub use bulk::{BulkMode, Bulker, BulkerStream, SqlBulker, State, StreamOptions, StreamStatus};
pub use catalog::create_bulker;
pub use config::{Config, DestinationConfig};
pub use crate::core::{BatchHeader, DataType, Field, Fields, Object, Table};
pub use error::{BulkerError, Result};
pub use schema::{infer_schema, InferredSchema};
pub use staging::{BatchFile, FileStorage, ObjectStoreStorage};
