//! Destination drivers.
//!
//! Each SQL driver pairs a `Dialect` (statement text) with an adapter that
//! implements [`SqlAdapter`](crate::adapter::SqlAdapter) over its connection
//! pool:
//!
//! - [`postgres`]: PostgreSQL via deadpool-postgres
//! - [`mysql`]: MySQL via mysql_async (feature `mysql`)
//! - [`memory`]: in-process tables for tests and dry runs
//! - [`common`]: shared TLS settings

pub mod common;
pub mod memory;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod postgres;

pub use common::SslMode;
pub use memory::{MemoryAdapter, MemorySession, MEMORY_TYPE_ID};
#[cfg(feature = "mysql")]
pub use mysql::{MysqlAdapter, MysqlDialect, MYSQL_TYPE_ID};
pub use postgres::{PostgresAdapter, PostgresDialect, POSTGRES_TYPE_ID};
