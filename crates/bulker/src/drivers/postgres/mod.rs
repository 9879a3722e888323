//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: SQL syntax for PostgreSQL
//! - [`PostgresAdapter`]: destination adapter over deadpool-postgres

mod adapter;
mod dialect;

pub use adapter::{PostgresAdapter, PostgresSession, POSTGRES_TYPE_ID};
pub use dialect::{postgres_type_mapping, PostgresDialect};
