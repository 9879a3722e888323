//! MySQL driver (feature `mysql`).
//!
//! - [`MysqlDialect`]: SQL syntax for MySQL
//! - [`MysqlAdapter`]: destination adapter over mysql_async

mod adapter;
mod dialect;

pub use adapter::{MysqlAdapter, MysqlSession, MYSQL_TYPE_ID};
pub use dialect::{mysql_type_mapping, MysqlDialect, KEY_TEXT_TYPE};
