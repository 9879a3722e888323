//! Core data model shared by inference, adapters and bulk streams.
//!
//! - [`data_type`]: generic types and their widening lattice
//! - [`field`]: per-field type occurrences with a memoized join
//! - [`batch_header`]: field collections and the per-batch schema
//! - [`table`]: table snapshots and the additive diff
//! - [`value`]: input objects and typed row values

pub mod batch_header;
pub mod column;
pub mod data_type;
pub mod field;
pub mod identifier;
pub mod partition;
pub mod table;
pub mod value;

pub use batch_header::{BatchHeader, Fields};
pub use column::{SqlColumn, SqlTypeSuggestion};
pub use data_type::DataType;
pub use field::{Field, Resolution};
pub use partition::{DatePartition, Granularity};
pub use table::{build_constraint_name, Columns, Table};
pub use value::{parse_timestamp, Object, SqlValue};
