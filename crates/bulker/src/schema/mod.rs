//! Schema inference and reconciliation.
//!
//! Objects are flattened and typed by [`TypeResolver`], merged into a
//! [`BatchHeader`](crate::core::BatchHeader), mapped to a desired
//! [`Table`](crate::core::Table) and converged against the live table with
//! [`ensure_table`].

pub mod flatten;
pub mod infer;
pub mod mapping;
pub mod reconcile;

pub use flatten::flatten;
pub use infer::{
    infer_schema, resolve_fields, value_type, InferredSchema, ProcessedObject, SchemaDiagnostic,
    TypeResolver, SQL_TYPE_HINT_PREFIX,
};
pub use mapping::{apply_column_types, map_table};
pub use reconcile::{apply, ensure_table, reconcile};
