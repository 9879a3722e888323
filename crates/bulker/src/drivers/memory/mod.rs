//! In-memory destination driver.

pub mod adapter;

pub use adapter::{memory_type_mapping, MemoryAdapter, MemorySession, MEMORY_TYPE_ID};
