//! Utilities shared across SQL drivers.
//!
//! - [`tls`]: TLS configuration for PostgreSQL and MySQL connections

pub mod tls;

pub use tls::SslMode;
