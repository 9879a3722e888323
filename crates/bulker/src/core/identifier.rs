//! Identifier validation and quoting.
//!
//! Table, schema and column names come from untyped input and cannot be
//! bound as statement parameters. They are validated when a table is mapped
//! and quoted by the destination dialect when SQL is generated.

use crate::error::{BulkerError, Result};

/// Maximum identifier length (PostgreSQL: 63 bytes, MySQL: 64 characters).
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Reject identifiers no destination can hold.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BulkerError::Validation(
            "identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(BulkerError::Validation(format!(
            "identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(BulkerError::Validation(format!(
            "identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// `base` followed by `suffix`, with `base` shortened so the result fits
/// [`MAX_IDENTIFIER_LENGTH`].
pub fn derived_name(base: &str, suffix: &str) -> String {
    let budget = MAX_IDENTIFIER_LENGTH.saturating_sub(suffix.len());
    let mut end = base.len().min(budget);
    while !base.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &base[..end], suffix)
}

/// Quote with double quotes, doubling embedded quotes.
pub fn quote_double(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote with backticks, doubling embedded backticks.
pub fn quote_backtick(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
