//! Destination adapter contract for SQL stores.
//!
//! - [`traits`]: `SqlAdapter` and `Session`
//! - [`dialect`]: SQL text generation
//! - [`type_mapping`]: generic to destination type tables
//! - [`conditions`]: WHERE conditions for maintenance statements

pub mod conditions;
pub mod dialect;
pub mod traits;
pub mod type_mapping;

pub use conditions::{Clause, Joiner, WhenCondition, WhenConditions, PARTITION_ID_COLUMN};
pub use dialect::{Dialect, Statement};
pub use traits::{Capabilities, Session, SqlAdapter};
pub use type_mapping::TypeMapping;

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{BulkerError, Result};

/// Run `fut` unless `cancel` fires first.
pub async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BulkerError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellable_passes_result_through() {
        let token = CancellationToken::new();
        let value = cancellable(&token, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancellable_stops_on_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<()> = cancellable(&token, std::future::pending()).await;
        assert!(matches!(result, Err(BulkerError::Cancelled)));
    }
}
