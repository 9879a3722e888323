//! Builds bulkers from destination configs.
//!
//! Destinations are created explicitly from configuration; there is no
//! global registry. Drivers behind Cargo features fail with a configuration
//! error when the feature is disabled.

use tracing::info;

use crate::api::MixpanelBulker;
use crate::bulk::{Bulker, SqlBulker};
use crate::config::DestinationConfig;
use crate::drivers::{MemoryAdapter, PostgresAdapter};
use crate::error::Result;

/// Connect to the destination `name` and return its bulker.
pub async fn create_bulker(name: &str, config: &DestinationConfig) -> Result<Box<dyn Bulker>> {
    let bulker: Box<dyn Bulker> = match config {
        DestinationConfig::Postgres(ds) => {
            Box::new(SqlBulker::new(PostgresAdapter::connect(ds).await?))
        }
        DestinationConfig::Mysql(ds) => mysql_bulker(ds).await?,
        DestinationConfig::Memory(memory) => Box::new(SqlBulker::new(MemoryAdapter::new(memory))),
        DestinationConfig::Mixpanel(mixpanel) => Box::new(MixpanelBulker::new(mixpanel)?),
    };
    info!("Destination {} ready ({})", name, bulker.type_id());
    Ok(bulker)
}

#[cfg(feature = "mysql")]
async fn mysql_bulker(ds: &crate::config::DataSourceConfig) -> Result<Box<dyn Bulker>> {
    use crate::drivers::MysqlAdapter;
    Ok(Box::new(SqlBulker::new(MysqlAdapter::connect(ds).await?)))
}

#[cfg(not(feature = "mysql"))]
async fn mysql_bulker(_ds: &crate::config::DataSourceConfig) -> Result<Box<dyn Bulker>> {
    Err(crate::error::BulkerError::Config(
        "MySQL support requires the 'mysql' feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::{BulkMode, StreamOptions};
    use crate::config::{Config, MemoryConfig};
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_destination() {
        let config = DestinationConfig::Memory(MemoryConfig::default());
        let bulker = create_bulker("scratch", &config).await.unwrap();
        assert_eq!(bulker.type_id(), "memory");

        let mut stream = bulker
            .create_stream("s1", "events", BulkMode::Batch, StreamOptions::new())
            .await
            .unwrap();
        let object = match json!({"id": 1}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        stream.consume(object).await.unwrap();
        assert_eq!(stream.complete().await.unwrap().successful_rows, 1);
    }

    #[tokio::test]
    async fn test_mixpanel_destination_is_batch_only() {
        let config = Config::from_yaml(
            r#"
destinations:
  mp:
    type: mixpanel
    project_id: "1"
    service_account_username: svc
"#,
        )
        .unwrap();
        let bulker = create_bulker("mp", config.destination("mp").unwrap())
            .await
            .unwrap();
        assert_eq!(bulker.type_id(), "mixpanel");
        assert!(bulker
            .create_stream("s1", "events", BulkMode::Stream, StreamOptions::new())
            .await
            .is_err());
    }

    #[cfg(not(feature = "mysql"))]
    #[tokio::test]
    async fn test_mysql_without_feature_is_a_config_error() {
        let config = Config::from_yaml(
            r#"
destinations:
  my:
    type: mysql
    host: localhost
    database: app
    username: u
"#,
        )
        .unwrap();
        let err = create_bulker("my", config.destination("my").unwrap())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, crate::error::BulkerError::Config(_)));
    }
}
