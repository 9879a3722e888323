//! Configuration validation.

use super::{Config, DataSourceConfig, DestinationConfig, GoogleConfig, StagingConfig};
use crate::drivers::common::SslMode;
use crate::error::{BulkerError, Result};

/// Maximum BigQuery dataset name length.
const MAX_DATASET_LENGTH: usize = 1024;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.destinations.is_empty() {
        return Err(BulkerError::Config(
            "at least one destination is required".into(),
        ));
    }

    for (name, destination) in &config.destinations {
        match destination {
            DestinationConfig::Postgres(ds) | DestinationConfig::Mysql(ds) => {
                validate_data_source(name, ds)?;
            }
            DestinationConfig::Memory(memory) => {
                if memory.schema.is_empty() {
                    return Err(BulkerError::Config(format!(
                        "destinations.{}.schema cannot be empty",
                        name
                    )));
                }
            }
            DestinationConfig::Mixpanel(mp) => {
                if mp.project_id.is_empty() {
                    return Err(BulkerError::Config(format!(
                        "destinations.{}.project_id is required",
                        name
                    )));
                }
                if mp.service_account_username.is_empty() {
                    return Err(BulkerError::Config(format!(
                        "destinations.{}.service_account_username is required",
                        name
                    )));
                }
                if !mp.api_url.starts_with("http://") && !mp.api_url.starts_with("https://") {
                    return Err(BulkerError::Config(format!(
                        "destinations.{}.api_url must be an http(s) URL, got '{}'",
                        name, mp.api_url
                    )));
                }
            }
        }
    }

    match &config.staging {
        Some(StagingConfig::Local { path }) if path.as_os_str().is_empty() => {
            return Err(BulkerError::Config("staging.path is required".into()));
        }
        Some(StagingConfig::Gcs(google)) => validate_google(google)?,
        _ => {}
    }

    if config.defaults.batch_size == 0 {
        return Err(BulkerError::Config(
            "defaults.batch_size must be at least 1".into(),
        ));
    }

    Ok(())
}

fn validate_data_source(name: &str, ds: &DataSourceConfig) -> Result<()> {
    if ds.host.is_empty() {
        return Err(BulkerError::Config(format!(
            "destinations.{}.host is required",
            name
        )));
    }
    if ds.database.is_empty() {
        return Err(BulkerError::Config(format!(
            "destinations.{}.database is required",
            name
        )));
    }
    if ds.username.is_empty() {
        return Err(BulkerError::Config(format!(
            "destinations.{}.username is required",
            name
        )));
    }
    if ds.max_connections == 0 {
        return Err(BulkerError::Config(format!(
            "destinations.{}.max_connections must be at least 1",
            name
        )));
    }
    SslMode::parse(&ds.ssl_mode)?;
    Ok(())
}

fn validate_google(google: &GoogleConfig) -> Result<()> {
    if google.bucket.is_empty() {
        return Err(BulkerError::Config("staging.bucket is required".into()));
    }
    if let Some(dataset) = &google.dataset {
        validate_dataset(dataset)?;
    }
    Ok(())
}

/// BigQuery dataset names: letters, digits and underscores, at most 1024
/// characters.
pub fn validate_dataset(dataset: &str) -> Result<()> {
    if dataset.is_empty() {
        return Err(BulkerError::Config("dataset cannot be empty".into()));
    }
    if dataset.len() > MAX_DATASET_LENGTH {
        return Err(BulkerError::Config(format!(
            "dataset name exceeds {} characters",
            MAX_DATASET_LENGTH
        )));
    }
    if !dataset
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(BulkerError::Config(format!(
            "dataset '{}' may only contain letters, numbers and underscores",
            dataset
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyFile;

    fn pg_yaml(extra: &str) -> String {
        format!(
            "destinations:\n  pg:\n    type: postgres\n    host: localhost\n    database: db\n    username: u\n{}",
            extra
        )
    }

    #[test]
    fn test_valid_postgres() {
        assert!(Config::from_yaml(&pg_yaml("")).is_ok());
    }

    #[test]
    fn test_missing_host() {
        let yaml = "destinations:\n  pg:\n    type: postgres\n    database: db\n    username: u\n";
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("destinations.pg.host is required"));
    }

    #[test]
    fn test_invalid_ssl_mode() {
        let err = Config::from_yaml(&pg_yaml("    ssl_mode: maybe\n")).unwrap_err();
        assert!(err.to_string().contains("Invalid ssl_mode"));
    }

    #[test]
    fn test_zero_connections() {
        assert!(Config::from_yaml(&pg_yaml("    max_connections: 0\n")).is_err());
    }

    #[test]
    fn test_empty_destinations() {
        assert!(Config::from_yaml("destinations: {}\n").is_err());
    }

    #[test]
    fn test_mixpanel_requires_project() {
        let yaml = "destinations:\n  mp:\n    type: mixpanel\n    project_id: ''\n    service_account_username: u\n";
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("project_id is required"));
    }

    fn gcs_yaml(key_file: &str) -> String {
        format!(
            "destinations:\n  m:\n    type: memory\nstaging:\n  type: gcs\n  bucket: b\n  key_file: {}\n",
            key_file
        )
    }

    #[test]
    fn test_key_file_variants() {
        let path = Config::from_yaml(&gcs_yaml("/etc/gcp/key.json")).unwrap();
        match path.staging.unwrap() {
            StagingConfig::Gcs(g) => {
                assert_eq!(g.key_file, KeyFile::Path("/etc/gcp/key.json".into()))
            }
            other => panic!("unexpected staging {:?}", other),
        }

        let inline = Config::from_yaml(&gcs_yaml(r#"'{"type": "service_account"}'"#)).unwrap();
        match inline.staging.unwrap() {
            StagingConfig::Gcs(g) => assert!(matches!(g.key_file, KeyFile::InlineJson(_))),
            other => panic!("unexpected staging {:?}", other),
        }

        let mapping = Config::from_yaml(&gcs_yaml(
            "\n    type: service_account\n    project_id: p",
        ))
        .unwrap();
        match mapping.staging.unwrap() {
            StagingConfig::Gcs(g) => match g.key_file {
                KeyFile::Json(map) => assert_eq!(map["project_id"], "p"),
                other => panic!("unexpected key file {:?}", other),
            },
            other => panic!("unexpected staging {:?}", other),
        }
    }

    #[test]
    fn test_key_file_rejects_other_shapes() {
        assert!(Config::from_yaml(&gcs_yaml("42")).is_err());
        assert!(Config::from_yaml(&gcs_yaml("[a, b]")).is_err());
        assert!(Config::from_yaml(&gcs_yaml("''")).is_err());
        assert!(Config::from_yaml(&gcs_yaml("'{not json'")).is_err());
    }

    #[test]
    fn test_dataset_validation() {
        assert!(validate_dataset("events_2024").is_ok());
        assert!(validate_dataset("events-2024").is_err());
        assert!(validate_dataset("").is_err());
        assert!(validate_dataset(&"a".repeat(1025)).is_err());
    }
}
