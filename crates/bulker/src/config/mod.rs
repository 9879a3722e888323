//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{BulkerError, Result};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Look up a destination by name.
    pub fn destination(&self, name: &str) -> Result<&DestinationConfig> {
        self.destinations.get(name).ok_or_else(|| {
            BulkerError::Config(format!(
                "unknown destination '{}'. Configured: {}",
                name,
                self.destinations
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }
}

impl DataSourceConfig {
    /// Build a connection string for tokio-postgres.
    pub fn pg_connection_string(&self) -> String {
        let port = self.port_or(5432).to_string();
        let mut pairs = vec![
            ("host", self.host.as_str()),
            ("port", port.as_str()),
            ("dbname", self.database.as_str()),
            ("user", self.username.as_str()),
            ("password", self.password.as_str()),
        ];
        for (key, value) in &self.parameters {
            pairs.push((key.as_str(), value.as_str()));
        }
        pairs
            .iter()
            .map(|(key, value)| format!("{}='{}'", key, escape_conn_value(value)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Escape a value for a single-quoted libpq keyword/value string.
fn escape_conn_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
