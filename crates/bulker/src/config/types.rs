//! Configuration type definitions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::BulkerError;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Named destinations.
    pub destinations: BTreeMap<String, DestinationConfig>,

    /// Object storage for staged batch files.
    #[serde(default)]
    pub staging: Option<StagingConfig>,

    /// Defaults applied to every stream.
    #[serde(default)]
    pub defaults: LoadDefaults,
}

/// One destination, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DestinationConfig {
    Postgres(DataSourceConfig),
    Mysql(DataSourceConfig),
    Memory(MemoryConfig),
    Mixpanel(MixpanelConfig),
}

impl DestinationConfig {
    /// Destination type id.
    pub fn type_id(&self) -> &'static str {
        match self {
            DestinationConfig::Postgres(_) => "postgres",
            DestinationConfig::Mysql(_) => "mysql",
            DestinationConfig::Memory(_) => "memory",
            DestinationConfig::Mixpanel(_) => "mixpanel",
        }
    }
}

/// Connection settings for SQL destinations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Database host.
    #[serde(default)]
    pub host: String,

    /// Database port. Driver default when unset.
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Schema new tables are created in. Driver default when empty.
    #[serde(default, alias = "schema")]
    pub default_schema: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// SSL mode: disable, require, verify-ca, verify-full (default: require).
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// Maximum pooled connections (default: 10).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Extra driver parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl DataSourceConfig {
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }

    /// Configured schema, or `default` when none is set.
    pub fn schema_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.default_schema.is_empty() {
            default
        } else {
            &self.default_schema
        }
    }
}

/// In-process destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_schema")]
    pub schema: String,

    /// DDL joins the surrounding transaction (default: true). When false,
    /// DDL commits the open transaction first, as on MySQL.
    #[serde(default = "default_true")]
    pub transactional: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            schema: default_memory_schema(),
            transactional: true,
        }
    }
}

/// Mixpanel import API destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixpanelConfig {
    pub project_id: String,

    pub service_account_username: String,

    #[serde(default)]
    pub service_account_password: String,

    /// API base URL (default: https://api.mixpanel.com).
    #[serde(default = "default_mixpanel_url")]
    pub api_url: String,

    /// Per-request timeout in seconds (default: 5).
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

/// Staging storage for batch files.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StagingConfig {
    Local { path: PathBuf },
    Memory,
    Gcs(GoogleConfig),
}

impl StagingConfig {
    pub fn type_id(&self) -> &'static str {
        match self {
            StagingConfig::Local { .. } => "local",
            StagingConfig::Memory => "memory",
            StagingConfig::Gcs(_) => "gcs",
        }
    }
}

/// Google Cloud settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub bucket: String,

    #[serde(default)]
    pub project: String,

    /// BigQuery dataset, when used as a warehouse.
    #[serde(default)]
    pub dataset: Option<String>,

    pub key_file: KeyFile,
}

/// Google credentials source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawKeyFile")]
pub enum KeyFile {
    /// Ambient credentials of the running workload.
    WorkloadIdentity,
    /// Path to a service account JSON file.
    Path(PathBuf),
    /// Service account JSON given inline as a string.
    InlineJson(String),
    /// Service account JSON given as a mapping.
    Json(serde_json::Map<String, serde_json::Value>),
}

const WORKLOAD_IDENTITY: &str = "workload_identity";

#[derive(Deserialize)]
#[serde(untagged)]
enum RawKeyFile {
    Text(String),
    Object(serde_json::Map<String, serde_json::Value>),
    Other(serde_json::Value),
}

impl TryFrom<RawKeyFile> for KeyFile {
    type Error = BulkerError;

    fn try_from(raw: RawKeyFile) -> Result<Self, Self::Error> {
        match raw {
            RawKeyFile::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    Err(BulkerError::Config("key_file cannot be empty".into()))
                } else if s == WORKLOAD_IDENTITY {
                    Ok(KeyFile::WorkloadIdentity)
                } else if s.contains('{') {
                    let parsed: serde_json::Value = serde_json::from_str(s).map_err(|e| {
                        BulkerError::Config(format!("key_file is not valid JSON: {}", e))
                    })?;
                    if !parsed.is_object() {
                        return Err(BulkerError::Config(
                            "key_file JSON must be an object".into(),
                        ));
                    }
                    Ok(KeyFile::InlineJson(s.to_string()))
                } else {
                    Ok(KeyFile::Path(PathBuf::from(s)))
                }
            }
            RawKeyFile::Object(map) if map.is_empty() => {
                Err(BulkerError::Config("key_file cannot be empty".into()))
            }
            RawKeyFile::Object(map) => Ok(KeyFile::Json(map)),
            RawKeyFile::Other(value) => Err(BulkerError::Config(format!(
                "key_file must be '{}', a file path, or service account JSON (got {})",
                WORKLOAD_IDENTITY, value
            ))),
        }
    }
}

/// Stream defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadDefaults {
    /// Rows per staged chunk (default: 10000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for LoadDefaults {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_require() -> String {
    "require".to_string()
}

fn default_max_connections() -> usize {
    10
}

fn default_memory_schema() -> String {
    "public".to_string()
}

fn default_true() -> bool {
    true
}

fn default_mixpanel_url() -> String {
    "https://api.mixpanel.com".to_string()
}

fn default_http_timeout() -> u64 {
    5
}

fn default_batch_size() -> usize {
    10_000
}
