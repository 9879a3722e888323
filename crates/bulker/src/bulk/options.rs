//! Stream modes, options and reported state.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::{DatePartition, SqlTypeSuggestion};
use crate::error::BulkerError;

/// Rows staged per flush in the staging modes.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// How a stream lands its rows. Fixed for the lifetime of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkMode {
    /// Every object is written as it arrives.
    Stream,
    /// Objects are buffered and written in one transaction on completion.
    Batch,
    /// Rows are staged and swapped in for the whole table on completion.
    ReplaceTable,
    /// Rows are staged and replace one partition of the table on completion.
    ReplacePartition,
}

impl BulkMode {
    pub const ALL: [BulkMode; 4] = [
        BulkMode::Stream,
        BulkMode::Batch,
        BulkMode::ReplaceTable,
        BulkMode::ReplacePartition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BulkMode::Stream => "stream",
            BulkMode::Batch => "batch",
            BulkMode::ReplaceTable => "replace_table",
            BulkMode::ReplacePartition => "replace_partition",
        }
    }
}

impl fmt::Display for BulkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BulkMode {
    type Err = BulkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        BulkMode::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| {
                BulkerError::Validation(format!(
                    "unknown bulk mode '{}'. Valid modes: stream, batch, replace_table, replace_partition",
                    s
                ))
            })
    }
}

/// Per-stream settings.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Primary key fields of the destination table.
    pub primary_keys: BTreeSet<String>,

    /// Upsert on primary key conflicts instead of failing.
    pub merge_rows: bool,

    /// Partition replaced by a ReplacePartition stream.
    pub partition_id: Option<String>,

    /// Time partition of the batch; its bucket doubles as the partition id.
    pub time_partition: Option<DatePartition>,

    /// SQL types forced for named fields.
    pub column_types: HashMap<String, SqlTypeSuggestion>,

    /// Rows staged per flush.
    pub batch_size: usize,

    /// Cancels in-flight destination calls.
    pub cancel: CancellationToken,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            primary_keys: BTreeSet::new(),
            merge_rows: false,
            partition_id: None,
            time_partition: None,
            column_types: HashMap::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: CancellationToken::new(),
        }
    }
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primary_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_merge_rows(mut self, merge: bool) -> Self {
        self.merge_rows = merge;
        self
    }

    pub fn with_partition_id(mut self, id: impl Into<String>) -> Self {
        self.partition_id = Some(id.into());
        self
    }

    pub fn with_time_partition(mut self, partition: DatePartition) -> Self {
        self.time_partition = Some(partition);
        self
    }

    pub fn with_column_type(mut self, field: impl Into<String>, suggestion: SqlTypeSuggestion) -> Self {
        self.column_types.insert(field.into(), suggestion);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Explicit partition id, else the bucket of the time partition.
    pub fn effective_partition_id(&self) -> Option<String> {
        self.partition_id
            .clone()
            .or_else(|| self.time_partition.as_ref().map(DatePartition::bucket))
    }
}

/// Lifecycle status of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    #[default]
    Active,
    Completed,
    Aborted,
    Failed,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamStatus::Active => "active",
            StreamStatus::Completed => "completed",
            StreamStatus::Aborted => "aborted",
            StreamStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a stream has done so far.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub status: StreamStatus,

    /// Objects accepted by `consume`.
    pub processed_rows: u64,

    /// Rows durably written to the destination.
    pub successful_rows: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl State {
    pub fn set_error(&mut self, error: &BulkerError) {
        self.last_error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Granularity;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_mode_parse_accepts_dashes() {
        assert_eq!("replace-table".parse::<BulkMode>().unwrap(), BulkMode::ReplaceTable);
        assert_eq!("Batch".parse::<BulkMode>().unwrap(), BulkMode::Batch);
        assert!("upsert".parse::<BulkMode>().is_err());
        for mode in BulkMode::ALL {
            assert_eq!(mode.to_string().parse::<BulkMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_partition_id_falls_back_to_time_partition() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let options = StreamOptions::new()
            .with_time_partition(DatePartition::new("ts", ts, Granularity::Day));
        assert_eq!(options.effective_partition_id().as_deref(), Some("20240309"));

        let explicit = options.with_partition_id("p1");
        assert_eq!(explicit.effective_partition_id().as_deref(), Some("p1"));
        assert_eq!(StreamOptions::new().effective_partition_id(), None);
    }

    #[test]
    fn test_state_serializes_compactly() {
        let state = State {
            status: StreamStatus::Completed,
            processed_rows: 2,
            successful_rows: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "completed", "processed_rows": 2, "successful_rows": 2})
        );
    }
}
