//! Time partition descriptors.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BulkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hour,
    #[default]
    Day,
    Month,
    Year,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Month => "month",
            Granularity::Year => "year",
        };
        f.write_str(s)
    }
}

impl FromStr for Granularity {
    type Err = BulkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "month" => Ok(Granularity::Month),
            "year" => Ok(Granularity::Year),
            other => Err(BulkerError::Validation(format!(
                "unknown partition granularity '{}'. Valid values: hour, day, month, year",
                other
            ))),
        }
    }
}

/// A single time partition of a table: the field that holds the timestamp,
/// the partition's point in time and its width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatePartition {
    pub field: String,
    pub value: DateTime<Utc>,
    #[serde(default)]
    pub granularity: Granularity,
}

impl DatePartition {
    pub fn new(field: impl Into<String>, value: DateTime<Utc>, granularity: Granularity) -> Self {
        Self {
            field: field.into(),
            value,
            granularity,
        }
    }

    /// Partition id for the granularity, e.g. `20240102` for a day.
    pub fn bucket(&self) -> String {
        let v = &self.value;
        match self.granularity {
            Granularity::Hour => format!(
                "{:04}{:02}{:02}{:02}",
                v.year(),
                v.month(),
                v.day(),
                v.hour()
            ),
            Granularity::Day => format!("{:04}{:02}{:02}", v.year(), v.month(), v.day()),
            Granularity::Month => format!("{:04}{:02}", v.year(), v.month()),
            Granularity::Year => format!("{:04}", v.year()),
        }
    }
}
