//! Row values: the JSON objects the loader consumes and their typed form
//! once a destination column type is known.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

use super::data_type::DataType;

/// One input record.
pub type Object = serde_json::Map<String, Value>;

/// Naive timestamp layouts accepted besides RFC 3339. Interpreted as UTC.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse a timestamp string. Returns `None` for anything that is not a
/// full date-time.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    // Cheap reject before trying formats.
    let bytes = s.as_bytes();
    if bytes.len() < 19 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// A value converted for a column of a known generic type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    /// Serialized JSON document.
    Json(String),
    Text(String),
}

impl SqlValue {
    /// Convert a JSON value for a column of type `target`. Values are only
    /// ever widened along the type lattice; a value that does not fit the
    /// target is passed through unchanged and left for the destination to
    /// reject.
    pub fn from_json(value: &Value, target: Option<DataType>) -> SqlValue {
        let target = target.unwrap_or(DataType::Unknown);
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => match target {
                DataType::Int64 => SqlValue::Int(i64::from(*b)),
                DataType::Float64 => SqlValue::Float(if *b { 1.0 } else { 0.0 }),
                DataType::String => SqlValue::Text(b.to_string()),
                _ => SqlValue::Bool(*b),
            },
            Value::Number(n) => {
                if target == DataType::String {
                    return SqlValue::Text(n.to_string());
                }
                match (n.as_i64(), target) {
                    (Some(i), DataType::Float64) => SqlValue::Float(i as f64),
                    (Some(i), _) => SqlValue::Int(i),
                    (None, _) => SqlValue::Float(n.as_f64().unwrap_or(f64::NAN)),
                }
            }
            Value::String(s) => match target {
                DataType::Timestamp => match parse_timestamp(s) {
                    Some(ts) => SqlValue::Timestamp(ts),
                    None => SqlValue::Text(s.clone()),
                },
                _ => SqlValue::Text(s.clone()),
            },
            Value::Array(_) | Value::Object(_) => {
                let json = value.to_string();
                if target == DataType::String {
                    SqlValue::Text(json)
                } else {
                    SqlValue::Json(json)
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Textual form used for text-bound statement parameters.
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Float(f) => Some(f.to_string()),
            SqlValue::Timestamp(ts) => Some(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            SqlValue::Json(s) | SqlValue::Text(s) => Some(s.clone()),
        }
    }
}
