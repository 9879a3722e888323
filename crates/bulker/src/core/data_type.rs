//! Generic data types and the widening lattice used by schema inference.
//!
//! The types form a tree rooted at [`DataType::String`]:
//!
//! ```text
//!            String
//!          /   |    \
//!    Float64 Timestamp Json
//!       |
//!     Int64
//!       |
//!      Bool
//! ```
//!
//! [`DataType::Unknown`] sits below every type and is the identity of
//! [`DataType::join`]. Joining two types yields their lowest common ancestor,
//! so every value observed for a field can be represented by the joined type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BulkerError;

/// Destination-independent column type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    Unknown,
    Bool,
    Int64,
    Float64,
    Timestamp,
    Json,
    String,
}

impl DataType {
    /// Every variant, in declaration order.
    pub const ALL: [DataType; 7] = [
        DataType::Unknown,
        DataType::Bool,
        DataType::Int64,
        DataType::Float64,
        DataType::Timestamp,
        DataType::Json,
        DataType::String,
    ];

    /// Immediate supertype. `String` is the root, `Unknown` has no parent.
    pub fn parent(self) -> Option<DataType> {
        match self {
            DataType::Bool => Some(DataType::Int64),
            DataType::Int64 => Some(DataType::Float64),
            DataType::Float64 | DataType::Timestamp | DataType::Json => Some(DataType::String),
            DataType::String | DataType::Unknown => None,
        }
    }

    fn depth(self) -> usize {
        let mut depth = 0;
        let mut current = self;
        while let Some(parent) = current.parent() {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Least common supertype of `self` and `other`.
    pub fn join(self, other: DataType) -> DataType {
        match (self, other) {
            (DataType::Unknown, t) | (t, DataType::Unknown) => t,
            (a, b) if a == b => a,
            (mut a, mut b) => {
                let (mut da, mut db) = (a.depth(), b.depth());
                while da > db {
                    a = a.parent().unwrap_or(DataType::String);
                    da -= 1;
                }
                while db > da {
                    b = b.parent().unwrap_or(DataType::String);
                    db -= 1;
                }
                while a != b {
                    a = a.parent().unwrap_or(DataType::String);
                    b = b.parent().unwrap_or(DataType::String);
                }
                a
            }
        }
    }

    /// Join of every type in `types`; `None` when the iterator is empty.
    pub fn join_all<I>(types: I) -> Option<DataType>
    where
        I: IntoIterator<Item = DataType>,
    {
        types.into_iter().reduce(DataType::join)
    }

    /// True when a column of type `self` can hold every value of `other`.
    pub fn covers(self, other: DataType) -> bool {
        self.join(other) == self
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Unknown => "unknown",
            DataType::Bool => "bool",
            DataType::Int64 => "int64",
            DataType::Float64 => "float64",
            DataType::Timestamp => "timestamp",
            DataType::Json => "json",
            DataType::String => "string",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = BulkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unknown" => Ok(DataType::Unknown),
            "bool" | "boolean" => Ok(DataType::Bool),
            "int" | "int64" | "integer" => Ok(DataType::Int64),
            "float" | "float64" | "double" => Ok(DataType::Float64),
            "timestamp" => Ok(DataType::Timestamp),
            "json" => Ok(DataType::Json),
            "string" | "text" => Ok(DataType::String),
            other => Err(BulkerError::Validation(format!(
                "unknown data type '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DataType::*;

    #[test]
    fn test_join_is_commutative() {
        for a in DataType::ALL {
            for b in DataType::ALL {
                assert_eq!(a.join(b), b.join(a), "join({a}, {b})");
            }
        }
    }

    #[test]
    fn test_join_is_associative() {
        for a in DataType::ALL {
            for b in DataType::ALL {
                for c in DataType::ALL {
                    assert_eq!(a.join(b).join(c), a.join(b.join(c)), "{a} {b} {c}");
                }
            }
        }
    }

    #[test]
    fn test_join_is_idempotent() {
        for a in DataType::ALL {
            assert_eq!(a.join(a), a);
        }
    }

    #[test]
    fn test_string_absorbs_and_unknown_is_identity() {
        for a in DataType::ALL {
            assert_eq!(a.join(String), String);
            assert_eq!(a.join(Unknown), a);
        }
    }

    #[test]
    fn test_join_follows_hierarchy() {
        assert_eq!(Bool.join(Int64), Int64);
        assert_eq!(Bool.join(Float64), Float64);
        assert_eq!(Int64.join(Float64), Float64);
        assert_eq!(Int64.join(Timestamp), String);
        assert_eq!(Json.join(Bool), String);
        assert_eq!(Timestamp.join(Json), String);
    }

    #[test]
    fn test_join_all() {
        assert_eq!(DataType::join_all([]), None);
        assert_eq!(DataType::join_all([Bool, Int64, Bool]), Some(Int64));
        assert_eq!(DataType::join_all([Unknown]), Some(Unknown));
    }

    #[test]
    fn test_covers() {
        assert!(Float64.covers(Bool));
        assert!(String.covers(Json));
        assert!(!Int64.covers(Float64));
        assert!(!Timestamp.covers(Int64));
    }

    #[test]
    fn test_parse_roundtrip_names() {
        for t in DataType::ALL {
            assert_eq!(t.as_str().parse::<DataType>().unwrap(), t);
        }
        assert!("decimal".parse::<DataType>().is_err());
    }
}
