//! A single inferred field: the set of types observed for it and the
//! memoized join of that set.

use std::collections::BTreeSet;

use super::column::{SqlColumn, SqlTypeSuggestion};
use super::data_type::DataType;

/// Outcome of resolving a field's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub data_type: DataType,
    /// Set when the field violated an internal invariant and the type fell
    /// back to `Unknown`.
    pub diagnostic: Option<String>,
}

const EMPTY_OCCURRENCES: &str = "field has no type occurrences";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Field {
    cached: Option<DataType>,
    occurrences: BTreeSet<DataType>,
    suggestion: Option<SqlTypeSuggestion>,
}

impl Field {
    pub fn new(data_type: DataType) -> Self {
        Self {
            cached: Some(data_type),
            occurrences: BTreeSet::from([data_type]),
            suggestion: None,
        }
    }

    pub fn with_sql_type(data_type: DataType, suggestion: SqlTypeSuggestion) -> Self {
        Self {
            suggestion: Some(suggestion),
            ..Self::new(data_type)
        }
    }

    /// Build a field from raw occurrences without a cached type. An empty
    /// iterator produces a field that resolves to `Unknown` with a diagnostic.
    pub fn from_occurrences<I>(types: I) -> Self
    where
        I: IntoIterator<Item = DataType>,
    {
        Self {
            cached: None,
            occurrences: types.into_iter().collect(),
            suggestion: None,
        }
    }

    pub fn occurrences(&self) -> &BTreeSet<DataType> {
        &self.occurrences
    }

    pub fn suggestion(&self) -> Option<&SqlTypeSuggestion> {
        self.suggestion.as_ref()
    }

    pub fn set_suggestion(&mut self, suggestion: SqlTypeSuggestion) {
        self.suggestion = Some(suggestion);
    }

    /// True when the resolved type is memoized.
    pub fn is_resolved(&self) -> bool {
        self.cached.is_some()
    }

    fn compute(&self) -> Resolution {
        match DataType::join_all(self.occurrences.iter().copied()) {
            Some(data_type) => Resolution {
                data_type,
                diagnostic: None,
            },
            None => Resolution {
                data_type: DataType::Unknown,
                diagnostic: Some(EMPTY_OCCURRENCES.to_string()),
            },
        }
    }

    /// Resolve and memoize the type.
    pub fn resolve(&mut self) -> Resolution {
        if let Some(data_type) = self.cached {
            return Resolution {
                data_type,
                diagnostic: None,
            };
        }
        let resolution = self.compute();
        if resolution.diagnostic.is_none() {
            self.cached = Some(resolution.data_type);
        }
        resolution
    }

    /// Resolved type without memoizing.
    pub fn resolved_type(&self) -> DataType {
        match self.cached {
            Some(data_type) => data_type,
            None => self.compute().data_type,
        }
    }

    /// Add the other field's occurrences. The memoized type is dropped only
    /// when a new occurrence was added.
    pub fn merge(&mut self, other: &Field) {
        for t in &other.occurrences {
            if self.occurrences.insert(*t) {
                self.cached = None;
            }
        }
    }

    /// Replace occurrences and memoized type with the other field's.
    pub(crate) fn override_type(&mut self, other: &Field) {
        self.occurrences = other.occurrences.clone();
        self.cached = other.cached;
    }

    /// User-suggested SQL type for a destination.
    pub fn suggested_sql_type(&self, destination: &str) -> Option<SqlColumn> {
        self.suggestion
            .as_ref()
            .and_then(|s| s.for_destination(destination))
    }
}
