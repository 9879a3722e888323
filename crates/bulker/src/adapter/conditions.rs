//! WHERE conditions for maintenance statements.

use serde_json::Value;

/// Column holding the partition id in ReplacePartition loads.
pub const PARTITION_ID_COLUMN: &str = "__partition_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Joiner {
    #[default]
    And,
    Or,
}

impl Joiner {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Joiner::And => " AND ",
            Joiner::Or => " OR ",
        }
    }
}

/// Comparison used by a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clause {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
    IsNotNull,
}

impl Clause {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Clause::Eq => "=",
            Clause::NotEq => "!=",
            Clause::Gt => ">",
            Clause::Gte => ">=",
            Clause::Lt => "<",
            Clause::Lte => "<=",
            Clause::IsNull => "IS NULL",
            Clause::IsNotNull => "IS NOT NULL",
        }
    }

    /// True when the clause takes a value operand.
    pub fn takes_value(&self) -> bool {
        !matches!(self, Clause::IsNull | Clause::IsNotNull)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhenCondition {
    pub field: String,
    pub clause: Clause,
    pub value: Value,
}

/// Conditions joined by a single joiner. Empty conditions match every row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WhenConditions {
    pub conditions: Vec<WhenCondition>,
    pub joiner: Joiner,
}

impl WhenConditions {
    pub fn new(joiner: Joiner) -> Self {
        Self {
            conditions: Vec::new(),
            joiner,
        }
    }

    /// Single equality condition.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::default().add(field, Clause::Eq, value)
    }

    pub fn add(mut self, field: impl Into<String>, clause: Clause, value: impl Into<Value>) -> Self {
        self.conditions.push(WhenCondition {
            field: field.into(),
            clause,
            value: value.into(),
        });
        self
    }

    /// Rows of one ReplacePartition partition.
    pub fn by_partition_id(partition_id: &str) -> Self {
        Self::eq(PARTITION_ID_COLUMN, partition_id)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate against a row held in memory. SQL three-valued logic is
    /// approximated: comparisons with NULL never match.
    pub fn matches(&self, row: &serde_json::Map<String, Value>) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        let mut results = self.conditions.iter().map(|c| c.matches(row));
        match self.joiner {
            Joiner::And => results.all(|m| m),
            Joiner::Or => results.any(|m| m),
        }
    }
}

impl WhenCondition {
    fn matches(&self, row: &serde_json::Map<String, Value>) -> bool {
        let actual = row.get(&self.field).unwrap_or(&Value::Null);
        match self.clause {
            Clause::IsNull => actual.is_null(),
            Clause::IsNotNull => !actual.is_null(),
            _ if actual.is_null() || self.value.is_null() => false,
            clause => {
                let ordering = match (actual.as_f64(), self.value.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => Some(value_text(actual).cmp(&value_text(&self.value))),
                };
                let Some(ordering) = ordering else {
                    return false;
                };
                match clause {
                    Clause::Eq => ordering.is_eq(),
                    Clause::NotEq => ordering.is_ne(),
                    Clause::Gt => ordering.is_gt(),
                    Clause::Gte => ordering.is_ge(),
                    Clause::Lt => ordering.is_lt(),
                    Clause::Lte => ordering.is_le(),
                    Clause::IsNull | Clause::IsNotNull => false,
                }
            }
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
