//! Field collections and the per-batch schema header.

use std::collections::HashMap;

use super::field::Field;
use super::partition::DatePartition;

/// Field name to [`Field`]. Iteration order is not meaningful; use
/// [`Fields::header`] for a stable listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(HashMap<String, Field>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.0.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, field: Field) -> Option<Field> {
        self.0.insert(name.into(), field)
    }

    pub fn remove(&mut self, name: &str) -> Option<Field> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Field)> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Field)> {
        self.0.iter_mut()
    }

    /// Merge every field of `other` into this collection: existing fields
    /// absorb the other's occurrences, new fields are copied.
    pub fn merge(&mut self, other: &Fields) {
        for (name, field) in &other.0 {
            match self.0.get_mut(name) {
                Some(current) => current.merge(field),
                None => {
                    self.0.insert(name.clone(), field.clone());
                }
            }
        }
    }

    /// For fields present in both, replace occurrences and resolved type with
    /// the other's. Fields only in `other` are ignored.
    pub fn override_types(&mut self, other: &Fields) {
        for (name, field) in &other.0 {
            if let Some(current) = self.0.get_mut(name) {
                current.override_type(field);
            }
        }
    }

    /// Copy fields of `other` whose names are absent here. Existing fields
    /// are left untouched.
    pub fn add(&mut self, other: &Fields) {
        for (name, field) in &other.0 {
            self.0
                .entry(name.clone())
                .or_insert_with(|| field.clone());
        }
    }

    /// Field names in lexicographic order.
    pub fn header(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.keys().cloned().collect();
        names.sort();
        names
    }
}

impl FromIterator<(String, Field)> for Fields {
    fn from_iter<T: IntoIterator<Item = (String, Field)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Fields {
    type Item = (&'a String, &'a Field);
    type IntoIter = std::collections::hash_map::Iter<'a, String, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Schema inferred from one batch of objects destined for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchHeader {
    pub table_name: String,
    pub fields: Fields,
    pub partition: Option<DatePartition>,
}

impl BatchHeader {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Default::default()
        }
    }

    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    /// True when at least one field was inferred.
    pub fn exists(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Merge another header's fields. The first partition seen is kept.
    pub fn merge(&mut self, other: &BatchHeader) {
        self.fields.merge(&other.fields);
        if self.partition.is_none() {
            self.partition = other.partition.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;

    fn fields(entries: &[(&str, DataType)]) -> Fields {
        entries
            .iter()
            .map(|(n, t)| (n.to_string(), Field::new(*t)))
            .collect()
    }

    #[test]
    fn test_merge_joins_existing_and_copies_new() {
        let mut f = fields(&[("a", DataType::Int64)]);
        f.merge(&fields(&[("a", DataType::Float64), ("b", DataType::Bool)]));
        assert_eq!(f.get("a").unwrap().resolved_type(), DataType::Float64);
        assert_eq!(f.get("b").unwrap().resolved_type(), DataType::Bool);
    }

    #[test]
    fn test_add_keeps_existing_types() {
        let mut f = fields(&[("a", DataType::Int64)]);
        let other = fields(&[("a", DataType::String), ("b", DataType::Bool)]);

        let mut added = f.clone();
        added.add(&other);
        assert_eq!(added.get("a").unwrap().resolved_type(), DataType::Int64);
        assert_eq!(added.get("b").unwrap().resolved_type(), DataType::Bool);

        f.merge(&other);
        assert_eq!(f.get("a").unwrap().resolved_type(), DataType::String);
    }

    #[test]
    fn test_override_types_only_touches_shared_fields() {
        let mut f = fields(&[("a", DataType::Int64), ("b", DataType::Bool)]);
        f.override_types(&fields(&[("a", DataType::Timestamp), ("c", DataType::Json)]));
        assert_eq!(f.get("a").unwrap().resolved_type(), DataType::Timestamp);
        assert_eq!(f.get("b").unwrap().resolved_type(), DataType::Bool);
        assert!(!f.contains("c"));
    }

    #[test]
    fn test_clone_is_independent() {
        let original = fields(&[("a", DataType::Int64)]);
        let mut copy = original.clone();
        copy.merge(&fields(&[("a", DataType::String), ("z", DataType::Bool)]));
        assert_eq!(original.get("a").unwrap().resolved_type(), DataType::Int64);
        assert!(!original.contains("z"));
        assert_eq!(original.get("a").unwrap().occurrences().len(), 1);
    }

    #[test]
    fn test_header_is_sorted() {
        let f = fields(&[
            ("zeta", DataType::Bool),
            ("alpha", DataType::Bool),
            ("mid", DataType::Bool),
        ]);
        assert_eq!(f.header(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_batch_header_exists() {
        assert!(!BatchHeader::new("events").exists());
        let header = BatchHeader::new("events").with_fields(fields(&[("a", DataType::Bool)]));
        assert!(header.exists());
    }
}
