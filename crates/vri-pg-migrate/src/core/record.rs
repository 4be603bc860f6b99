//! Records flowing through a migration unit.

use std::collections::HashMap;

use super::value::SqlValue;

/// One row read from a source, with the source's field order preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRecord {
    fields: Vec<(String, SqlValue)>,
    /// 1-based line (files) or row ordinal (queries).
    pub line: u64,
}

impl SourceRecord {
    pub fn new(line: u64) -> Self {
        Self {
            fields: Vec::new(),
            line,
        }
    }

    /// Build a record from `(name, value)` pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<SqlValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut record = Self::default();
        for (k, v) in pairs {
            record.push(k, v);
        }
        record
    }

    /// Append a field, replacing an existing one with the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Field value; absent fields read as NULL.
    pub fn get(&self, name: &str) -> &SqlValue {
        static NULL: SqlValue = SqlValue::Null;
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .unwrap_or(&NULL)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A mapped row keyed by destination column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRecord {
    values: HashMap<String, SqlValue>,
}

impl NormalizedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    /// Text value of a column, `None` for NULL, absent or non-text values.
    pub fn text(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(SqlValue::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn remove(&mut self, column: &str) -> Option<SqlValue> {
        self.values.remove(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Columns that are not scratch values.
    pub fn loadable_columns(&self) -> impl Iterator<Item = &str> {
        self.columns().filter(|c| !is_scratch_column(c))
    }
}

/// Scratch columns (leading `_`) travel with a row through deduplication
/// and are dropped before loading.
pub fn is_scratch_column(column: &str) -> bool {
    column.starts_with('_')
}
