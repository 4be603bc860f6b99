//! Key resolution: natural keys from legacy rows to destination surrogate keys.
//!
//! Indexes are built once per unit from the destination tables the unit
//! depends on and are read-only while the unit runs.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::core::{SourceRecord, SqlValue};
use crate::error::{MigrateError, Result};
use crate::normalize::fold_name;
use crate::source::{SourceDescriptor, SourceSet};
use crate::target::TargetWriter;

/// Normalized natural key: parts trimmed, lower-cased, whitespace collapsed,
/// joined by a single space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey(String);

impl NaturalKey {
    /// Key from one or more parts. `None` if any part is NULL or the
    /// combined key is empty.
    pub fn from_parts<'a, I>(parts: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a SqlValue>,
    {
        let mut folded = Vec::new();
        for part in parts {
            match part {
                SqlValue::Null => return None,
                SqlValue::Text(s) => folded.push(fold_name(s)),
                other => folded.push(fold_name(&other.to_string())),
            }
        }
        let key = folded
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if key.is_empty() {
            None
        } else {
            Some(NaturalKey(key))
        }
    }

    pub fn from_text(raw: &str) -> Option<Self> {
        Self::from_parts([&SqlValue::Text(raw.to_string())])
    }

    pub fn from_int(id: i64) -> Self {
        NaturalKey(id.to_string())
    }

    /// Key from named fields of a source record.
    pub fn from_record(record: &SourceRecord, fields: &[String]) -> Option<Self> {
        Self::from_parts(fields.iter().map(|f| record.get(f)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declares an index over a destination table.
#[derive(Debug, Clone)]
pub struct KeyIndexSpec {
    pub name: String,
    pub table: String,
    pub key_columns: Vec<String>,
    pub surrogate_column: String,
}

impl KeyIndexSpec {
    pub fn new(name: &str, table: &str, key_columns: &[&str], surrogate_column: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            key_columns: key_columns.iter().map(|c| c.to_string()).collect(),
            surrogate_column: surrogate_column.to_string(),
        }
    }
}

/// Outcome of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Found(i64),
    NotFound,
}

impl Resolution {
    pub fn id(self) -> Option<i64> {
        match self {
            Resolution::Found(id) => Some(id),
            Resolution::NotFound => None,
        }
    }
}

/// Natural key -> surrogate key.
#[derive(Debug, Clone, Default)]
pub struct KeyIndex {
    name: String,
    entries: HashMap<NaturalKey, i64>,
    shadowed: usize,
}

impl KeyIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build from the current contents of the destination.
    pub async fn build(spec: &KeyIndexSpec, target: &dyn TargetWriter) -> Result<Self> {
        let mut columns = spec.key_columns.clone();
        columns.push(spec.surrogate_column.clone());
        let rows = target.fetch_columns(&spec.table, &columns).await?;

        let mut index = KeyIndex::new(&spec.name);
        let key_len = spec.key_columns.len();
        for row in rows {
            let Some(id) = row.get(key_len).and_then(SqlValue::as_i64) else {
                continue;
            };
            if let Some(key) = NaturalKey::from_parts(&row[..key_len]) {
                index.insert(key, id);
            }
        }

        if index.shadowed > 0 {
            warn!(
                "Index {} on {}: {} rows shadowed by an earlier row with the same key",
                spec.name, spec.table, index.shadowed
            );
        }
        debug!("Built index {} with {} keys", spec.name, index.len());
        Ok(index)
    }

    /// First insert wins.
    pub fn insert(&mut self, key: NaturalKey, id: i64) {
        if self.entries.contains_key(&key) {
            self.shadowed += 1;
        } else {
            self.entries.insert(key, id);
        }
    }

    pub fn resolve(&self, key: &NaturalKey) -> Resolution {
        match self.entries.get(key) {
            Some(id) => Resolution::Found(*id),
            None => Resolution::NotFound,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The indexes available to one unit, by name.
#[derive(Debug, Default)]
pub struct KeyResolver {
    indexes: HashMap<String, KeyIndex>,
}

impl KeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn build(specs: &[KeyIndexSpec], target: &dyn TargetWriter) -> Result<Self> {
        let mut resolver = Self::new();
        for spec in specs {
            let index = KeyIndex::build(spec, target).await?;
            resolver.add(index);
        }
        Ok(resolver)
    }

    pub fn add(&mut self, index: KeyIndex) {
        self.indexes.insert(index.name.clone(), index);
    }

    pub fn index(&self, name: &str) -> Result<&KeyIndex> {
        self.indexes
            .get(name)
            .ok_or_else(|| MigrateError::Config(format!("key index '{}' is not declared", name)))
    }

    /// Resolve a key; a `None` key never matches.
    pub fn resolve(&self, index: &str, key: Option<&NaturalKey>) -> Result<Resolution> {
        let index = self.index(index)?;
        Ok(key.map_or(Resolution::NotFound, |k| index.resolve(k)))
    }

    /// Like [`resolve`](Self::resolve) but turns a miss into `KeyNotFound`.
    pub fn require(&self, index: &str, key: &NaturalKey) -> Result<i64> {
        match self.resolve(index, Some(key))? {
            Resolution::Found(id) => Ok(id),
            Resolution::NotFound => Err(MigrateError::KeyNotFound {
                index: index.to_string(),
                key: key.to_string(),
            }),
        }
    }
}

/// Ordered lookup attempts; the first index that knows its key wins.
#[derive(Debug, Default)]
pub struct FallbackChain {
    attempts: Vec<(String, Option<NaturalKey>)>,
}

impl FallbackChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, index: &str, key: Option<NaturalKey>) -> Self {
        self.attempts.push((index.to_string(), key));
        self
    }

    /// Resolve and report which index matched.
    pub fn resolve_with_source(&self, resolver: &KeyResolver) -> Result<Option<(i64, &str)>> {
        for (index, key) in &self.attempts {
            if let Resolution::Found(id) = resolver.resolve(index, key.as_ref())? {
                return Ok(Some((id, index.as_str())));
            }
        }
        Ok(None)
    }

    pub fn resolve(&self, resolver: &KeyResolver) -> Result<Resolution> {
        Ok(match self.resolve_with_source(resolver)? {
            Some((id, _)) => Resolution::Found(id),
            None => Resolution::NotFound,
        })
    }
}

/// Declares a source-side lookup (a join the legacy query could not do).
#[derive(Debug, Clone)]
pub struct LookupSpec {
    pub name: String,
    pub source: SourceDescriptor,
    pub key_fields: Vec<String>,
}

impl LookupSpec {
    pub fn new(name: &str, source: SourceDescriptor, key_fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            source,
            key_fields: key_fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Natural key -> whole source record.
#[derive(Debug, Default)]
pub struct LookupTable {
    entries: HashMap<NaturalKey, SourceRecord>,
}

impl LookupTable {
    pub async fn build(spec: &LookupSpec, sources: &SourceSet) -> Result<Self> {
        let mut stream = sources.open(&spec.source)?;
        let mut table = LookupTable::default();
        while let Some(item) = stream.recv().await {
            let record = item?;
            if let Some(key) = NaturalKey::from_record(&record, &spec.key_fields) {
                table.entries.entry(key).or_insert(record);
            }
        }
        debug!("Built lookup {} with {} keys", spec.name, table.entries.len());
        Ok(table)
    }

    pub fn get(&self, key: &NaturalKey) -> Option<&SourceRecord> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(name: &str, pairs: &[(&str, i64)]) -> KeyIndex {
        let mut idx = KeyIndex::new(name);
        for (k, id) in pairs {
            idx.insert(NaturalKey::from_text(k).unwrap(), *id);
        }
        idx
    }

    fn resolver() -> KeyResolver {
        let mut r = KeyResolver::new();
        r.add(index("by_dni", &[("40123456", 1)]));
        r.add(index("by_email", &[("ana@unap.edu.pe", 2)]));
        r.add(index("by_name", &[("ana diaz", 3), ("luis rojas", 4)]));
        r
    }

    #[test]
    fn test_natural_key_normalization() {
        let a = NaturalKey::from_parts(&[SqlValue::from("  ANA "), SqlValue::from("Diaz  Perez")]);
        let b = NaturalKey::from_text("ana diaz perez");
        assert_eq!(a, b);
        assert_eq!(NaturalKey::from_parts(&[SqlValue::from("Ana"), SqlValue::Null]), None);
        assert_eq!(NaturalKey::from_text("   "), None);
        assert_eq!(
            NaturalKey::from_parts(&[SqlValue::I32(17)]),
            Some(NaturalKey::from_int(17))
        );
    }

    #[test]
    fn test_first_row_wins() {
        let idx = index("by_name", &[("ana diaz", 3), ("Ana  Diaz", 9)]);
        assert_eq!(idx.len(), 1);
        assert_eq!(
            idx.resolve(&NaturalKey::from_text("ana diaz").unwrap()),
            Resolution::Found(3)
        );
    }

    #[test]
    fn test_fallback_first_match_wins_in_order() {
        let r = resolver();
        let chain = FallbackChain::new()
            .then("by_dni", NaturalKey::from_text("40123456"))
            .then("by_email", NaturalKey::from_text("ana@unap.edu.pe"))
            .then("by_name", NaturalKey::from_text("ana diaz"));
        assert_eq!(chain.resolve_with_source(&r).unwrap(), Some((1, "by_dni")));

        let chain = FallbackChain::new()
            .then("by_dni", None)
            .then("by_email", NaturalKey::from_text("ANA@unap.edu.pe"))
            .then("by_name", NaturalKey::from_text("luis rojas"));
        assert_eq!(chain.resolve_with_source(&r).unwrap(), Some((2, "by_email")));

        let chain = FallbackChain::new()
            .then("by_dni", NaturalKey::from_text("000"))
            .then("by_email", None)
            .then("by_name", NaturalKey::from_text("Luis Rojas"));
        assert_eq!(chain.resolve(&r).unwrap(), Resolution::Found(4));
    }

    #[test]
    fn test_fallback_not_found_only_when_all_fail() {
        let r = resolver();
        let chain = FallbackChain::new()
            .then("by_dni", NaturalKey::from_text("000"))
            .then("by_email", NaturalKey::from_text("nobody@unap.edu.pe"))
            .then("by_name", None);
        assert_eq!(chain.resolve(&r).unwrap(), Resolution::NotFound);
    }

    #[test]
    fn test_unknown_index_is_an_error() {
        let r = resolver();
        assert!(r.resolve("by_code", NaturalKey::from_text("x").as_ref()).is_err());
        let err = r
            .require("by_dni", &NaturalKey::from_text("999").unwrap())
            .unwrap_err();
        assert!(err.is_row_level());
    }
}
