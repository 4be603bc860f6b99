//! Migration units: one destination table, its source, and the mapping
//! between them.

use std::collections::HashMap;
use std::fmt;

use crate::config::MigrationConfig;
use crate::core::{NormalizedRecord, SourceRecord, TableSpec};
use crate::dedup::DedupPolicy;
use crate::error::{MigrateError, Result};
use crate::loader::LoadMode;
use crate::resolve::{KeyIndexSpec, KeyResolver, LookupSpec, LookupTable};
use crate::source::SourceDescriptor;

/// What a mapper made of one source record.
#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome {
    /// Zero or more destination rows.
    Rows(Vec<NormalizedRecord>),
    /// Not loaded; reported with the reason.
    Reject(String),
}

impl MapOutcome {
    pub fn row(record: NormalizedRecord) -> Self {
        MapOutcome::Rows(vec![record])
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        MapOutcome::Reject(reason.into())
    }
}

/// Read-only state a mapper can consult, plus notes about values it changed.
pub struct MapContext<'a> {
    pub resolver: &'a KeyResolver,
    lookups: &'a HashMap<String, LookupTable>,
    pub settings: &'a MigrationConfig,
    notes: Vec<(String, String)>,
}

impl<'a> MapContext<'a> {
    pub fn new(
        resolver: &'a KeyResolver,
        lookups: &'a HashMap<String, LookupTable>,
        settings: &'a MigrationConfig,
    ) -> Self {
        Self {
            resolver,
            lookups,
            settings,
            notes: Vec::new(),
        }
    }

    pub fn lookup(&self, name: &str) -> Result<&LookupTable> {
        self.lookups
            .get(name)
            .ok_or_else(|| MigrateError::Config(format!("unknown lookup: {}", name)))
    }

    /// Record that the current row is loaded with a synthesized value.
    pub fn note_modified(&mut self, reason: &str, value: impl Into<String>) {
        self.notes.push((reason.to_string(), value.into()));
    }

    pub(crate) fn take_notes(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.notes)
    }
}

/// Maps one source record to destination rows.
///
/// Row-level errors (`KeyNotFound`) reject the record as an unmapped
/// reference; any other error fails the unit.
pub trait RecordMapper: Send {
    fn map(&mut self, record: &SourceRecord, ctx: &mut MapContext<'_>) -> Result<MapOutcome>;
}

impl<F> RecordMapper for F
where
    F: FnMut(&SourceRecord, &mut MapContext<'_>) -> Result<MapOutcome> + Send,
{
    fn map(&mut self, record: &SourceRecord, ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
        self(record, ctx)
    }
}

/// One destination table's migration.
pub struct MigrationUnit {
    pub name: String,
    pub table: TableSpec,
    pub source: SourceDescriptor,
    pub depends_on: Vec<String>,
    pub load_mode: LoadMode,
    pub key_indexes: Vec<KeyIndexSpec>,
    pub lookups: Vec<LookupSpec>,
    pub dedup: Option<DedupPolicy>,
    /// Idempotent schema adjustments run by `prepare`.
    pub prepare: Vec<String>,
    pub mapper: Box<dyn RecordMapper>,
}

impl MigrationUnit {
    /// A replace-mode unit with no dependencies.
    pub fn new(
        name: &str,
        table: TableSpec,
        source: SourceDescriptor,
        mapper: impl RecordMapper + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            table,
            source,
            depends_on: Vec::new(),
            load_mode: LoadMode::replace(),
            key_indexes: Vec::new(),
            lookups: Vec::new(),
            dedup: None,
            prepare: Vec::new(),
            mapper: Box::new(mapper),
        }
    }

    pub fn depends_on(mut self, units: &[&str]) -> Self {
        self.depends_on.extend(units.iter().map(|u| u.to_string()));
        self
    }

    pub fn mode(mut self, mode: LoadMode) -> Self {
        self.load_mode = mode;
        self
    }

    pub fn key_index(mut self, spec: KeyIndexSpec) -> Self {
        self.key_indexes.push(spec);
        self
    }

    pub fn lookup(mut self, spec: LookupSpec) -> Self {
        self.lookups.push(spec);
        self
    }

    pub fn dedup(mut self, policy: DedupPolicy) -> Self {
        self.dedup = Some(policy);
        self
    }

    pub fn prepare(mut self, statement: &str) -> Self {
        self.prepare.push(statement.to_string());
        self
    }
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("name", &self.name)
            .field("table", &self.table.name)
            .field("source", &self.source.describe())
            .field("depends_on", &self.depends_on)
            .field("load_mode", &self.load_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlType;

    fn copy_name(record: &SourceRecord, _ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
        Ok(match record.text("Nombre") {
            Some(nombre) => MapOutcome::row(NormalizedRecord::new().with("nombre", nombre)),
            None => MapOutcome::reject("missing name"),
        })
    }

    #[test]
    fn test_fn_item_is_a_mapper() {
        let mut unit = MigrationUnit::new(
            "dic_sedes",
            TableSpec::new("dic_sedes").column("nombre", SqlType::Text),
            SourceDescriptor::Inline(Vec::new()),
            copy_name,
        );
        let resolver = KeyResolver::new();
        let lookups = HashMap::new();
        let settings = MigrationConfig::default();
        let mut ctx = MapContext::new(&resolver, &lookups, &settings);

        let out = unit
            .mapper
            .map(&SourceRecord::from_pairs([("Nombre", " Puno ")]), &mut ctx)
            .unwrap();
        assert_eq!(out, MapOutcome::row(NormalizedRecord::new().with("nombre", "Puno")));
        let out = unit
            .mapper
            .map(&SourceRecord::from_pairs([("Nombre", "VACIO_1")]), &mut ctx)
            .unwrap();
        assert_eq!(out, MapOutcome::reject("missing name"));
    }

    #[test]
    fn test_notes_are_drained() {
        let resolver = KeyResolver::new();
        let lookups = HashMap::new();
        let settings = MigrationConfig::default();
        let mut ctx = MapContext::new(&resolver, &lookups, &settings);
        ctx.note_modified("synthesized email", "dni.1@unap.edu.pe");
        assert_eq!(ctx.take_notes().len(), 1);
        assert!(ctx.take_notes().is_empty());
        assert!(ctx.lookup("fechas").is_err());
    }
}
