//! Reconciliation reporting.
//!
//! Every rejected or modified source row is collected with a reason and
//! flushed at the end of its unit. Flushing never fails the migration: sink
//! errors are logged and swallowed.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::core::{SourceRecord, SqlType, SqlValue, TableSpec};
use crate::error::Result;
use crate::target::TargetWriter;

/// Reason codes shared by the engine and the catalog mappers.
pub mod reasons {
    pub const DUPLICATE_FULL_NAME: &str = "duplicate full name";
    pub const DUPLICATE_NATIONAL_ID: &str = "duplicate national id";
    pub const DUPLICATE_EMAIL: &str = "duplicate email";
    pub const DUPLICATE_KEY: &str = "duplicate key";
    pub const SYNTHESIZED_EMAIL: &str = "synthesized email";
    pub const SYNTHESIZED_NATIONAL_ID: &str = "synthesized national id";
    pub const UNMAPPED_REFERENCE: &str = "unmapped reference";
    pub const UNMAPPED_STAGE: &str = "unmapped stage";
    pub const MISSING_IDENTITY: &str = "missing identity";
    pub const MALFORMED_RECORD: &str = "malformed record";
    pub const FILTERED: &str = "filtered";
}

/// A reported row.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub unit: String,
    pub reason: String,
    pub modified_value: Option<String>,
    /// Original source fields, rendered as text.
    pub fields: Vec<(String, String)>,
}

/// Where a unit's report goes.
#[derive(Debug, Clone)]
pub enum ReportSink {
    /// `<dir>/<unit>_reconciliation.csv`
    Csv { dir: PathBuf },
    /// Appended to a destination table.
    Table { table: String },
    None,
}

/// Columns of the reconciliation log table.
pub fn report_table_spec(table: &str) -> TableSpec {
    TableSpec::new(table)
        .required("unidad", SqlType::Text)
        .required("motivo", SqlType::Text)
        .column("valor_modificado", SqlType::Text)
        .column("registro", SqlType::Text)
        .required("fecha_registro", SqlType::Timestamp)
}

/// Collects rejected and modified rows for one unit.
#[derive(Debug)]
pub struct Reporter {
    unit: String,
    entries: Vec<ReportEntry>,
}

impl Reporter {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            entries: Vec::new(),
        }
    }

    /// Record a rejected row.
    pub fn record(&mut self, entity: &SourceRecord, reason: impl Into<String>) {
        self.push(entity, reason.into(), None);
    }

    /// Record a row that was loaded with a changed value.
    pub fn modified(
        &mut self,
        entity: &SourceRecord,
        reason: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.push(entity, reason.into(), Some(value.into()));
    }

    /// Record a row that could not be parsed at all.
    pub fn malformed(&mut self, line: u64, message: &str) {
        self.entries.push(ReportEntry {
            unit: self.unit.clone(),
            reason: reasons::MALFORMED_RECORD.to_string(),
            modified_value: None,
            fields: vec![
                ("line".to_string(), line.to_string()),
                ("error".to_string(), message.to_string()),
            ],
        });
    }

    fn push(&mut self, entity: &SourceRecord, reason: String, modified_value: Option<String>) {
        self.entries.push(ReportEntry {
            unit: self.unit.clone(),
            reason,
            modified_value,
            fields: entity
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        });
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write all entries to `sink`. Returns where they went, if anywhere.
    ///
    /// With nothing to report, a CSV left by an earlier run of the unit is
    /// removed.
    pub async fn flush(&self, sink: &ReportSink, target: &dyn TargetWriter) -> Option<String> {
        if self.entries.is_empty() {
            if let ReportSink::Csv { dir } = sink {
                self.remove_stale_csv(dir);
            }
            return None;
        }
        let outcome = match sink {
            ReportSink::Csv { dir } => self.write_csv(dir).map(|p| p.display().to_string()),
            ReportSink::Table { table } => self.append_to_table(table, target).await.map(|_| table.clone()),
            ReportSink::None => return None,
        };
        match outcome {
            Ok(location) => {
                info!(
                    "{}: {} reconciliation entries written to {}",
                    self.unit,
                    self.entries.len(),
                    location
                );
                Some(location)
            }
            Err(e) => {
                warn!(
                    "{}: could not write reconciliation report ({} entries): {}",
                    self.unit,
                    self.entries.len(),
                    e
                );
                None
            }
        }
    }

    /// Header: union of original field names in first-seen order, then
    /// `reason` and `modified_value`.
    fn header(&self) -> Vec<String> {
        let mut header: Vec<String> = Vec::new();
        for entry in &self.entries {
            for (name, _) in &entry.fields {
                if !header.iter().any(|h| h == name) {
                    header.push(name.clone());
                }
            }
        }
        header.push("reason".to_string());
        header.push("modified_value".to_string());
        header
    }

    fn csv_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}_reconciliation.csv", self.unit))
    }

    fn remove_stale_csv(&self, dir: &Path) {
        let path = self.csv_path(dir);
        match std::fs::remove_file(&path) {
            Ok(()) => info!("{}: removed stale report {}", self.unit, path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "{}: could not remove stale report {}: {}",
                self.unit,
                path.display(),
                e
            ),
        }
    }

    fn write_csv(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = self.csv_path(dir);
        let header = self.header();
        let n_fields = header.len() - 2;

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(&header)?;
        for entry in &self.entries {
            let mut row: Vec<&str> = header[..n_fields]
                .iter()
                .map(|name| {
                    entry
                        .fields
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| v.as_str())
                        .unwrap_or("")
                })
                .collect();
            row.push(&entry.reason);
            row.push(entry.modified_value.as_deref().unwrap_or(""));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(path)
    }

    async fn append_to_table(&self, table: &str, target: &dyn TargetWriter) -> Result<u64> {
        let spec = report_table_spec(table);
        let now = Utc::now().naive_utc();
        let mut rows = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let payload: serde_json::Map<String, serde_json::Value> = entry
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            rows.push(vec![
                SqlValue::Text(entry.unit.clone()),
                SqlValue::Text(entry.reason.clone()),
                SqlValue::from(entry.modified_value.clone()),
                SqlValue::Text(serde_json::to_string(&payload)?),
                SqlValue::DateTime(now),
            ]);
        }
        target.append_rows(&spec, rows).await
    }
}
