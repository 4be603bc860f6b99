//! Per-unit transfer: stream the source, map, deduplicate, report, load.
//!
//! Rows are handled one at a time on the calling task. Nothing reaches the
//! destination until the whole source has been read, so a unit that fails
//! before loading leaves its table as it was.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MigrationConfig;
use crate::core::{NormalizedRecord, SourceRecord};
use crate::dedup::{ConflictDecision, Deduplicator};
use crate::error::{MigrateError, Result};
use crate::loader::BulkLoader;
use crate::report::{reasons, ReportSink, Reporter};
use crate::resolve::{KeyResolver, LookupTable};
use crate::source::SourceSet;
use crate::target::TargetWriter;
use crate::unit::{MapContext, MapOutcome, MigrationUnit};

/// Counters for one unit run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStats {
    /// Source records read successfully.
    pub read: u64,
    /// Destination rows handed to the loader.
    pub accepted: u64,
    /// Records or rows reported instead of loaded.
    pub rejected: u64,
    /// Records loaded with at least one synthesized value.
    pub modified: u64,
    /// Source rows that could not be parsed.
    pub malformed: u64,
    pub inserted: u64,
    pub already_present: u64,
}

/// Runs units against a destination.
pub struct TransferEngine {
    target: Arc<dyn TargetWriter>,
    sources: Arc<SourceSet>,
    settings: MigrationConfig,
}

impl TransferEngine {
    pub fn new(
        target: Arc<dyn TargetWriter>,
        sources: Arc<SourceSet>,
        settings: MigrationConfig,
    ) -> Self {
        Self {
            target,
            sources,
            settings,
        }
    }

    fn report_sink(&self) -> ReportSink {
        match &self.settings.report_table {
            Some(table) => ReportSink::Table {
                table: table.clone(),
            },
            None => ReportSink::Csv {
                dir: self.settings.report_dir.clone(),
            },
        }
    }

    /// Run one unit. The reconciliation report is flushed whether or not the
    /// unit succeeds.
    pub async fn execute(&self, unit: &mut MigrationUnit) -> Result<UnitStats> {
        let start = Instant::now();
        info!("{}: reading {}", unit.name, unit.source.describe());

        let mut reporter = Reporter::new(&unit.name);
        let result = self.run(unit, &mut reporter).await;
        reporter.flush(&self.report_sink(), self.target.as_ref()).await;

        match &result {
            Ok(stats) => info!(
                "{}: {} read, {} accepted, {} rejected, {} modified, {} malformed, {} inserted in {:.1}s",
                unit.name,
                stats.read,
                stats.accepted,
                stats.rejected,
                stats.modified,
                stats.malformed,
                stats.inserted,
                start.elapsed().as_secs_f64()
            ),
            Err(e) => warn!("{}: failed: {}", unit.name, e),
        }
        result
    }

    async fn run(&self, unit: &mut MigrationUnit, reporter: &mut Reporter) -> Result<UnitStats> {
        let target = self.target.as_ref();

        let resolver = KeyResolver::build(&unit.key_indexes, target).await?;
        let mut lookups = HashMap::new();
        for spec in &unit.lookups {
            lookups.insert(spec.name.clone(), LookupTable::build(spec, &self.sources).await?);
        }
        let mut dedup = match &unit.dedup {
            Some(policy) => {
                let mut d = Deduplicator::new(policy.clone());
                d.seed_from_target(&unit.table.name, target).await?;
                Some(d)
            }
            None => None,
        };

        let mut stats = UnitStats::default();
        let mut accepted: Vec<NormalizedRecord> = Vec::new();
        let mut stream = self.sources.open(&unit.source)?;

        while let Some(item) = stream.recv().await {
            let record = match item {
                Ok(record) => record,
                Err(MigrateError::MalformedRecord { line, message, .. }) => {
                    stats.malformed += 1;
                    reporter.malformed(line, &message);
                    continue;
                }
                Err(e) => return Err(e),
            };
            stats.read += 1;

            let mut ctx = MapContext::new(&resolver, &lookups, &self.settings);
            let outcome = match unit.mapper.map(&record, &mut ctx) {
                Ok(outcome) => outcome,
                Err(e) if e.is_row_level() => {
                    debug!("{}: line {}: {}", unit.name, record.line, e);
                    MapOutcome::reject(reasons::UNMAPPED_REFERENCE)
                }
                Err(e) => return Err(e),
            };
            let notes = ctx.take_notes();

            match outcome {
                MapOutcome::Reject(reason) => {
                    stats.rejected += 1;
                    reporter.record(&record, reason);
                }
                MapOutcome::Rows(rows) => {
                    let mut modified = !notes.is_empty();
                    for (reason, value) in notes {
                        reporter.modified(&record, reason, value);
                    }
                    for mut row in rows {
                        if let Some(d) = dedup.as_mut() {
                            match apply_decision(d, &mut row, &record, reporter) {
                                RowFate::Keep => {}
                                RowFate::KeepModified => modified = true,
                                RowFate::Drop => {
                                    stats.rejected += 1;
                                    continue;
                                }
                            }
                        }
                        stats.accepted += 1;
                        accepted.push(row);
                    }
                    if modified {
                        stats.modified += 1;
                    }
                }
            }
        }

        check_error_rate(&unit.name, &stats, self.settings.max_error_rate)?;

        let load = BulkLoader::new(target)
            .load(&unit.table, &unit.load_mode, accepted)
            .await?;
        stats.inserted = load.inserted;
        stats.already_present = load.already_present;
        Ok(stats)
    }
}

enum RowFate {
    Keep,
    KeepModified,
    Drop,
}

fn apply_decision(
    dedup: &mut Deduplicator,
    row: &mut NormalizedRecord,
    record: &SourceRecord,
    reporter: &mut Reporter,
) -> RowFate {
    match dedup.process(row) {
        ConflictDecision::Accept => RowFate::Keep,
        ConflictDecision::Skip { reason } => {
            reporter.record(record, reason);
            RowFate::Drop
        }
        ConflictDecision::Rewrite { rewrites, reason } => {
            let value = rewrites
                .iter()
                .map(|rw| format!("{}={}", rw.column, rw.value))
                .collect::<Vec<_>>()
                .join(", ");
            reporter.modified(record, reason, value);
            RowFate::KeepModified
        }
    }
}

/// Fails when malformed rows exceed `limit` as a share of everything read.
fn check_error_rate(unit: &str, stats: &UnitStats, limit: f64) -> Result<()> {
    if stats.malformed == 0 {
        return Ok(());
    }
    let total = stats.read + stats.malformed;
    if stats.malformed as f64 / total as f64 > limit {
        return Err(MigrateError::ErrorRateExceeded {
            unit: unit.to_string(),
            malformed: stats.malformed,
            total,
            limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SqlType, SqlValue, TableSpec};
    use crate::dedup::{DedupPolicy, SecondaryRule, Synthesis};
    use crate::loader::LoadMode;
    use crate::resolve::{KeyIndexSpec, NaturalKey};
    use crate::source::SourceDescriptor;
    use crate::target::MemoryTarget;
    use std::io::Write;

    fn settings(report_dir: &std::path::Path) -> MigrationConfig {
        MigrationConfig {
            report_dir: report_dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn engine(target: Arc<MemoryTarget>, settings: MigrationConfig) -> TransferEngine {
        let sources = Arc::new(SourceSet::offline(&settings.data_dir));
        TransferEngine::new(target, sources, settings)
    }

    fn tesista(record: &SourceRecord, ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
        let dni = NaturalKey::from_parts([record.get("DNI")]);
        let Some(dni) = dni else {
            return Ok(MapOutcome::reject(reasons::MISSING_IDENTITY));
        };
        let id_usuario = ctx.resolver.require("usuario_por_dni", &dni)?;
        Ok(MapOutcome::row(
            NormalizedRecord::new()
                .with("id_usuario", id_usuario)
                .with("codigo_estudiante", record.text("Codigo")),
        ))
    }

    fn tesistas_unit(rows: Vec<SourceRecord>) -> MigrationUnit {
        MigrationUnit::new(
            "tbl_tesistas",
            TableSpec::new("tbl_tesistas")
                .required("id_usuario", SqlType::BigInt)
                .column("codigo_estudiante", SqlType::Text),
            SourceDescriptor::Inline(rows),
            tesista,
        )
        .key_index(KeyIndexSpec::new(
            "usuario_por_dni",
            "tbl_usuarios",
            &["num_doc_identidad"],
            "id",
        ))
    }

    #[tokio::test]
    async fn test_unmapped_reference_is_reported_and_unit_completes() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(MemoryTarget::new());
        target.seed(
            "tbl_usuarios",
            &["id", "num_doc_identidad"],
            vec![vec![SqlValue::I64(5), "40123456".into()]],
        );
        let mut unit = tesistas_unit(vec![
            SourceRecord::from_pairs([("DNI", "40123456"), ("Codigo", "2019-1")]),
            SourceRecord::from_pairs([("DNI", "99999998"), ("Codigo", "2019-2")]),
        ]);

        let stats = engine(target.clone(), settings(dir.path()))
            .execute(&mut unit)
            .await
            .unwrap();
        assert_eq!(stats.read, 2);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(target.column("tbl_tesistas", "id_usuario"), vec![SqlValue::I64(5)]);

        let report =
            std::fs::read_to_string(dir.path().join("tbl_tesistas_reconciliation.csv")).unwrap();
        assert!(report.contains("99999998"));
        assert!(report.contains("unmapped reference"));
    }

    #[tokio::test]
    async fn test_unknown_index_fails_the_unit() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(MemoryTarget::new());
        let mut unit = tesistas_unit(vec![SourceRecord::from_pairs([("DNI", "1")])]);
        unit.key_indexes.clear();
        let err = engine(target, settings(dir.path()))
            .execute(&mut unit)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[tokio::test]
    async fn test_dedup_rewrites_are_counted_as_modified() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(MemoryTarget::new());
        fn copy(record: &SourceRecord, _ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
            Ok(MapOutcome::row(
                NormalizedRecord::new()
                    .with("nombres", record.text("Nombres"))
                    .with("num_doc_identidad", record.text("DNI")),
            ))
        }
        let mut unit = MigrationUnit::new(
            "usuarios",
            TableSpec::new("tbl_usuarios")
                .column("nombres", SqlType::Text)
                .column("num_doc_identidad", SqlType::Text),
            SourceDescriptor::Inline(vec![
                SourceRecord::from_pairs([("Nombres", "Ana"), ("DNI", "40123456")]),
                SourceRecord::from_pairs([("Nombres", "Luis"), ("DNI", "40123456")]),
                SourceRecord::from_pairs([("Nombres", "ana"), ("DNI", "1")]),
            ]),
            copy,
        )
        .mode(LoadMode::upsert_light("num_doc_identidad"))
        .dedup(
            DedupPolicy::new(&["nombres"], reasons::DUPLICATE_FULL_NAME).secondary(
                SecondaryRule::new(
                    "num_doc_identidad",
                    Synthesis::Prefix("dd".into()),
                    reasons::DUPLICATE_NATIONAL_ID,
                ),
            ),
        );

        let stats = engine(target.clone(), settings(dir.path()))
            .execute(&mut unit)
            .await
            .unwrap();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.modified, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(
            target.column("tbl_usuarios", "num_doc_identidad"),
            vec![SqlValue::from("40123456"), SqlValue::from("dd40123456")]
        );
    }

    #[tokio::test]
    async fn test_error_rate_exceeded_leaves_table_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("sedes.csv");
        let mut file = std::fs::File::create(&csv_path).unwrap();
        writeln!(file, "id,nombre").unwrap();
        writeln!(file, "1,Puno").unwrap();
        writeln!(file, "2").unwrap();

        let target = Arc::new(MemoryTarget::new());
        target.seed("dic_sedes", &["id", "nombre"], vec![vec![9.into(), "Juliaca".into()]]);
        fn copy(record: &SourceRecord, _ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
            Ok(MapOutcome::row(
                NormalizedRecord::new()
                    .with("id", record.int("id"))
                    .with("nombre", record.text("nombre")),
            ))
        }
        let mut unit = MigrationUnit::new(
            "dic_sedes",
            TableSpec::new("dic_sedes")
                .column("id", SqlType::Integer)
                .column("nombre", SqlType::Text),
            SourceDescriptor::csv("sedes.csv"),
            copy,
        );

        let mut cfg = settings(&dir.path().join("reports"));
        cfg.data_dir = dir.path().to_path_buf();
        cfg.max_error_rate = 0.1;
        let err = engine(target.clone(), cfg).execute(&mut unit).await.unwrap_err();
        assert!(matches!(
            err,
            MigrateError::ErrorRateExceeded { malformed: 1, total: 2, .. }
        ));
        assert_eq!(target.column("dic_sedes", "nombre"), vec![SqlValue::from("Juliaca")]);
        assert!(dir.path().join("reports/dic_sedes_reconciliation.csv").exists());
    }

    #[test]
    fn test_error_rate_within_limit() {
        let stats = UnitStats {
            read: 99,
            malformed: 1,
            ..Default::default()
        };
        assert!(check_error_rate("u", &stats, 0.05).is_ok());
        assert!(check_error_rate("u", &stats, 0.0).is_err());
    }
}
