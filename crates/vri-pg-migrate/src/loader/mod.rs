//! Bulk loader: turns mapped records into destination rows and hands them to
//! the target in a single transactional call.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::{NormalizedRecord, SqlValue, TableSpec};
use crate::error::{MigrateError, Result};
use crate::target::{Row, TargetWriter};

/// How a unit writes its table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadMode {
    /// Truncate (restarting identities) and reload.
    Replace { cascade: bool },
    /// Insert only rows whose `unique_column` value is not present yet.
    UpsertLight { unique_column: String },
}

impl LoadMode {
    pub fn replace() -> Self {
        LoadMode::Replace { cascade: true }
    }

    pub fn upsert_light(unique_column: &str) -> Self {
        LoadMode::UpsertLight {
            unique_column: unique_column.to_string(),
        }
    }
}

/// Rows written by one load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    pub inserted: u64,
    pub already_present: u64,
}

pub struct BulkLoader<'a> {
    target: &'a dyn TargetWriter,
}

impl<'a> BulkLoader<'a> {
    pub fn new(target: &'a dyn TargetWriter) -> Self {
        Self { target }
    }

    /// Write `records` to `table`. Every record is checked against the
    /// table's column types before anything reaches the destination.
    pub async fn load(
        &self,
        table: &TableSpec,
        mode: &LoadMode,
        records: Vec<NormalizedRecord>,
    ) -> Result<LoadStats> {
        let rows = records
            .into_iter()
            .map(|r| build_row(table, r))
            .collect::<Result<Vec<Row>>>()?;
        let total = rows.len();

        let stats = match mode {
            LoadMode::Replace { cascade } => {
                let inserted = self.target.replace_rows(table, rows, *cascade).await?;
                LoadStats {
                    inserted,
                    already_present: 0,
                }
            }
            LoadMode::UpsertLight { unique_column } => {
                self.target.insert_missing(table, unique_column, rows).await?
            }
        };

        info!(
            "{}: loaded {} of {} rows into {} ({} already present)",
            self.target.db_type(),
            stats.inserted,
            total,
            table.name,
            stats.already_present
        );
        Ok(stats)
    }
}

/// Order a record's values by the table's columns, coercing each to its
/// column type. Missing columns are NULL.
pub fn build_row(table: &TableSpec, mut record: NormalizedRecord) -> Result<Row> {
    let mut row = Vec::with_capacity(table.columns.len());
    for col in &table.columns {
        let value = record.remove(&col.name).unwrap_or(SqlValue::Null);
        let value = value.coerce(col.sql_type).map_err(|v| {
            MigrateError::type_mismatch(
                &table.name,
                &col.name,
                format!("expected {}, got {:?}", col.sql_type, v),
            )
        })?;
        if value.is_null() && !col.nullable {
            return Err(MigrateError::type_mismatch(
                &table.name,
                &col.name,
                "NULL in NOT NULL column",
            ));
        }
        row.push(value);
    }

    if let Some(extra) = record.loadable_columns().next() {
        return Err(MigrateError::type_mismatch(
            &table.name,
            extra,
            "column is not part of the table",
        ));
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlType;
    use crate::target::MemoryTarget;

    fn tesistas() -> TableSpec {
        TableSpec::new("tbl_tesistas")
            .required("id_usuario", SqlType::Integer)
            .column("codigo_estudiante", SqlType::Text)
            .column("id_antiguo", SqlType::BigInt)
    }

    #[test]
    fn test_build_row_orders_and_coerces() {
        let record = NormalizedRecord::new()
            .with("id_antiguo", 9)
            .with("id_usuario", 3i64);
        let row = build_row(&tesistas(), record).unwrap();
        assert_eq!(row, vec![SqlValue::I32(3), SqlValue::Null, SqlValue::I64(9)]);
    }

    #[test]
    fn test_build_row_rejects_wrong_type() {
        let record = NormalizedRecord::new()
            .with("id_usuario", 3)
            .with("codigo_estudiante", 2020);
        let err = build_row(&tesistas(), record).unwrap_err();
        assert!(matches!(err, MigrateError::TypeMismatch { ref column, .. } if column == "codigo_estudiante"));
    }

    #[test]
    fn test_build_row_rejects_null_in_required_column() {
        let record = NormalizedRecord::new().with("codigo_estudiante", "2020");
        assert!(matches!(
            build_row(&tesistas(), record),
            Err(MigrateError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_build_row_rejects_unknown_column() {
        let record = NormalizedRecord::new()
            .with("id_usuario", 1)
            .with("semestre", "2020-I");
        assert!(build_row(&tesistas(), record).is_err());
    }

    #[test]
    fn test_build_row_drops_scratch_columns() {
        let record = NormalizedRecord::new()
            .with("id_usuario", 1)
            .with("_dni_origen", "40123456");
        let row = build_row(&tesistas(), record).unwrap();
        assert_eq!(row, vec![SqlValue::I32(1), SqlValue::Null, SqlValue::Null]);
    }

    #[tokio::test]
    async fn test_replace_is_idempotent() {
        let target = MemoryTarget::new();
        let loader = BulkLoader::new(&target);
        let batch = || {
            vec![
                NormalizedRecord::new().with("id_usuario", 1).with("id_antiguo", 10i64),
                NormalizedRecord::new().with("id_usuario", 2).with("id_antiguo", 11i64),
            ]
        };
        loader.load(&tesistas(), &LoadMode::replace(), batch()).await.unwrap();
        let first = target.rows("tbl_tesistas");
        let stats = loader.load(&tesistas(), &LoadMode::replace(), batch()).await.unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(target.rows("tbl_tesistas"), first);
    }

    #[tokio::test]
    async fn test_type_mismatch_writes_nothing() {
        let target = MemoryTarget::new();
        let loader = BulkLoader::new(&target);
        let records = vec![
            NormalizedRecord::new().with("id_usuario", 1),
            NormalizedRecord::new().with("id_usuario", "uno"),
        ];
        assert!(loader.load(&tesistas(), &LoadMode::replace(), records).await.is_err());
        assert_eq!(target.row_count("tbl_tesistas").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_light_twice_adds_nothing() {
        let target = MemoryTarget::new();
        let loader = BulkLoader::new(&target);
        let users = TableSpec::new("tbl_usuarios")
            .column("nombres", SqlType::Text)
            .required("correo", SqlType::Text)
            .identity("id");
        let batch = || {
            vec![
                NormalizedRecord::new().with("nombres", "Ana").with("correo", "ana@unap.edu.pe"),
                NormalizedRecord::new().with("nombres", "Luis").with("correo", "luis@unap.edu.pe"),
            ]
        };
        let mode = LoadMode::upsert_light("correo");
        let first = loader.load(&users, &mode, batch()).await.unwrap();
        let second = loader.load(&users, &mode, batch()).await.unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(second, LoadStats { inserted: 0, already_present: 2 });
        assert_eq!(target.row_count("tbl_usuarios").await.unwrap(), 2);
    }
}
