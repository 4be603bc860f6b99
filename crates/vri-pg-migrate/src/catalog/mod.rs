//! The default migration catalog: every destination table of the VRI schema
//! as a [`MigrationUnit`].
//!
//! Units are declared in dependency order. Source queries push filters to
//! MySQL where the legacy scripts filtered in memory.

mod academico;
mod diccionarios;
mod jurados;
mod usuarios;

pub use jurados::{event_type, stage_for};

use crate::config::MigrationConfig;
use crate::core::{NormalizedRecord, SourceRecord, SqlType, SqlValue, TableSpec};
use crate::error::{MigrateError, Result};
use crate::normalize::FieldSpec;
use crate::report::reasons;
use crate::resolve::{KeyIndexSpec, NaturalKey, Resolution};
use crate::unit::{MapContext, MapOutcome, MigrationUnit, RecordMapper};

/// Connection names from the `sources` config section.
pub const ABSMAIN: &str = "absmain";
pub const PILAR3: &str = "pilar3";

/// Key index names shared by several units.
pub(crate) mod index {
    pub const USUARIO_DNI: &str = "usuario_por_dni";
    pub const USUARIO_CORREO: &str = "usuario_por_correo";
    pub const USUARIO_NOMBRE: &str = "usuario_por_nombre";
    pub const DOCENTE_ANTIGUO: &str = "docente_por_id_antiguo";
    pub const TRAMITE_ANTIGUO: &str = "tramite_por_id_antiguo";
    pub const DOCENTE_CODIGO: &str = "docente_por_codigo";
    pub const USUARIO_DOCENTE_CODIGO: &str = "usuario_de_docente_por_codigo";
    pub const GRADO_NOMBRE: &str = "grado_por_nombre";
    pub const ESTUDIO_USUARIO_GRADO: &str = "estudio_por_usuario_y_grado";
}

/// All units, in declaration order.
pub fn default_units(settings: &MigrationConfig) -> Vec<MigrationUnit> {
    let mut units = Vec::new();
    units.extend(usuarios::units(settings));
    units.extend(diccionarios::units(settings));
    units.extend(academico::units(settings));
    units.extend(jurados::units(settings));
    units
}

/// `ALTER TABLE .. ADD COLUMN IF NOT EXISTS id_antiguo integer`
fn bridging_column(table: &str) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN IF NOT EXISTS id_antiguo integer",
        table
    )
}

fn usuario_indexes() -> [KeyIndexSpec; 3] {
    [
        KeyIndexSpec::new(index::USUARIO_DNI, "tbl_usuarios", &["num_doc_identidad"], "id"),
        KeyIndexSpec::new(index::USUARIO_CORREO, "tbl_usuarios", &["correo"], "id"),
        KeyIndexSpec::new(index::USUARIO_NOMBRE, "tbl_usuarios", &["nombres", "apellidos"], "id"),
    ]
}

fn legacy_index(name: &str, table: &str) -> KeyIndexSpec {
    KeyIndexSpec::new(name, table, &["id_antiguo"], "id")
}

/// Legacy numeric ID of a field; `0` and negatives mean "none".
fn legacy_id(record: &SourceRecord, field: &str) -> Option<i64> {
    record
        .field(field, FieldSpec::BigInt)
        .value
        .as_i64()
        .filter(|id| *id > 0)
}

/// The service user that assigns juries. Units cannot run without it.
fn system_user_id(ctx: &MapContext<'_>) -> Result<i64> {
    let email = &ctx.settings.system_user_email;
    let key = NaturalKey::from_text(email);
    match ctx.resolver.resolve(index::USUARIO_CORREO, key.as_ref())? {
        Resolution::Found(id) => Ok(id),
        Resolution::NotFound => Err(MigrateError::Config(format!(
            "system user {} is not in tbl_usuarios",
            email
        ))),
    }
}

fn column_type(spec: FieldSpec) -> SqlType {
    match spec {
        FieldSpec::Text => SqlType::Text,
        FieldSpec::Integer => SqlType::Integer,
        FieldSpec::BigInt => SqlType::BigInt,
        FieldSpec::Double => SqlType::Double,
        FieldSpec::Boolean => SqlType::Boolean,
        FieldSpec::Date => SqlType::Date,
        FieldSpec::Timestamp => SqlType::Timestamp,
    }
}

#[derive(Debug, Clone)]
struct FieldCopy {
    source: String,
    column: String,
    spec: FieldSpec,
}

/// Straight column copy with constant defaults, used by the dictionary
/// tables. Rows whose key fields are empty are rejected.
#[derive(Debug, Clone, Default)]
pub struct ColumnCopy {
    keys: Vec<FieldCopy>,
    fields: Vec<FieldCopy>,
    constants: Vec<(String, SqlValue)>,
}

impl ColumnCopy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A field that must be present; the column is NOT NULL.
    pub fn key(mut self, source: &str, column: &str, spec: FieldSpec) -> Self {
        self.keys.push(FieldCopy {
            source: source.to_string(),
            column: column.to_string(),
            spec,
        });
        self
    }

    pub fn field(mut self, source: &str, column: &str, spec: FieldSpec) -> Self {
        self.fields.push(FieldCopy {
            source: source.to_string(),
            column: column.to_string(),
            spec,
        });
        self
    }

    pub fn constant(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.constants.push((column.to_string(), value.into()));
        self
    }

    /// Destination columns written by this copy.
    pub fn table_spec(&self, table: &str) -> TableSpec {
        let mut spec = TableSpec::new(table);
        for k in &self.keys {
            spec = spec.required(&k.column, column_type(k.spec));
        }
        for f in &self.fields {
            spec = spec.column(&f.column, column_type(f.spec));
        }
        for (column, value) in &self.constants {
            spec = spec.column(column, value.sql_type().unwrap_or(SqlType::Text));
        }
        spec
    }
}

impl RecordMapper for ColumnCopy {
    fn map(&mut self, record: &SourceRecord, _ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
        let mut row = NormalizedRecord::new();
        for k in &self.keys {
            let value = record.field(&k.source, k.spec).into_value();
            if value.is_null() {
                return Ok(MapOutcome::reject(reasons::MISSING_IDENTITY));
            }
            row.set(k.column.clone(), value);
        }
        for f in &self.fields {
            row.set(f.column.clone(), record.field(&f.source, f.spec).into_value());
        }
        for (column, value) in &self.constants {
            row.set(column.clone(), value.clone());
        }
        Ok(MapOutcome::row(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::order_units;
    use crate::resolve::KeyResolver;
    use std::collections::HashMap;

    #[test]
    fn test_catalog_orders_cleanly() {
        let units = order_units(default_units(&MigrationConfig::default())).unwrap();
        let pos = |name: &str| units.iter().position(|u| u.name == name).unwrap();

        assert_eq!(units[0].name, "system_user");
        assert!(pos("usuarios_docentes") < pos("usuarios_tesistas"));
        assert!(pos("tbl_tramites") < pos("tbl_conformacion_jurados"));
        assert!(pos("tbl_conformacion_jurados") < pos("tbl_correcciones_jurados"));
        assert!(pos("tbl_docentes") < pos("tbl_docente_categoria_historial"));
        assert!(pos("dic_tipo_trabajos") < pos("tbl_tramites"));
        assert!(pos("tbl_estudios") < pos("tbl_grado_docente"));
    }

    #[test]
    fn test_every_dependency_is_declared_before_use() {
        let units = default_units(&MigrationConfig::default());
        for (i, unit) in units.iter().enumerate() {
            for dep in &unit.depends_on {
                let at = units.iter().position(|u| &u.name == dep);
                assert!(
                    matches!(at, Some(j) if j < i),
                    "{} depends on {} which is not declared before it",
                    unit.name,
                    dep
                );
            }
        }
    }

    #[test]
    fn test_column_copy() {
        let mut copy = ColumnCopy::new()
            .key("Id", "id", FieldSpec::Integer)
            .field("Nombre", "nombre", FieldSpec::Text)
            .constant("estado", 1);
        let spec = copy.table_spec("dic_x");
        assert_eq!(spec.column_names(), vec!["id", "nombre", "estado"]);
        assert!(!spec.columns[0].nullable);
        assert_eq!(spec.columns[2].sql_type, SqlType::Integer);

        let resolver = KeyResolver::new();
        let lookups = HashMap::new();
        let settings = MigrationConfig::default();
        let mut ctx = MapContext::new(&resolver, &lookups, &settings);

        let out = copy
            .map(&SourceRecord::from_pairs([("Id", "7"), ("Nombre", " Ciencias ")]), &mut ctx)
            .unwrap();
        assert_eq!(
            out,
            MapOutcome::row(
                NormalizedRecord::new()
                    .with("id", 7)
                    .with("nombre", "Ciencias")
                    .with("estado", 1)
            )
        );
        let out = copy
            .map(&SourceRecord::from_pairs([("Id", "*"), ("Nombre", "x")]), &mut ctx)
            .unwrap();
        assert_eq!(out, MapOutcome::reject(reasons::MISSING_IDENTITY));
    }
}
