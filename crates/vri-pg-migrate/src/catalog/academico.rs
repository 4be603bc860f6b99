//! Professors, thesis students and their academic records, linked to the
//! users loaded earlier.

use std::collections::HashSet;

use crate::config::MigrationConfig;
use crate::core::{NormalizedRecord, SourceRecord, SqlType, SqlValue, TableSpec};
use crate::error::Result;
use crate::normalize::FieldSpec;
use crate::report::reasons;
use crate::resolve::{FallbackChain, KeyIndexSpec, KeyResolver, NaturalKey};
use crate::source::SourceDescriptor;
use crate::unit::{MapContext, MapOutcome, MigrationUnit, RecordMapper};

use super::{bridging_column, index, legacy_id, legacy_index, usuario_indexes, ABSMAIN, PILAR3};

/// `id_especialidad` for professors; the legacy schema has no equivalent.
const DEFAULT_ESPECIALIDAD: i32 = 1;

/// Degree names, highest first.
const DEGREE_RANK: [&str; 5] = [
    "Doctor",
    "Magíster",
    "Segunda Especialidad",
    "Título Profesional",
    "Bachiller",
];

pub(super) fn units(settings: &MigrationConfig) -> Vec<MigrationUnit> {
    vec![
        docentes(),
        tesistas(),
        categoria_historial(),
        estudios(settings),
        grado_docente(),
    ]
}

fn docentes() -> MigrationUnit {
    let table = TableSpec::new("tbl_docentes")
        .required("id_usuario", SqlType::Integer)
        .column("id_categoria", SqlType::Integer)
        .column("codigo_airhs", SqlType::Text)
        .column("id_especialidad", SqlType::Integer)
        .column("estado_docente", SqlType::Integer)
        .required("id_antiguo", SqlType::Integer)
        .identity("id");
    let [by_dni, by_correo, by_nombre] = usuario_indexes();

    MigrationUnit::new(
        "tbl_docentes",
        table,
        SourceDescriptor::query(
            ABSMAIN,
            "SELECT Id, DNI, Correo, Nombres, Apellidos, IdCategoria, Codigo, Activo \
             FROM tblDocentes ORDER BY Id",
        ),
        map_docente,
    )
    .depends_on(&["usuarios_docentes", "dic_categoria", "dic_especialidades"])
    .key_index(by_dni)
    .key_index(by_correo)
    .key_index(by_nombre)
    .prepare(&bridging_column("tbl_docentes"))
}

/// Links a professor to a user by national ID, then e-mail, then full name.
fn map_docente(record: &SourceRecord, ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
    let Some(id_antiguo) = legacy_id(record, "Id") else {
        return Ok(MapOutcome::reject(reasons::MISSING_IDENTITY));
    };
    let chain = FallbackChain::new()
        .then(index::USUARIO_DNI, NaturalKey::from_record(record, &["DNI".into()]))
        .then(index::USUARIO_CORREO, NaturalKey::from_record(record, &["Correo".into()]))
        .then(
            index::USUARIO_NOMBRE,
            NaturalKey::from_record(record, &["Nombres".into(), "Apellidos".into()]),
        );
    let Some((id_usuario, via)) = chain.resolve_with_source(ctx.resolver)? else {
        return Ok(MapOutcome::reject(reasons::UNMAPPED_REFERENCE));
    };
    tracing::trace!("docente {} linked to user {} via {}", id_antiguo, id_usuario, via);

    Ok(MapOutcome::row(
        NormalizedRecord::new()
            .with("id_usuario", id_usuario)
            .with("id_categoria", record.field("IdCategoria", FieldSpec::Integer).into_value())
            .with("codigo_airhs", record.text("Codigo"))
            .with("id_especialidad", DEFAULT_ESPECIALIDAD)
            .with("estado_docente", record.field("Activo", FieldSpec::Integer).into_value())
            .with("id_antiguo", id_antiguo),
    ))
}

fn tesistas() -> MigrationUnit {
    let table = TableSpec::new("tbl_tesistas")
        .required("id_usuario", SqlType::Integer)
        .column("codigo_estudiante", SqlType::Text)
        .column("id_estructura_academica", SqlType::Integer)
        .column("estado", SqlType::Integer)
        .required("id_antiguo", SqlType::Integer)
        .identity("id");
    let [by_dni, _, _] = usuario_indexes();

    MigrationUnit::new(
        "tbl_tesistas",
        table,
        SourceDescriptor::query(
            PILAR3,
            "SELECT Id, DNI, Codigo, IdCarrera, Activo FROM tblTesistas ORDER BY Id",
        ),
        map_tesista,
    )
    .depends_on(&["usuarios_tesistas", "tbl_estructura_academica"])
    .key_index(by_dni)
    .prepare(&bridging_column("tbl_tesistas"))
}

fn map_tesista(record: &SourceRecord, ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
    let Some(id_antiguo) = legacy_id(record, "Id") else {
        return Ok(MapOutcome::reject(reasons::MISSING_IDENTITY));
    };
    let Some(dni) = NaturalKey::from_record(record, &["DNI".into()]) else {
        return Ok(MapOutcome::reject(reasons::UNMAPPED_REFERENCE));
    };
    let id_usuario = ctx.resolver.require(index::USUARIO_DNI, &dni)?;
    let estado = if record.text("Activo").as_deref() == Some("A") { 1 } else { 0 };

    Ok(MapOutcome::row(
        NormalizedRecord::new()
            .with("id_usuario", id_usuario)
            .with("codigo_estudiante", record.text("Codigo"))
            .with(
                "id_estructura_academica",
                record.field("IdCarrera", FieldSpec::Integer).into_value(),
            )
            .with("estado", estado)
            .with("id_antiguo", id_antiguo),
    ))
}

fn categoria_historial() -> MigrationUnit {
    let table = TableSpec::new("tbl_docente_categoria_historial")
        .required("id_docente", SqlType::Integer)
        .column("id_categoria", SqlType::Integer)
        .column("fecha_resolucion", SqlType::Date)
        .column("resolucion", SqlType::Text)
        .column("estado", SqlType::Boolean)
        .identity("id");

    MigrationUnit::new(
        "tbl_docente_categoria_historial",
        table,
        SourceDescriptor::query(
            ABSMAIN,
            "SELECT Id, IdCategoria, FechaAsc, ResolAsc, Activo FROM tblDocentes ORDER BY Id",
        ),
        map_historial,
    )
    .depends_on(&["tbl_docentes"])
    .key_index(legacy_index(index::DOCENTE_ANTIGUO, "tbl_docentes"))
}

fn map_historial(record: &SourceRecord, ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
    let Some(id_antiguo) = legacy_id(record, "Id") else {
        return Ok(MapOutcome::reject(reasons::MISSING_IDENTITY));
    };
    let id_docente = ctx
        .resolver
        .require(index::DOCENTE_ANTIGUO, &NaturalKey::from_int(id_antiguo))?;
    // any non-zero status counts as active
    let activo = record.field("Activo", FieldSpec::Boolean).into_value();

    Ok(MapOutcome::row(
        NormalizedRecord::new()
            .with("id_docente", id_docente)
            .with("id_categoria", record.field("IdCategoria", FieldSpec::Integer).into_value())
            .with("fecha_resolucion", record.field("FechaAsc", FieldSpec::Date).into_value())
            .with("resolucion", record.text("ResolAsc"))
            .with("estado", activo),
    ))
}

fn estudios(settings: &MigrationConfig) -> MigrationUnit {
    let table = TableSpec::new("tbl_estudios")
        .column("id_usuario", SqlType::Integer)
        .required("id_universidad", SqlType::Integer)
        .column("id_grado_academico", SqlType::Integer)
        .column("titulo_profesional", SqlType::Text)
        .column("especialidad", SqlType::Text)
        .column("fecha_emision", SqlType::Date)
        .column("resolucion", SqlType::Text)
        .column("id_tipo_obtencion", SqlType::Integer)
        .identity("id");

    MigrationUnit::new(
        "tbl_estudios",
        table,
        SourceDescriptor::csv(&settings.files.estudios),
        map_estudio,
    )
    .depends_on(&["usuarios_tesistas", "dic_grados_academicos", "dic_obtencion_studios"])
}

/// Keeps only studies at a known university (`1..=max_university_id`).
fn map_estudio(record: &SourceRecord, ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
    let max = ctx.settings.max_university_id;
    let id_universidad = match record.int("id_universidad") {
        Some(id) if id > 0 && id <= max => id,
        _ => return Ok(MapOutcome::reject(reasons::FILTERED)),
    };
    let int = |field: &str| record.field(field, FieldSpec::Integer).into_value();

    Ok(MapOutcome::row(
        NormalizedRecord::new()
            .with("id_usuario", int("id_usuario"))
            .with("id_universidad", id_universidad)
            .with("id_grado_academico", int("id_grado_academico"))
            .with("titulo_profesional", record.text("titulo_profesional"))
            .with("especialidad", record.text("especialidad"))
            .with("fecha_emision", record.field("fecha_emision", FieldSpec::Date).into_value())
            .with("resolucion", record.text("resolucion"))
            .with("id_tipo_obtencion", int("id_tipo_obtencion")),
    ))
}

/// One row per professor with studies: highest degree plus the legacy
/// category and its start date.
fn grado_docente() -> MigrationUnit {
    let table = TableSpec::new("tbl_grado_docente")
        .required("id_docente", SqlType::Integer)
        .column("grado_academico", SqlType::Text)
        .column("categoria_descripcion", SqlType::Text)
        .column("antiguedad_categoria", SqlType::Date)
        .column("estado_tbl_grado_docente", SqlType::Boolean)
        .identity("id");

    MigrationUnit::new(
        "tbl_grado_docente",
        table,
        SourceDescriptor::query(
            ABSMAIN,
            "SELECT Id, Codigo, Categoria, fechaasc FROM tblDocentes ORDER BY Id",
        ),
        GradoDocente::default(),
    )
    .depends_on(&["tbl_docentes", "tbl_estudios", "dic_grados_academicos"])
    .key_index(KeyIndexSpec::new(
        index::DOCENTE_CODIGO,
        "tbl_docentes",
        &["codigo_airhs"],
        "id",
    ))
    .key_index(KeyIndexSpec::new(
        index::USUARIO_DOCENTE_CODIGO,
        "tbl_docentes",
        &["codigo_airhs"],
        "id_usuario",
    ))
    .key_index(KeyIndexSpec::new(
        index::GRADO_NOMBRE,
        "dic_grados_academicos",
        &["nombre"],
        "id",
    ))
    .key_index(KeyIndexSpec::new(
        index::ESTUDIO_USUARIO_GRADO,
        "tbl_estudios",
        &["id_usuario", "id_grado_academico"],
        "id",
    ))
}

/// Highest ranked degree among the user's studies.
fn highest_degree(resolver: &KeyResolver, id_usuario: i64) -> Result<Option<&'static str>> {
    for name in DEGREE_RANK {
        let key = NaturalKey::from_text(name);
        let Some(id_grado) = resolver.resolve(index::GRADO_NOMBRE, key.as_ref())?.id() else {
            continue;
        };
        let study = NaturalKey::from_parts([&SqlValue::I64(id_usuario), &SqlValue::I64(id_grado)]);
        if resolver.resolve(index::ESTUDIO_USUARIO_GRADO, study.as_ref())?.id().is_some() {
            return Ok(Some(name));
        }
    }
    Ok(None)
}

/// A professor listed twice under the same code keeps the first row.
#[derive(Debug, Default)]
struct GradoDocente {
    seen: HashSet<i64>,
}

impl RecordMapper for GradoDocente {
    fn map(&mut self, record: &SourceRecord, ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
        let Some(codigo) = NaturalKey::from_record(record, &["Codigo".into()]) else {
            return Ok(MapOutcome::reject(reasons::MISSING_IDENTITY));
        };
        let Some(id_docente) = ctx.resolver.resolve(index::DOCENTE_CODIGO, Some(&codigo))?.id() else {
            return Ok(MapOutcome::reject(reasons::UNMAPPED_REFERENCE));
        };
        let id_usuario = ctx.resolver.require(index::USUARIO_DOCENTE_CODIGO, &codigo)?;
        let Some(grado) = highest_degree(ctx.resolver, id_usuario)? else {
            return Ok(MapOutcome::reject(reasons::FILTERED));
        };
        if !self.seen.insert(id_docente) {
            return Ok(MapOutcome::reject(reasons::DUPLICATE_KEY));
        }

        Ok(MapOutcome::row(
            NormalizedRecord::new()
                .with("id_docente", id_docente)
                .with("grado_academico", grado)
                .with("categoria_descripcion", record.text("Categoria"))
                .with("antiguedad_categoria", record.field("fechaasc", FieldSpec::Date).into_value())
                .with("estado_tbl_grado_docente", true),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrateError;
    use crate::resolve::KeyIndex;
    use std::collections::HashMap;

    fn resolver() -> KeyResolver {
        let mut by_dni = KeyIndex::new(index::USUARIO_DNI);
        by_dni.insert(NaturalKey::from_text("40123456").unwrap(), 10);
        let mut by_correo = KeyIndex::new(index::USUARIO_CORREO);
        by_correo.insert(NaturalKey::from_text("rosa@unap.edu.pe").unwrap(), 11);
        let mut by_nombre = KeyIndex::new(index::USUARIO_NOMBRE);
        by_nombre.insert(NaturalKey::from_text("luis rojas").unwrap(), 12);

        let mut resolver = KeyResolver::new();
        resolver.add(by_dni);
        resolver.add(by_correo);
        resolver.add(by_nombre);
        resolver
    }

    fn docente(dni: &str, correo: &str, nombres: &str) -> SourceRecord {
        SourceRecord::from_pairs([
            ("Id", SqlValue::I32(5)),
            ("DNI", SqlValue::from(dni)),
            ("Correo", SqlValue::from(correo)),
            ("Nombres", SqlValue::from(nombres)),
            ("Apellidos", SqlValue::from("Rojas")),
            ("Activo", SqlValue::I32(1)),
        ])
    }

    #[test]
    fn test_docente_fallback_order() {
        let resolver = resolver();
        let lookups = HashMap::new();
        let settings = MigrationConfig::default();
        let mut ctx = MapContext::new(&resolver, &lookups, &settings);

        let user_of = |out: MapOutcome| match out {
            MapOutcome::Rows(rows) => rows[0].get("id_usuario").cloned(),
            MapOutcome::Reject(_) => None,
        };
        let out = map_docente(&docente("40123456", "rosa@unap.edu.pe", "Luis"), &mut ctx).unwrap();
        assert_eq!(user_of(out), Some(SqlValue::I64(10)));
        let out = map_docente(&docente("", "ROSA@unap.edu.pe", "Luis"), &mut ctx).unwrap();
        assert_eq!(user_of(out), Some(SqlValue::I64(11)));
        let out = map_docente(&docente("1", "x@y", " luis "), &mut ctx).unwrap();
        assert_eq!(user_of(out), Some(SqlValue::I64(12)));
        let out = map_docente(&docente("1", "x@y", "Pedro"), &mut ctx).unwrap();
        assert_eq!(out, MapOutcome::reject(reasons::UNMAPPED_REFERENCE));
    }

    #[test]
    fn test_unknown_tesista_dni_is_row_level() {
        let resolver = resolver();
        let lookups = HashMap::new();
        let settings = MigrationConfig::default();
        let mut ctx = MapContext::new(&resolver, &lookups, &settings);

        let record = SourceRecord::from_pairs([
            ("Id", SqlValue::I32(3)),
            ("DNI", SqlValue::from("77777777")),
            ("Activo", SqlValue::from("A")),
        ]);
        let err = map_tesista(&record, &mut ctx).unwrap_err();
        assert!(err.is_row_level());
        assert!(matches!(err, MigrateError::KeyNotFound { .. }));

        let record = SourceRecord::from_pairs([
            ("Id", SqlValue::I32(3)),
            ("DNI", SqlValue::from("40123456")),
            ("Activo", SqlValue::from("A")),
        ]);
        match map_tesista(&record, &mut ctx).unwrap() {
            MapOutcome::Rows(rows) => assert_eq!(rows[0].get("estado"), Some(&SqlValue::I32(1))),
            other => panic!("expected a row, got {other:?}"),
        }
    }

    #[test]
    fn test_estudios_university_filter() {
        let resolver = KeyResolver::new();
        let lookups = HashMap::new();
        let settings = MigrationConfig::default();
        let mut ctx = MapContext::new(&resolver, &lookups, &settings);

        for (raw, kept) in [("33", true), ("1", true), ("34", false), ("0", false), ("", false)] {
            let record = SourceRecord::from_pairs([("id_universidad", raw), ("id_usuario", "4")]);
            let out = map_estudio(&record, &mut ctx).unwrap();
            assert_eq!(matches!(out, MapOutcome::Rows(_)), kept, "id_universidad {raw:?}");
        }
    }

    #[test]
    fn test_grado_docente_picks_highest_degree() {
        let mut by_codigo = KeyIndex::new(index::DOCENTE_CODIGO);
        by_codigo.insert(NaturalKey::from_text("D001").unwrap(), 5);
        by_codigo.insert(NaturalKey::from_text("D002").unwrap(), 6);
        let mut usuario = KeyIndex::new(index::USUARIO_DOCENTE_CODIGO);
        usuario.insert(NaturalKey::from_text("D001").unwrap(), 50);
        usuario.insert(NaturalKey::from_text("D002").unwrap(), 60);
        let mut grados = KeyIndex::new(index::GRADO_NOMBRE);
        grados.insert(NaturalKey::from_text("Bachiller").unwrap(), 1);
        grados.insert(NaturalKey::from_text("Magíster").unwrap(), 3);
        grados.insert(NaturalKey::from_text("Doctor").unwrap(), 4);
        let mut estudios = KeyIndex::new(index::ESTUDIO_USUARIO_GRADO);
        for (u, g) in [(50, 1), (50, 3)] {
            let key = NaturalKey::from_parts([&SqlValue::I64(u), &SqlValue::I64(g)]).unwrap();
            estudios.insert(key, u * 10 + g);
        }

        let mut resolver = KeyResolver::new();
        for idx in [by_codigo, usuario, grados, estudios] {
            resolver.add(idx);
        }
        let lookups = HashMap::new();
        let settings = MigrationConfig::default();
        let mut ctx = MapContext::new(&resolver, &lookups, &settings);
        let mut mapper = GradoDocente::default();

        let record = |codigo: &str| {
            SourceRecord::from_pairs([
                ("Codigo", SqlValue::from(codigo)),
                ("Categoria", SqlValue::from("Principal")),
                ("fechaasc", SqlValue::from("2015-03-01")),
            ])
        };
        match mapper.map(&record("D001"), &mut ctx).unwrap() {
            MapOutcome::Rows(rows) => {
                assert_eq!(rows[0].get("id_docente"), Some(&SqlValue::I64(5)));
                assert_eq!(rows[0].text("grado_academico"), Some("Magíster"));
                assert_eq!(rows[0].text("categoria_descripcion"), Some("Principal"));
            }
            other => panic!("expected a row, got {other:?}"),
        }
        assert_eq!(
            mapper.map(&record("D001"), &mut ctx).unwrap(),
            MapOutcome::reject(reasons::DUPLICATE_KEY)
        );
        // no studies on record
        assert_eq!(
            mapper.map(&record("D002"), &mut ctx).unwrap(),
            MapOutcome::reject(reasons::FILTERED)
        );
        assert_eq!(
            mapper.map(&record("D999"), &mut ctx).unwrap(),
            MapOutcome::reject(reasons::UNMAPPED_REFERENCE)
        );
    }
}
