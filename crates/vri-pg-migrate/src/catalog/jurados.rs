//! Thesis processes (`tbl_tramites`) and their jury history.
//!
//! Legacy process and professor IDs are resolved through the `id_antiguo`
//! bridging columns written by `tbl_tramites` and `tbl_docentes`.

use std::collections::HashMap;

use crate::config::MigrationConfig;
use crate::core::{NormalizedRecord, SourceRecord, SqlType, SqlValue, TableSpec};
use crate::error::Result;
use crate::normalize::FieldSpec;
use crate::report::reasons;
use crate::resolve::{KeyIndexSpec, LookupSpec, NaturalKey, Resolution};
use crate::source::SourceDescriptor;
use crate::unit::{MapContext, MapOutcome, MigrationUnit, RecordMapper};

use super::{
    bridging_column, index, legacy_id, legacy_index, system_user_id, usuario_indexes, PILAR3,
};

/// Stage all jury rows are recorded under.
const JURY_STAGE: i32 = 5;
const JURY_SLOTS: [&str; 4] = ["IdJurado1", "IdJurado2", "IdJurado3", "IdJurado4"];

const CONFORMACION_ID: &str = "conformacion_por_tramite_docente";
const CONFORMACION_ORDEN: &str = "orden_por_tramite_docente";
const FECHAS_REVISION: &str = "fecha_envio_revision";

/// New `id_etapa` for a legacy `tesTramites.Estado`.
pub fn stage_for(estado: i32) -> Option<i32> {
    Some(match estado {
        0 | 1 => 1,
        2 | 3 => 2,
        4 => 4,
        5 => 3,
        6 => 4,
        7 => 5,
        8 => 8,
        9 => 10,
        10 | 11 => 11,
        12 => 12,
        13 => 13,
        14 => 14,
        _ => return None,
    })
}

/// `id_tipo_evento` from the free-text reason of a jury change.
pub fn event_type(motivo: Option<&str>) -> i32 {
    let motivo = motivo.unwrap_or_default().to_lowercase();
    if motivo.contains("intento") {
        1
    } else if motivo.contains("sorteo") {
        4
    } else {
        7
    }
}

pub(super) fn units(_settings: &MigrationConfig) -> Vec<MigrationUnit> {
    vec![tramites(), conformacion(), asignacion(), correcciones()]
}

fn tramites() -> MigrationUnit {
    let table = TableSpec::new("tbl_tramites")
        .required("id_antiguo", SqlType::Integer)
        .column("codigo_proyecto", SqlType::Text)
        .required("id_etapa", SqlType::Integer)
        .column("id_sublinea_vri", SqlType::Integer)
        .column("id_modalidad", SqlType::Integer)
        .column("id_tipo_trabajo", SqlType::Integer)
        .column("id_denominacion", SqlType::Integer)
        .column("fecha_registro", SqlType::Timestamp)
        .column("estado_tramite", SqlType::Integer)
        .identity("id");

    MigrationUnit::new(
        "tbl_tramites",
        table,
        SourceDescriptor::query(
            PILAR3,
            "SELECT Id, Codigo, Estado, IdLinea, FechRegProy FROM tesTramites ORDER BY Id",
        ),
        map_tramite,
    )
    .depends_on(&["tbl_sublineas_vri", "dic_tipo_trabajos"])
    .prepare(&bridging_column("tbl_tramites"))
}

fn map_tramite(record: &SourceRecord, _ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
    let Some(id_antiguo) = legacy_id(record, "Id") else {
        return Ok(MapOutcome::reject(reasons::MISSING_IDENTITY));
    };
    let Some(id_etapa) = record.int("Estado").and_then(stage_for) else {
        return Ok(MapOutcome::reject(reasons::UNMAPPED_STAGE));
    };

    // modality, work type and denomination have no legacy source
    Ok(MapOutcome::row(
        NormalizedRecord::new()
            .with("id_antiguo", id_antiguo)
            .with("codigo_proyecto", record.text("Codigo"))
            .with("id_etapa", id_etapa)
            .with("id_sublinea_vri", record.field("IdLinea", FieldSpec::Integer).into_value())
            .with("id_modalidad", 1)
            .with("id_tipo_trabajo", 1)
            .with("id_denominacion", 1)
            .with("fecha_registro", record.field("FechRegProy", FieldSpec::Timestamp).into_value())
            .with("estado_tramite", 1),
    ))
}

/// Resolve the jury slots of a legacy row. Slots naming a professor that
/// is not loaded are noted on the context and left out.
fn jury_slots(record: &SourceRecord, ctx: &mut MapContext<'_>) -> Result<Vec<(i32, i64)>> {
    let mut slots = Vec::new();
    for (orden, field) in (1..).zip(JURY_SLOTS) {
        let Some(legacy) = legacy_id(record, field) else {
            continue;
        };
        match ctx
            .resolver
            .resolve(index::DOCENTE_ANTIGUO, Some(&NaturalKey::from_int(legacy)))?
        {
            Resolution::Found(id_docente) => slots.push((orden, id_docente)),
            Resolution::NotFound => {
                ctx.note_modified(reasons::UNMAPPED_REFERENCE, format!("{}={}", field, legacy))
            }
        }
    }
    Ok(slots)
}

fn conformacion() -> MigrationUnit {
    let table = TableSpec::new("tbl_conformacion_jurados")
        .required("id_tramite", SqlType::Integer)
        .required("id_docente", SqlType::Integer)
        .required("id_orden", SqlType::Integer)
        .column("id_etapa", SqlType::Integer)
        .column("id_usuario_asignador", SqlType::Integer)
        .column("id_asignacion", SqlType::Integer)
        .column("fecha_asignacion", SqlType::Timestamp)
        .column("estado_cj", SqlType::Integer)
        .identity("id");
    let [_, by_correo, _] = usuario_indexes();

    MigrationUnit::new(
        "tbl_conformacion_jurados",
        table,
        SourceDescriptor::query(
            PILAR3,
            "SELECT Id, IdJurado1, IdJurado2, IdJurado3, IdJurado4 FROM tesTramites ORDER BY Id",
        ),
        map_conformacion,
    )
    .depends_on(&["tbl_tramites", "tbl_docentes", "system_user"])
    .key_index(legacy_index(index::TRAMITE_ANTIGUO, "tbl_tramites"))
    .key_index(legacy_index(index::DOCENTE_ANTIGUO, "tbl_docentes"))
    .key_index(by_correo)
    .lookup(LookupSpec::new(
        FECHAS_REVISION,
        SourceDescriptor::query(
            PILAR3,
            "SELECT IdTramite, MAX(Fecha) AS Fecha FROM logTramites \
             WHERE Accion = 'Proyecto enviado a Revisión' GROUP BY IdTramite",
        ),
        &["IdTramite"],
    ))
    .prepare("ALTER TABLE tbl_conformacion_jurados ALTER COLUMN id_asignacion DROP NOT NULL")
    .prepare("ALTER TABLE tbl_conformacion_jurados ALTER COLUMN fecha_asignacion DROP NOT NULL")
}

/// One row per filled jury slot of the initial committee.
fn map_conformacion(record: &SourceRecord, ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
    let Some(legacy) = legacy_id(record, "Id") else {
        return Ok(MapOutcome::reject(reasons::MISSING_IDENTITY));
    };
    let key = NaturalKey::from_int(legacy);
    let id_tramite = ctx.resolver.require(index::TRAMITE_ANTIGUO, &key)?;
    let asignador = system_user_id(ctx)?;
    let fecha = match ctx.lookup(FECHAS_REVISION)?.get(&key) {
        Some(log) => log.field("Fecha", FieldSpec::Timestamp).into_value(),
        None => SqlValue::Null,
    };

    let rows = jury_slots(record, ctx)?
        .into_iter()
        .map(|(orden, id_docente)| {
            NormalizedRecord::new()
                .with("id_tramite", id_tramite)
                .with("id_docente", id_docente)
                .with("id_orden", orden)
                .with("id_etapa", JURY_STAGE)
                .with("id_usuario_asignador", asignador)
                .with("id_asignacion", SqlValue::Null)
                .with("fecha_asignacion", fecha.clone())
                .with("estado_cj", 1)
        })
        .collect();
    Ok(MapOutcome::Rows(rows))
}

fn asignacion() -> MigrationUnit {
    let table = TableSpec::new("tbl_asignacion_jurado")
        .required("tramite_id", SqlType::Integer)
        .column("id_etapa", SqlType::Integer)
        .required("id_orden", SqlType::Integer)
        .required("iteracion", SqlType::Integer)
        .column("id_tipo_evento", SqlType::Integer)
        .required("docente_id", SqlType::Integer)
        .column("id_usuario_asignador", SqlType::Integer)
        .column("fecha_evento", SqlType::Timestamp)
        .column("estado", SqlType::Integer)
        .identity("id");
    let [_, by_correo, _] = usuario_indexes();

    MigrationUnit::new(
        "tbl_asignacion_jurado",
        table,
        SourceDescriptor::query(
            PILAR3,
            "SELECT IdTramite, IdJurado1, IdJurado2, IdJurado3, IdJurado4, Motivo, Fecha \
             FROM tesJuCambios ORDER BY IdTramite, Fecha ASC",
        ),
        JuryChanges::default(),
    )
    .depends_on(&["tbl_conformacion_jurados"])
    .key_index(legacy_index(index::TRAMITE_ANTIGUO, "tbl_tramites"))
    .key_index(legacy_index(index::DOCENTE_ANTIGUO, "tbl_docentes"))
    .key_index(by_correo)
}

/// Jury changes, numbered per process in source order.
#[derive(Debug, Default)]
struct JuryChanges {
    iterations: HashMap<i64, i32>,
}

impl RecordMapper for JuryChanges {
    fn map(&mut self, record: &SourceRecord, ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
        let Some(legacy) = legacy_id(record, "IdTramite") else {
            return Ok(MapOutcome::reject(reasons::MISSING_IDENTITY));
        };
        let tramite_id = ctx
            .resolver
            .require(index::TRAMITE_ANTIGUO, &NaturalKey::from_int(legacy))?;
        let asignador = system_user_id(ctx)?;

        let iteracion = self.iterations.entry(legacy).or_insert(0);
        *iteracion += 1;
        let iteracion = *iteracion;
        let tipo_evento = event_type(record.text("Motivo").as_deref());
        let fecha = record.field("Fecha", FieldSpec::Timestamp).into_value();

        let rows = jury_slots(record, ctx)?
            .into_iter()
            .map(|(orden, docente_id)| {
                NormalizedRecord::new()
                    .with("tramite_id", tramite_id)
                    .with("id_etapa", JURY_STAGE)
                    .with("id_orden", orden)
                    .with("iteracion", iteracion)
                    .with("id_tipo_evento", tipo_evento)
                    .with("docente_id", docente_id)
                    .with("id_usuario_asignador", asignador)
                    .with("fecha_evento", fecha.clone())
                    .with("estado", 0)
            })
            .collect();
        Ok(MapOutcome::Rows(rows))
    }
}

fn correcciones() -> MigrationUnit {
    let table = TableSpec::new("tbl_correcciones_jurados")
        .required("id_conformacion_jurado", SqlType::Integer)
        .column("orden", SqlType::Integer)
        .column("mensaje_correccion", SqlType::Text)
        .column("Fecha_correccion", SqlType::Timestamp)
        .column("estado_correccion", SqlType::Integer)
        .identity("id");
    let pair = ["id_tramite", "id_docente"];

    MigrationUnit::new(
        "tbl_correcciones_jurados",
        table,
        SourceDescriptor::query(
            PILAR3,
            "SELECT IdTramite, IdDocente, Fecha, Mensaje FROM tblCorrects",
        ),
        map_correccion,
    )
    .depends_on(&["tbl_conformacion_jurados"])
    .key_index(legacy_index(index::TRAMITE_ANTIGUO, "tbl_tramites"))
    .key_index(legacy_index(index::DOCENTE_ANTIGUO, "tbl_docentes"))
    .key_index(KeyIndexSpec::new(CONFORMACION_ID, "tbl_conformacion_jurados", &pair, "id"))
    .key_index(KeyIndexSpec::new(
        CONFORMACION_ORDEN,
        "tbl_conformacion_jurados",
        &pair,
        "id_orden",
    ))
}

/// A correction belongs to the committee seat of (process, professor).
fn map_correccion(record: &SourceRecord, ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
    let (Some(tramite), Some(docente)) =
        (legacy_id(record, "IdTramite"), legacy_id(record, "IdDocente"))
    else {
        return Ok(MapOutcome::reject(reasons::MISSING_IDENTITY));
    };
    let id_tramite = ctx
        .resolver
        .require(index::TRAMITE_ANTIGUO, &NaturalKey::from_int(tramite))?;
    let id_docente = ctx
        .resolver
        .require(index::DOCENTE_ANTIGUO, &NaturalKey::from_int(docente))?;

    let seat = NaturalKey::from_parts([&SqlValue::I64(id_tramite), &SqlValue::I64(id_docente)]);
    let Some(seat) = seat else {
        return Ok(MapOutcome::reject(reasons::UNMAPPED_REFERENCE));
    };
    let id_conformacion = ctx.resolver.require(CONFORMACION_ID, &seat)?;
    let orden = ctx.resolver.resolve(CONFORMACION_ORDEN, Some(&seat))?.id();

    Ok(MapOutcome::row(
        NormalizedRecord::new()
            .with("id_conformacion_jurado", id_conformacion)
            .with("orden", orden)
            .with("mensaje_correccion", record.text("Mensaje"))
            .with("Fecha_correccion", record.field("Fecha", FieldSpec::Timestamp).into_value())
            .with("estado_correccion", 1),
    ))
}
