//! Dictionary tables: straight copies with a default status column.
//!
//! Most are replaced wholesale. Academic degrees and study acquisition types
//! may hold hand-entered rows, so those two only add missing names.

use crate::config::MigrationConfig;
use crate::dedup::DedupPolicy;
use crate::loader::LoadMode;
use crate::normalize::FieldSpec;
use crate::report::reasons;
use crate::source::SourceDescriptor;
use crate::unit::MigrationUnit;

use super::{ColumnCopy, ABSMAIN};

pub(super) fn units(settings: &MigrationConfig) -> Vec<MigrationUnit> {
    let files = &settings.files;
    vec![
        copy_unit(
            "dic_areas_ocde",
            SourceDescriptor::query(ABSMAIN, "SELECT Id, Nombre FROM ocdeAreas"),
            ColumnCopy::new()
                .key("Id", "id", FieldSpec::Integer)
                .field("Nombre", "nombre", FieldSpec::Text)
                .constant("estado_area", 1),
            &[],
        ),
        copy_unit(
            "dic_facultades",
            SourceDescriptor::query(
                ABSMAIN,
                "SELECT Id, Nombre, Abrev, IdArea FROM dicFacultades WHERE IdArea != 0",
            ),
            ColumnCopy::new()
                .key("Id", "id", FieldSpec::Integer)
                .field("Nombre", "nombre", FieldSpec::Text)
                .field("Abrev", "abreviatura", FieldSpec::Text)
                .field("IdArea", "id_area", FieldSpec::Integer)
                .constant("estado_facultad", 1),
            &["dic_areas_ocde"],
        ),
        copy_unit(
            "dic_categoria",
            SourceDescriptor::query(ABSMAIN, "SELECT Id, Tipo, Nombre, Abrev FROM dicCategorias"),
            ColumnCopy::new()
                .key("Id", "id", FieldSpec::Integer)
                .field("Tipo", "tipo", FieldSpec::Text)
                .field("Nombre", "nombre", FieldSpec::Text)
                .field("Abrev", "abreviatura", FieldSpec::Text)
                .constant("estado_categoria", 1),
            &[],
        ),
        copy_unit(
            "dic_lineas_universidad",
            SourceDescriptor::query(ABSMAIN, "SELECT Id, Nombre FROM dicLineasVRI"),
            ColumnCopy::new()
                .key("Id", "id", FieldSpec::Integer)
                .field("Nombre", "nombre", FieldSpec::Text)
                .constant("estado_linea_universidad", 1),
            &[],
        ),
        copy_unit(
            "dic_carreras",
            SourceDescriptor::query(ABSMAIN, "SELECT Id, IdFacultad, Nombre FROM dicCarreras"),
            ColumnCopy::new()
                .key("Id", "id", FieldSpec::Integer)
                .field("IdFacultad", "id_facultad", FieldSpec::Integer)
                .field("Nombre", "nombre", FieldSpec::Text)
                .constant("estado_carrera", 1),
            &["dic_facultades"],
        ),
        copy_unit(
            "dic_especialidades",
            SourceDescriptor::query(
                ABSMAIN,
                "SELECT Id, IdCarrera, Denominacion FROM dicEspecialis \
                 WHERE Denominacion IS NOT NULL AND Denominacion != '' AND IdCarrera != 0",
            ),
            ColumnCopy::new()
                .key("Id", "id", FieldSpec::Integer)
                .field("IdCarrera", "id_carrera", FieldSpec::Integer)
                .field("Denominacion", "nombre", FieldSpec::Text)
                .constant("estado_especialidad", 0),
            &["dic_carreras"],
        ),
        copy_unit(
            "dic_sedes",
            SourceDescriptor::csv(&files.sedes),
            ColumnCopy::new()
                .key("id", "id", FieldSpec::Integer)
                .field("nombre", "nombre", FieldSpec::Text),
            &[],
        ),
        copy_unit(
            "dic_tipo_trabajos",
            SourceDescriptor::csv(&files.tipo_trabajos),
            ColumnCopy::new()
                .key("id", "id", FieldSpec::Integer)
                .field("nombre", "nombre", FieldSpec::Text)
                .field("detalle", "detalle", FieldSpec::Text)
                .field("estado_tipo_trabajo", "estado_tipo_trabajo", FieldSpec::Integer),
            &[],
        ),
        copy_unit(
            "dic_acciones",
            SourceDescriptor::csv(&files.acciones),
            ColumnCopy::new()
                .key("id", "id", FieldSpec::Integer)
                .field("nombre", "nombre", FieldSpec::Text)
                .field("descripcion", "descripcion", FieldSpec::Text)
                .field("id_etapa_pertenencia", "id_etapa_pertenencia", FieldSpec::Integer),
            &[],
        ),
        copy_unit(
            "dic_visto_bueno",
            SourceDescriptor::csv(&files.visto_bueno),
            ColumnCopy::new()
                .key("id", "id", FieldSpec::Integer)
                .field("descripcion", "descripcion", FieldSpec::Text)
                .field("id_etapa", "id_etapa", FieldSpec::Integer),
            &[],
        ),
        grados_academicos(settings),
        obtencion_estudios(settings),
        copy_unit(
            "dic_disciplinas",
            SourceDescriptor::query(ABSMAIN, "SELECT Id, IdSubArea, Nombre FROM ocdeDisciplinas"),
            ColumnCopy::new()
                .key("Id", "id", FieldSpec::Integer)
                .field("IdSubArea", "id_subarea", FieldSpec::Integer)
                .field("Nombre", "nombre", FieldSpec::Text)
                .constant("estado_disciplina", 1),
            &[],
        ),
        copy_unit(
            "tbl_estructura_academica",
            SourceDescriptor::csv(&files.estructura_academica),
            ColumnCopy::new()
                .key("id", "id", FieldSpec::Integer)
                .field("nombre", "nombre", FieldSpec::Text)
                .field("id_especialidad", "id_especialidad", FieldSpec::Integer)
                .field("id_sede", "id_sede", FieldSpec::Integer)
                .field("estado_ea", "estado_ea", FieldSpec::Integer),
            &["dic_especialidades", "dic_sedes"],
        ),
        copy_unit(
            "tbl_sublineas_vri",
            SourceDescriptor::query(
                ABSMAIN,
                "SELECT Id, id_lineaV, Nombre, IdDiscip, IdCarrera, fecha, Estado FROM tblLineas",
            ),
            ColumnCopy::new()
                .key("Id", "id", FieldSpec::Integer)
                .field("id_lineaV", "id_linea_universidad", FieldSpec::Integer)
                .field("Nombre", "nombre", FieldSpec::Text)
                .field("IdDiscip", "id_disciplina", FieldSpec::Integer)
                .field("IdCarrera", "id_carrera", FieldSpec::Integer)
                .field("fecha", "fecha_registro", FieldSpec::Timestamp)
                .field("fecha", "fecha_modificacion", FieldSpec::Timestamp)
                .field("Estado", "estado_sublinea_vri", FieldSpec::Integer),
            &["dic_lineas_universidad", "dic_disciplinas", "dic_carreras"],
        ),
    ]
}

/// Adds degrees whose name and abbreviation are both new.
fn grados_academicos(settings: &MigrationConfig) -> MigrationUnit {
    let copy = ColumnCopy::new()
        .key("nombre", "nombre", FieldSpec::Text)
        .field("abreviatura", "abreviatura", FieldSpec::Text)
        .constant("estado_dic_grados_academicos", true);
    let table = copy.table_spec("dic_grados_academicos").identity("id");

    MigrationUnit::new(
        "dic_grados_academicos",
        table,
        SourceDescriptor::csv(&settings.files.grados_academicos),
        copy,
    )
    .mode(LoadMode::upsert_light("nombre"))
    .dedup(DedupPolicy::new(&["abreviatura"], reasons::DUPLICATE_KEY))
}

fn obtencion_estudios(settings: &MigrationConfig) -> MigrationUnit {
    let copy = ColumnCopy::new()
        .key("nombre", "nombre", FieldSpec::Text)
        .field("descripcion", "descripcion", FieldSpec::Text);
    let table = copy.table_spec("dic_obtencion_studios").identity("id");

    MigrationUnit::new(
        "dic_obtencion_studios",
        table,
        SourceDescriptor::csv(&settings.files.obtencion_estudios),
        copy,
    )
    .mode(LoadMode::upsert_light("nombre"))
}

/// Replace-mode unit named after its table.
fn copy_unit(
    table: &str,
    source: SourceDescriptor,
    copy: ColumnCopy,
    depends_on: &[&str],
) -> MigrationUnit {
    let spec = copy.table_spec(table);
    MigrationUnit::new(table, spec, source, copy).depends_on(depends_on)
}
