//! `tbl_usuarios`: the service user, then professors and thesis students.
//!
//! All three load in upsert-light mode on `correo` so hand-entered users
//! survive, and the two people units share one deduplication policy seeded
//! from whatever the table already holds.

use crate::config::MigrationConfig;
use crate::core::{NormalizedRecord, SourceRecord, SqlType, SqlValue, TableSpec};
use crate::dedup::{placeholder_email, placeholder_national_id, DedupPolicy, SecondaryRule, Synthesis};
use crate::error::Result;
use crate::loader::LoadMode;
use crate::normalize::FieldSpec;
use crate::report::reasons;
use crate::source::SourceDescriptor;
use crate::unit::{MapContext, MapOutcome, MigrationUnit};

use super::{ColumnCopy, ABSMAIN, PILAR3};

pub(super) fn units(settings: &MigrationConfig) -> Vec<MigrationUnit> {
    vec![system_user(settings), docentes(settings), tesistas(settings)]
}

fn usuarios_table() -> TableSpec {
    TableSpec::new("tbl_usuarios")
        .required("nombres", SqlType::Text)
        .required("apellidos", SqlType::Text)
        .column("tipo_doc_identidad", SqlType::Text)
        .column("num_doc_identidad", SqlType::Text)
        .required("correo", SqlType::Text)
        .column("telefono", SqlType::Text)
        .column("direccion", SqlType::Text)
        .column("sexo", SqlType::Text)
        .column("fecha_nacimiento", SqlType::Date)
        .column("contrasenia", SqlType::Text)
        .column("estado", SqlType::Integer)
        .identity("id")
}

/// Source national ID before any placeholder, kept as a scratch column so
/// a rebuilt e-mail falls back to the name slug rather than `dd_<slug>`.
const SOURCE_DNI: &str = "_dni_origen";

/// Full name first, then national ID (prefixed `dd`), then e-mail (rebuilt
/// from the source national ID).
pub(crate) fn people_policy(settings: &MigrationConfig) -> DedupPolicy {
    DedupPolicy::new(&["nombres", "apellidos"], reasons::DUPLICATE_FULL_NAME)
        .secondary(SecondaryRule::new(
            "num_doc_identidad",
            Synthesis::Prefix("dd".to_string()),
            reasons::DUPLICATE_NATIONAL_ID,
        ))
        .secondary(SecondaryRule::new(
            "correo",
            Synthesis::Placeholder {
                from_field: SOURCE_DNI.to_string(),
                prefix: "dni.".to_string(),
                suffix: format!("@{}", settings.email_domain),
            },
            reasons::DUPLICATE_EMAIL,
        ))
}

fn system_user(settings: &MigrationConfig) -> MigrationUnit {
    let seed = SourceRecord::from_pairs([
        ("Nombres", SqlValue::from("Sistema")),
        ("Apellidos", SqlValue::from("Usuario del Sistema")),
        ("DNI", SqlValue::from("99999999")),
        ("Correo", SqlValue::from(settings.system_user_email.as_str())),
        ("Activo", SqlValue::from(1)),
    ]);
    let copy = ColumnCopy::new()
        .key("Nombres", "nombres", FieldSpec::Text)
        .key("Apellidos", "apellidos", FieldSpec::Text)
        .key("Correo", "correo", FieldSpec::Text)
        .field("DNI", "num_doc_identidad", FieldSpec::Text)
        .field("Activo", "estado", FieldSpec::Integer);
    let table = copy.table_spec("tbl_usuarios").identity("id");

    MigrationUnit::new("system_user", table, SourceDescriptor::Inline(vec![seed]), copy)
        .mode(LoadMode::upsert_light("correo"))
}

fn docentes(settings: &MigrationConfig) -> MigrationUnit {
    MigrationUnit::new(
        "usuarios_docentes",
        usuarios_table(),
        SourceDescriptor::query(
            ABSMAIN,
            "SELECT Id, Nombres, Apellidos, DNI, Correo, NroCelular, Direccion, Sexo, \
             FechaNac, Clave, Activo FROM tblDocentes ORDER BY Id",
        ),
        map_docente,
    )
    .depends_on(&["system_user"])
    .mode(LoadMode::upsert_light("correo"))
    .dedup(people_policy(settings))
}

fn tesistas(settings: &MigrationConfig) -> MigrationUnit {
    MigrationUnit::new(
        "usuarios_tesistas",
        usuarios_table(),
        SourceDescriptor::query(
            PILAR3,
            "SELECT Id, Nombres, Apellidos, DNI, Correo, NroCelular, Direccion, Sexo, \
             Clave FROM tblTesistas ORDER BY Id",
        ),
        map_tesista,
    )
    .depends_on(&["usuarios_docentes"])
    .mode(LoadMode::upsert_light("correo"))
    .dedup(people_policy(settings))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Docente,
    Tesista,
}

fn map_docente(record: &SourceRecord, ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
    Ok(map_person(record, ctx, Origin::Docente))
}

fn map_tesista(record: &SourceRecord, ctx: &mut MapContext<'_>) -> Result<MapOutcome> {
    Ok(map_person(record, ctx, Origin::Tesista))
}

fn map_person(record: &SourceRecord, ctx: &mut MapContext<'_>, origin: Origin) -> MapOutcome {
    let (Some(nombres), Some(apellidos)) = (record.text("Nombres"), record.text("Apellidos"))
    else {
        return MapOutcome::reject(reasons::MISSING_IDENTITY);
    };
    let identity = format!("{} {}", nombres, apellidos);
    let dni = record.text("DNI");

    let correo = match record.text("Correo") {
        Some(correo) => correo,
        None => {
            let email = placeholder_email(dni.as_deref(), &identity, &ctx.settings.email_domain);
            ctx.note_modified(reasons::SYNTHESIZED_EMAIL, email.clone());
            email
        }
    };
    let source_dni = dni.clone();
    let dni = match dni {
        Some(dni) => dni,
        None => {
            let dni = placeholder_national_id(&identity);
            ctx.note_modified(reasons::SYNTHESIZED_NATIONAL_ID, dni.clone());
            dni
        }
    };

    let (tipo_doc, fecha_nacimiento, estado) = match origin {
        Origin::Docente => (
            Some("DNI"),
            record.field("FechaNac", FieldSpec::Date).into_value(),
            record.field("Activo", FieldSpec::Integer).into_value(),
        ),
        Origin::Tesista => (None, SqlValue::Null, SqlValue::I32(1)),
    };

    MapOutcome::row(
        NormalizedRecord::new()
            .with("nombres", nombres)
            .with("apellidos", apellidos)
            .with("tipo_doc_identidad", tipo_doc)
            .with("num_doc_identidad", dni)
            .with(SOURCE_DNI, source_dni)
            .with("correo", correo)
            .with("telefono", record.text("NroCelular"))
            .with("direccion", record.text("Direccion"))
            .with("sexo", record.text("Sexo"))
            .with("fecha_nacimiento", fecha_nacimiento)
            .with("contrasenia", record.text("Clave"))
            .with("estado", estado),
    )
}
