//! End-to-end runs of the default catalog against an in-memory destination
//! and canned MySQL result sets.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::mpsc;

use vri_pg_migrate::catalog;
use vri_pg_migrate::source::RecordStream;
use vri_pg_migrate::{
    Config, MemoryTarget, Orchestrator, QuerySource, Result, SourceRecord, SourceSet, SqlValue,
};

/// Answers every query with the rows registered for the table named after
/// its first `FROM`.
struct CannedSource {
    name: String,
    tables: HashMap<String, Vec<SourceRecord>>,
}

impl CannedSource {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tables: HashMap::new(),
        }
    }

    fn table(mut self, table: &str, rows: Vec<SourceRecord>) -> Self {
        self.tables.insert(table.to_string(), rows);
        self
    }
}

#[async_trait]
impl QuerySource for CannedSource {
    fn query(&self, sql: &str) -> RecordStream {
        let table = sql
            .split_whitespace()
            .skip_while(|w| !w.eq_ignore_ascii_case("FROM"))
            .nth(1)
            .unwrap_or_default();
        let rows = self.tables.get(table).cloned().unwrap_or_default();
        let (tx, rx) = mpsc::channel(rows.len().max(1));
        for row in rows {
            tx.try_send(Ok(row)).unwrap();
        }
        rx
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn config(data_dir: &Path) -> Config {
    let yaml = format!(
        r#"
sources:
  absmain: {{ host: localhost, database: absmain, user: root }}
  pilar3: {{ host: localhost, database: pilar3, user: root }}
target: {{ host: localhost, database: vriunap, user: postgres }}
migration:
  data_dir: {dir}
  report_dir: {dir}/reports
  report_table: tbl_reconciliacion
"#,
        dir = data_dir.display()
    );
    Config::from_yaml(&yaml).unwrap()
}

fn orchestrator(
    data_dir: &Path,
    target: Arc<MemoryTarget>,
    absmain: CannedSource,
    pilar3: CannedSource,
) -> Orchestrator {
    let config = config(data_dir);
    let units = catalog::default_units(&config.migration);
    let sources = SourceSet::offline(data_dir)
        .with_query_source(Arc::new(absmain))
        .with_query_source(Arc::new(pilar3));
    Orchestrator::with_target(config, units, target, Arc::new(sources)).unwrap()
}

fn docente(id: i32, nombres: &str, apellidos: &str, dni: &str, correo: &str) -> SourceRecord {
    SourceRecord::from_pairs([
        ("Id", SqlValue::I32(id)),
        ("Nombres", SqlValue::from(nombres)),
        ("Apellidos", SqlValue::from(apellidos)),
        ("DNI", SqlValue::from(dni)),
        ("Correo", SqlValue::from(correo)),
        ("IdCategoria", SqlValue::I32(2)),
        ("Codigo", SqlValue::from("A-01")),
        ("Activo", SqlValue::I32(1)),
    ])
}

fn units(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// (motivo, valor_modificado) pairs of the reconciliation table.
fn reconciliation(target: &MemoryTarget) -> Vec<(String, Option<String>)> {
    let motivos = target.column("tbl_reconciliacion", "motivo");
    let valores = target.column("tbl_reconciliacion", "valor_modificado");
    motivos
        .into_iter()
        .zip(valores)
        .map(|(m, v)| {
            (
                m.as_str().unwrap_or_default().to_string(),
                v.as_str().map(str::to_string),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_person_without_email_or_dni_is_loaded_with_placeholders() {
    let dir = tempfile::tempdir().unwrap();
    let target = Arc::new(MemoryTarget::new());
    let absmain = CannedSource::new("absmain")
        .table("tblDocentes", vec![docente(1, "Ana", "Diaz", "", "")]);
    let mut orch = orchestrator(dir.path(), target.clone(), absmain, CannedSource::new("pilar3"));

    let result = orch
        .run_units(&units(&["system_user", "usuarios_docentes"]))
        .await
        .unwrap();
    assert!(result.is_success());

    let correos = target.column("tbl_usuarios", "correo");
    assert!(correos.contains(&SqlValue::from("dni.ana_diaz@unap.edu.pe")));
    assert!(correos.contains(&SqlValue::from("sistema@vriunap.pe")));
    assert!(target
        .column("tbl_usuarios", "num_doc_identidad")
        .contains(&SqlValue::from("dd_ana_diaz")));

    let docentes = &result.units[1];
    assert_eq!(docentes.stats.accepted, 1);
    assert_eq!(docentes.stats.modified, 1);
    assert!(reconciliation(&target).contains(&(
        "synthesized email".to_string(),
        Some("dni.ana_diaz@unap.edu.pe".to_string())
    )));
}

#[tokio::test]
async fn test_second_person_with_same_full_name_is_only_reported() {
    let dir = tempfile::tempdir().unwrap();
    let target = Arc::new(MemoryTarget::new());
    let absmain = CannedSource::new("absmain").table(
        "tblDocentes",
        vec![
            docente(1, "Ana", "Diaz", "40123456", "ana@unap.edu.pe"),
            docente(2, " ANA ", "diaz", "40999999", "ana.diaz@gmail.com"),
        ],
    );
    let mut orch = orchestrator(dir.path(), target.clone(), absmain, CannedSource::new("pilar3"));

    let result = orch
        .run_units(&units(&["system_user", "usuarios_docentes"]))
        .await
        .unwrap();
    assert!(result.is_success());

    let correos = target.column("tbl_usuarios", "correo");
    assert!(correos.contains(&SqlValue::from("ana@unap.edu.pe")));
    assert!(!correos.contains(&SqlValue::from("ana.diaz@gmail.com")));
    assert_eq!(result.units[1].stats.rejected, 1);
    assert_eq!(
        reconciliation(&target),
        vec![("duplicate full name".to_string(), None)]
    );
}

#[tokio::test]
async fn test_collisions_with_existing_users_are_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let target = Arc::new(MemoryTarget::new());
    target.seed(
        "tbl_usuarios",
        &["id", "nombres", "apellidos", "num_doc_identidad", "correo"],
        vec![vec![
            SqlValue::I32(10),
            SqlValue::from("Luis"),
            SqlValue::from("Rojas"),
            SqlValue::from("40123456"),
            SqlValue::from("luis@unap.edu.pe"),
        ]],
    );
    let absmain = CannedSource::new("absmain").table(
        "tblDocentes",
        vec![
            docente(1, "Ana", "Diaz", "40123456", "LUIS@unap.edu.pe"),
            docente(2, "Pedro", "Paz", "", "luis@unap.edu.pe"),
        ],
    );
    let mut orch = orchestrator(dir.path(), target.clone(), absmain, CannedSource::new("pilar3"));

    let result = orch
        .run_units(&units(&["system_user", "usuarios_docentes"]))
        .await
        .unwrap();
    assert!(result.is_success());
    assert_eq!(result.units[1].stats.accepted, 2);
    assert_eq!(result.units[1].stats.modified, 2);

    let dnis = target.column("tbl_usuarios", "num_doc_identidad");
    assert!(dnis.contains(&SqlValue::from("dd40123456")));
    assert!(dnis.contains(&SqlValue::from("dd_pedro_paz")));
    let correos = target.column("tbl_usuarios", "correo");
    assert!(correos.contains(&SqlValue::from("dni.40123456@unap.edu.pe")));
    assert!(correos.contains(&SqlValue::from("dni.pedro_paz@unap.edu.pe")));

    let report = reconciliation(&target);
    assert!(report.contains(&(
        "duplicate national id; duplicate email".to_string(),
        Some("num_doc_identidad=dd40123456, correo=dni.40123456@unap.edu.pe".to_string())
    )));
    assert!(report.contains(&(
        "synthesized national id".to_string(),
        Some("dd_pedro_paz".to_string())
    )));
    assert!(report.contains(&(
        "duplicate email".to_string(),
        Some("correo=dni.pedro_paz@unap.edu.pe".to_string())
    )));
}

#[tokio::test]
async fn test_unmapped_reference_is_reported_and_unit_completes() {
    let dir = tempfile::tempdir().unwrap();
    let target = Arc::new(MemoryTarget::new());
    target.seed(
        "tbl_usuarios",
        &["id", "nombres", "apellidos", "num_doc_identidad", "correo"],
        vec![vec![
            SqlValue::I32(10),
            SqlValue::from("Luis"),
            SqlValue::from("Rojas"),
            SqlValue::from("40123456"),
            SqlValue::from("luis@unap.edu.pe"),
        ]],
    );
    let absmain = CannedSource::new("absmain").table(
        "tblDocentes",
        vec![
            docente(1, "Luis", "Rojas", "40123456", "luis@unap.edu.pe"),
            docente(2, "Pedro", "Paz", "41000000", "pedro@unap.edu.pe"),
        ],
    );
    let mut orch = orchestrator(dir.path(), target.clone(), absmain, CannedSource::new("pilar3"));

    let result = orch.run_unit("tbl_docentes").await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.units[0].stats.accepted, 1);
    assert_eq!(result.units[0].stats.rejected, 1);

    assert_eq!(target.column("tbl_docentes", "id_usuario"), vec![SqlValue::I32(10)]);
    assert_eq!(target.column("tbl_docentes", "id_antiguo"), vec![SqlValue::I32(1)]);
    assert_eq!(
        reconciliation(&target),
        vec![("unmapped reference".to_string(), None)]
    );
}

#[tokio::test]
async fn test_replace_with_everything_rejected_empties_the_table() {
    let dir = tempfile::tempdir().unwrap();
    let target = Arc::new(MemoryTarget::new());
    target.seed(
        "dic_areas_ocde",
        &["id", "nombre"],
        vec![vec![SqlValue::I32(9), SqlValue::from("Antigua")]],
    );
    let absmain = CannedSource::new("absmain").table(
        "ocdeAreas",
        vec![
            SourceRecord::from_pairs([("Id", ""), ("Nombre", "Ciencias")]),
            SourceRecord::from_pairs([("Id", "NULL"), ("Nombre", "Letras")]),
        ],
    );
    let mut orch = orchestrator(dir.path(), target.clone(), absmain, CannedSource::new("pilar3"));

    let result = orch.run_unit("dic_areas_ocde").await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.units[0].stats.inserted, 0);
    assert!(target.rows("dic_areas_ocde").is_empty());
    assert_eq!(reconciliation(&target).len(), 2);
}

fn write_csv(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

fn fecha(y: i32, m: u32, d: u32) -> SqlValue {
    SqlValue::DateTime(NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(9, 30, 0).unwrap())
}

#[tokio::test]
async fn test_full_catalog_run() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "dic_sedes_rows.csv", "id,nombre\n1,Puno\n2,Juliaca\n");
    write_csv(
        dir.path(),
        "tbl_estructura_academica_rows.csv",
        "id,nombre,id_especialidad,id_sede,estado_ea\n1,Ingenieria de Sistemas,1,1,1\n",
    );
    write_csv(
        dir.path(),
        "tbl_estudios_rows.csv",
        "id_usuario,id_universidad,id_grado_academico,titulo_profesional,especialidad,fecha_emision,resolucion,id_tipo_obtencion\n\
         2,1,1,Ingeniero,Sistemas,2015-03-01,R-1,1\n\
         2,40,1,Magister,Sistemas,2018-03-01,R-2,1\n",
    );
    write_csv(
        dir.path(),
        "dic_tipo_trabajos_rows.csv",
        "id,nombre,detalle,estado_tipo_trabajo\n1,Tesis,Trabajo de investigacion,1\n",
    );
    write_csv(
        dir.path(),
        "dic_acciones_rows.csv",
        "id,nombre,descripcion,id_etapa_pertenencia\n1,Registrar,Registro del proyecto,\n",
    );
    write_csv(
        dir.path(),
        "dic_visto_bueno_rows.csv",
        "id,descripcion,id_etapa\n1,Visto bueno del asesor,2\n",
    );
    write_csv(
        dir.path(),
        "dic_grados_academicos_rows.csv",
        "nombre,abreviatura\nBachiller,B\nMagíster,M\nMaestro,M\n",
    );
    write_csv(
        dir.path(),
        "dic_obtencion_studios_rows.csv",
        "nombre,descripcion\nNacional,Obtenido en el pais\n",
    );

    let absmain = CannedSource::new("absmain")
        .table(
            "tblDocentes",
            vec![
                docente(1, "Luis", "Rojas", "40123456", "luis@unap.edu.pe"),
                docente(2, "Pedro", "Paz", "", ""),
            ],
        )
        .table(
            "dicCategorias",
            vec![SourceRecord::from_pairs([
                ("Id", SqlValue::I32(2)),
                ("Tipo", SqlValue::from("Nombrado")),
                ("Nombre", SqlValue::from("Principal")),
                ("Abrev", SqlValue::from("PR")),
            ])],
        )
        .table(
            "tblLineas",
            vec![SourceRecord::from_pairs([
                ("Id", SqlValue::I32(1)),
                ("id_lineaV", SqlValue::I32(1)),
                ("Nombre", SqlValue::from("Software")),
                ("IdDiscip", SqlValue::I32(3)),
                ("IdCarrera", SqlValue::I32(1)),
                ("fecha", fecha(2020, 1, 1)),
                ("Estado", SqlValue::I32(1)),
            ])],
        );

    let tramite = SourceRecord::from_pairs([
        ("Id", SqlValue::I32(500)),
        ("Codigo", SqlValue::from("2023-001")),
        ("Estado", SqlValue::I32(7)),
        ("IdLinea", SqlValue::I32(1)),
        ("FechRegProy", fecha(2023, 4, 1)),
        ("IdJurado1", SqlValue::I32(1)),
        ("IdJurado2", SqlValue::I32(2)),
        ("IdJurado3", SqlValue::I32(77)),
        ("IdJurado4", SqlValue::I32(0)),
    ]);
    let sin_etapa = SourceRecord::from_pairs([
        ("Id", SqlValue::I32(501)),
        ("Codigo", SqlValue::from("2023-002")),
        ("Estado", SqlValue::I32(30)),
    ]);
    let pilar3 = CannedSource::new("pilar3")
        .table(
            "tblTesistas",
            vec![SourceRecord::from_pairs([
                ("Id", SqlValue::I32(8)),
                ("Nombres", SqlValue::from("Rosa")),
                ("Apellidos", SqlValue::from("Quispe")),
                ("DNI", SqlValue::from("70000001")),
                ("Correo", SqlValue::from("rosa@est.unap.edu.pe")),
                ("Codigo", SqlValue::from("120001")),
                ("IdCarrera", SqlValue::I32(1)),
                ("Activo", SqlValue::from("A")),
            ])],
        )
        .table("tesTramites", vec![tramite, sin_etapa])
        .table(
            "logTramites",
            vec![SourceRecord::from_pairs([
                ("IdTramite", SqlValue::I32(500)),
                ("Fecha", fecha(2023, 5, 2)),
            ])],
        )
        .table(
            "tesJuCambios",
            vec![
                SourceRecord::from_pairs([
                    ("IdTramite", SqlValue::I32(500)),
                    ("IdJurado1", SqlValue::I32(1)),
                    ("Motivo", SqlValue::from("Sorteo inicial")),
                    ("Fecha", fecha(2023, 5, 3)),
                ]),
                SourceRecord::from_pairs([
                    ("IdTramite", SqlValue::I32(500)),
                    ("IdJurado1", SqlValue::I32(2)),
                    ("Motivo", SqlValue::from("Renuncia")),
                    ("Fecha", fecha(2023, 6, 3)),
                ]),
            ],
        )
        .table(
            "tblCorrects",
            vec![SourceRecord::from_pairs([
                ("IdTramite", SqlValue::I32(500)),
                ("IdDocente", SqlValue::I32(2)),
                ("Fecha", fecha(2023, 7, 1)),
                ("Mensaje", SqlValue::from("Revisar objetivos")),
            ])],
        );

    let target = Arc::new(MemoryTarget::new());
    let mut orch = orchestrator(dir.path(), target.clone(), absmain, pilar3);
    let result = orch.run_all().await.unwrap();

    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(result.units.len(), catalog::default_units(&Default::default()).len());
    assert!(result.units.iter().all(|u| u.status == "completed"));

    // schema adjustments first
    let statements = target.statements();
    assert_eq!(
        statements[0],
        "ALTER TABLE tbl_docentes ADD COLUMN IF NOT EXISTS id_antiguo integer"
    );

    assert_eq!(target.rows("tbl_usuarios").len(), 4);
    assert_eq!(target.rows("tbl_docentes").len(), 2);
    assert_eq!(target.rows("tbl_tesistas").len(), 1);
    assert_eq!(target.column("tbl_estudios", "id_universidad"), vec![SqlValue::I32(1)]);
    assert_eq!(target.column("dic_sedes", "nombre").len(), 2);
    assert_eq!(target.column("dic_tipo_trabajos", "id"), vec![SqlValue::I32(1)]);
    assert_eq!(target.column("dic_acciones", "id_etapa_pertenencia"), vec![SqlValue::Null]);
    assert_eq!(target.rows("dic_visto_bueno").len(), 1);
    assert_eq!(target.rows("dic_obtencion_studios").len(), 1);
    // same abbreviation as Magíster
    assert_eq!(
        target.column("dic_grados_academicos", "nombre"),
        vec![SqlValue::from("Bachiller"), SqlValue::from("Magíster")]
    );

    // both professors share a code: the first one wins
    assert_eq!(
        target.column("tbl_grado_docente", "grado_academico"),
        vec![SqlValue::from("Bachiller")]
    );

    assert_eq!(target.column("tbl_tramites", "id_etapa"), vec![SqlValue::I32(5)]);
    assert_eq!(target.column("tbl_tramites", "id_antiguo"), vec![SqlValue::I32(500)]);

    // slot 3 names an unknown professor
    assert_eq!(
        target.column("tbl_conformacion_jurados", "id_orden"),
        vec![SqlValue::I32(1), SqlValue::I32(2)]
    );
    assert_eq!(
        target.column("tbl_conformacion_jurados", "fecha_asignacion")[0],
        fecha(2023, 5, 2)
    );
    assert_eq!(
        target.column("tbl_asignacion_jurado", "iteracion"),
        vec![SqlValue::I32(1), SqlValue::I32(2)]
    );
    assert_eq!(
        target.column("tbl_asignacion_jurado", "id_tipo_evento"),
        vec![SqlValue::I32(4), SqlValue::I32(7)]
    );
    assert_eq!(
        target.column("tbl_correcciones_jurados", "orden"),
        vec![SqlValue::I32(2)]
    );

    let report = reconciliation(&target);
    assert!(report.contains(&("unmapped stage".to_string(), None)));
    assert!(report.contains(&("filtered".to_string(), None)));
    assert!(report.contains(&("duplicate key".to_string(), None)));
    assert!(report.contains(&(
        "unmapped reference".to_string(),
        Some("IdJurado3=77".to_string())
    )));
}
