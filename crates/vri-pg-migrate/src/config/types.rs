//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Legacy MySQL schemas by connection name (`absmain`, `pilar3`).
    pub sources: BTreeMap<String, SourceConfig>,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source database (MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode (default: "preferred").
    #[serde(default = "default_preferred")]
    pub ssl_mode: String,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Directory CSV sources are read from (default: ".").
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory reconciliation CSVs are written to (default: "reports").
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// Write reconciliation entries to this destination table instead of CSV.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_table: Option<String>,

    /// Largest tolerated share of malformed source rows per unit (default: 0.05).
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,

    /// Rows per binary COPY (default: 5000).
    #[serde(default = "default_copy_batch_rows")]
    pub copy_batch_rows: usize,

    /// Destination pool size (default: 2).
    #[serde(default = "default_max_pg_connections")]
    pub max_pg_connections: usize,

    /// Units to run; empty means all.
    #[serde(default)]
    pub units: Vec<String>,

    /// Domain of synthesized e-mail addresses (default: "unap.edu.pe").
    #[serde(default = "default_email_domain")]
    pub email_domain: String,

    /// Login of the service user that assigns juries.
    #[serde(default = "default_system_user_email")]
    pub system_user_email: String,

    /// Highest university id kept when loading studies (default: 33).
    #[serde(default = "default_max_university_id")]
    pub max_university_id: i32,

    /// CSV file names, relative to `data_dir`.
    #[serde(default)]
    pub files: CsvFiles,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            report_dir: default_report_dir(),
            report_table: None,
            max_error_rate: default_max_error_rate(),
            copy_batch_rows: default_copy_batch_rows(),
            max_pg_connections: default_max_pg_connections(),
            units: Vec::new(),
            email_domain: default_email_domain(),
            system_user_email: default_system_user_email(),
            max_university_id: default_max_university_id(),
            files: CsvFiles::default(),
        }
    }
}

/// Flat-file exports consumed by CSV units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvFiles {
    #[serde(default = "default_sedes_csv")]
    pub sedes: PathBuf,

    #[serde(default = "default_estructura_csv")]
    pub estructura_academica: PathBuf,

    #[serde(default = "default_estudios_csv")]
    pub estudios: PathBuf,

    #[serde(default = "default_tipo_trabajos_csv")]
    pub tipo_trabajos: PathBuf,

    #[serde(default = "default_acciones_csv")]
    pub acciones: PathBuf,

    #[serde(default = "default_visto_bueno_csv")]
    pub visto_bueno: PathBuf,

    #[serde(default = "default_grados_academicos_csv")]
    pub grados_academicos: PathBuf,

    #[serde(default = "default_obtencion_estudios_csv")]
    pub obtencion_estudios: PathBuf,
}

impl Default for CsvFiles {
    fn default() -> Self {
        Self {
            sedes: default_sedes_csv(),
            estructura_academica: default_estructura_csv(),
            estudios: default_estudios_csv(),
            tipo_trabajos: default_tipo_trabajos_csv(),
            acciones: default_acciones_csv(),
            visto_bueno: default_visto_bueno_csv(),
            grados_academicos: default_grados_academicos_csv(),
            obtencion_estudios: default_obtencion_estudios_csv(),
        }
    }
}

// Default value functions for serde
fn default_mysql_port() -> u16 {
    3306
}

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_preferred() -> String {
    "preferred".to_string()
}

fn default_require() -> String {
    "require".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_max_error_rate() -> f64 {
    0.05
}

fn default_copy_batch_rows() -> usize {
    5_000
}

fn default_max_pg_connections() -> usize {
    2
}

fn default_email_domain() -> String {
    "unap.edu.pe".to_string()
}

fn default_system_user_email() -> String {
    "sistema@vriunap.pe".to_string()
}

fn default_max_university_id() -> i32 {
    33
}

fn default_sedes_csv() -> PathBuf {
    PathBuf::from("dic_sedes_rows.csv")
}

fn default_estructura_csv() -> PathBuf {
    PathBuf::from("tbl_estructura_academica_rows.csv")
}

fn default_estudios_csv() -> PathBuf {
    PathBuf::from("tbl_estudios_rows.csv")
}

fn default_tipo_trabajos_csv() -> PathBuf {
    PathBuf::from("dic_tipo_trabajos_rows.csv")
}

fn default_acciones_csv() -> PathBuf {
    PathBuf::from("dic_acciones_rows.csv")
}

fn default_visto_bueno_csv() -> PathBuf {
    PathBuf::from("dic_visto_bueno_rows.csv")
}

fn default_grados_academicos_csv() -> PathBuf {
    PathBuf::from("dic_grados_academicos_rows.csv")
}

fn default_obtencion_estudios_csv() -> PathBuf {
    PathBuf::from("dic_obtencion_studios_rows.csv")
}
