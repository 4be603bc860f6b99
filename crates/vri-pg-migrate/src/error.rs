//! Error types for the migration library.

use thiserror::Error;

/// Exit code for configuration errors (invalid YAML, missing fields, bad unit graph).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for source-side failures (MySQL, CSV files).
pub const EXIT_SOURCE_ERROR: u8 = 2;
/// Exit code for destination failures (PostgreSQL, pool, rolled-back writes).
pub const EXIT_TARGET_ERROR: u8 = 3;
/// Exit code for a unit that failed on its own data or mapping.
pub const EXIT_UNIT_ERROR: u8 = 4;
/// Exit code for state file and lifecycle errors.
pub const EXIT_STATE_ERROR: u8 = 5;
/// Exit code for filesystem errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A source connection or file could not be opened.
    #[error("Source {source_name} unavailable: {message}")]
    SourceUnavailable {
        source_name: String,
        message: String,
    },

    /// A file row did not have the expected shape.
    #[error("Malformed record in {source_name} at line {line}: {message}")]
    MalformedRecord {
        source_name: String,
        line: u64,
        message: String,
    },

    /// Too many malformed rows for the unit to be trusted.
    #[error("Unit {unit}: {malformed} of {total} source rows were malformed (max_error_rate {limit})")]
    ErrorRateExceeded {
        unit: String,
        malformed: u64,
        total: u64,
        limit: f64,
    },

    /// A foreign reference could not be resolved and the unit asked for it to be fatal.
    #[error("Key {key:?} not found in index {index}")]
    KeyNotFound { index: String, key: String },

    /// A mapped value does not match its destination column.
    #[error("Type mismatch for {table}.{column}: {message}")]
    TypeMismatch {
        table: String,
        column: String,
        message: String,
    },

    /// Destination insert or commit failed; the unit's transaction was rolled back.
    #[error("Write failed for table {table}: {message}")]
    WriteFailure { table: String, message: String },

    /// A unit failed and halted the run.
    #[error("Unit {unit} failed: {message}")]
    UnitFailed { unit: String, message: String },

    /// No unit with this name is registered.
    #[error("Unknown migration unit: {0}")]
    UnknownUnit(String),

    /// The unit dependency graph is not a DAG.
    #[error("Dependency cycle between units: {0}")]
    DependencyCycle(String),

    /// Lifecycle call not allowed in the current phase.
    #[error("Cannot {action} while run is {phase}")]
    InvalidTransition { action: String, phase: String },

    /// Source database (MySQL) error
    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// CSV read or write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// State file error
    #[error("State file error: {0}")]
    State(String),

    /// Config hash mismatch on resume
    #[error("Config has changed since last run - cannot resume. Remove the state file to start fresh.")]
    ConfigChanged,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a WriteFailure error
    pub fn write(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::WriteFailure {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a SourceUnavailable error
    pub fn unavailable(source: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::SourceUnavailable {
            source_name: source.into(),
            message: message.to_string(),
        }
    }

    /// Create a TypeMismatch error
    pub fn type_mismatch(
        table: impl Into<String>,
        column: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        MigrateError::TypeMismatch {
            table: table.into(),
            column: column.into(),
            message: message.into(),
        }
    }

    /// Row-level errors are absorbed into the reconciliation report;
    /// everything else halts the unit.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            MigrateError::MalformedRecord { .. } | MigrateError::KeyNotFound { .. }
        )
    }

    /// Process exit code for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::Yaml(_)
            | MigrateError::Json(_)
            | MigrateError::ConfigChanged
            | MigrateError::UnknownUnit(_)
            | MigrateError::DependencyCycle(_) => EXIT_CONFIG_ERROR,
            MigrateError::SourceUnavailable { .. }
            | MigrateError::MalformedRecord { .. }
            | MigrateError::ErrorRateExceeded { .. }
            | MigrateError::Source(_)
            | MigrateError::Csv(_) => EXIT_SOURCE_ERROR,
            MigrateError::WriteFailure { .. }
            | MigrateError::Target(_)
            | MigrateError::Pool { .. } => EXIT_TARGET_ERROR,
            MigrateError::KeyNotFound { .. }
            | MigrateError::TypeMismatch { .. }
            | MigrateError::UnitFailed { .. } => EXIT_UNIT_ERROR,
            MigrateError::State(_) | MigrateError::InvalidTransition { .. } => EXIT_STATE_ERROR,
            MigrateError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
