//! # vri-pg-migrate
//!
//! Record reconciliation and bulk-load engine for the VRI academic data
//! migration: legacy MySQL schemas (`absmain`, `pilar3`) plus CSV exports
//! into the new PostgreSQL schema.
//!
//! The library provides:
//!
//! - **Field normalization** of legacy values and placeholders
//! - **Key resolution** from legacy natural keys to new surrogate IDs
//! - **Deduplication** with synthesized replacement values
//! - **Bulk loading** in replace or upsert-light mode over the COPY protocol
//! - **Dependency-ordered runs** with a resumable, HMAC-signed state file
//! - **Reconciliation reports** of every rejected or modified record
//!
//! ## Example
//!
//! ```rust,no_run
//! use vri_pg_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> vri_pg_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let mut orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run_all().await?;
//!     println!("Inserted {} rows", result.rows_inserted());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod core;
pub mod dedup;
pub mod error;
pub mod loader;
pub mod normalize;
pub mod orchestrator;
pub mod report;
pub mod resolve;
pub mod source;
pub mod state;
pub mod target;
pub mod transfer;
pub mod unit;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use core::{NormalizedRecord, SourceRecord, SqlType, SqlValue, TableSpec};
pub use error::{MigrateError, Result};
pub use loader::LoadMode;
pub use orchestrator::{MigrationResult, Orchestrator, RunPhase};
pub use source::{QuerySource, SourceDescriptor, SourceSet};
pub use state::MigrationState;
pub use target::{MemoryTarget, PostgresWriter, TargetWriter};
pub use transfer::{TransferEngine, UnitStats};
pub use unit::{MapContext, MapOutcome, MigrationUnit, RecordMapper};
