//! Core types shared across the engine.
//!
//! - [`value`]: typed SQL values and destination column types
//! - [`record`]: source rows and mapped destination rows
//! - [`schema`]: destination table descriptions and identifier quoting

pub mod record;
pub mod schema;
pub mod value;

pub use record::{NormalizedRecord, SourceRecord};
pub use schema::{qualify_table, quote_ident, ColumnSpec, TableSpec};
pub use value::{SqlType, SqlValue};
