//! Destination database operations.
//!
//! [`TargetWriter`] is the seam between the engine and the destination.
//! [`PostgresWriter`] talks to the real database; [`MemoryTarget`] keeps
//! tables in process for dry runs and tests. Both honour the same contract:
//! each write call is one transaction, and a failed call leaves the
//! destination as it was.

mod memory;
mod postgres;

pub use memory::MemoryTarget;
pub use postgres::PostgresWriter;

use async_trait::async_trait;

use crate::core::{SqlValue, TableSpec};
use crate::error::Result;
use crate::loader::LoadStats;

/// A row in destination column order.
pub type Row = Vec<SqlValue>;

/// Trait for destination database operations.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Check that the destination answers.
    async fn health_check(&self) -> Result<()>;

    /// Run schema adjustment statements, all in one transaction.
    async fn execute_statements(&self, statements: &[String]) -> Result<()>;

    /// Truncate tables in the given order, restarting identities, in one
    /// transaction.
    async fn truncate(&self, tables: &[String], cascade: bool) -> Result<()>;

    /// Truncate `table` and bulk-load `rows` in one transaction.
    async fn replace_rows(&self, table: &TableSpec, rows: Vec<Row>, cascade: bool) -> Result<u64>;

    /// Insert each row whose `unique_column` value is not already present,
    /// in one transaction.
    async fn insert_missing(
        &self,
        table: &TableSpec,
        unique_column: &str,
        rows: Vec<Row>,
    ) -> Result<LoadStats>;

    /// Bulk-append without touching existing rows.
    async fn append_rows(&self, table: &TableSpec, rows: Vec<Row>) -> Result<u64>;

    /// Read the given columns of every row of `table`. Values come back in
    /// column order.
    async fn fetch_columns(&self, table: &str, columns: &[String]) -> Result<Vec<Row>>;

    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Database type name for logs.
    fn db_type(&self) -> &str;
}
