//! In-process destination used for dry runs and tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::{Row, TargetWriter};
use crate::core::{SqlValue, TableSpec};
use crate::error::{MigrateError, Result};
use crate::loader::LoadStats;
use crate::resolve::NaturalKey;

#[derive(Debug, Default, Clone)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn column_index(&mut self, name: &str) -> usize {
        match self.columns.iter().position(|c| c == name) {
            Some(i) => i,
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(SqlValue::Null);
                }
                self.columns.len() - 1
            }
        }
    }

    fn next_identity(&self, idx: usize) -> i64 {
        self.rows
            .iter()
            .filter_map(|r| r.get(idx).and_then(SqlValue::as_i64))
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Place `rows` (in `spec` column order) into table layout, filling a
    /// NULL identity column with the next value.
    fn stage(&mut self, spec: &TableSpec, rows: Vec<Row>) -> Vec<Row> {
        let positions: Vec<usize> = spec.columns.iter().map(|c| self.column_index(&c.name)).collect();
        let identity = spec.identity.as_deref().map(|c| self.column_index(c));
        let mut next_id = identity.map(|i| self.next_identity(i)).unwrap_or(1);

        let width = self.columns.len();
        rows.into_iter()
            .map(|row| {
                let mut out = vec![SqlValue::Null; width];
                for (pos, value) in positions.iter().zip(row) {
                    out[*pos] = value;
                }
                if let Some(i) = identity {
                    if out[i].is_null() {
                        out[i] = SqlValue::I64(next_id);
                        next_id += 1;
                    } else if let Some(v) = out[i].as_i64() {
                        next_id = next_id.max(v + 1);
                    }
                }
                out
            })
            .collect()
    }
}

/// Destination tables held in memory.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    tables: Mutex<HashMap<String, MemoryTable>>,
    failing: Mutex<HashSet<String>>,
    statements: Mutex<Vec<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a table, e.g. with hand-entered seed rows.
    pub fn seed(&self, table: &str, columns: &[&str], rows: Vec<Row>) {
        let mut tables = lock(&self.tables);
        let t = tables.entry(table.to_string()).or_default();
        let positions: Vec<usize> = columns.iter().map(|c| t.column_index(c)).collect();
        for row in rows {
            let mut out = vec![SqlValue::Null; t.columns.len()];
            for (pos, value) in positions.iter().zip(row) {
                out[*pos] = value;
            }
            t.rows.push(out);
        }
    }

    /// Make every later write to `table` fail.
    pub fn fail_writes_to(&self, table: &str) {
        lock(&self.failing).insert(table.to_string());
    }

    pub fn recover_writes_to(&self, table: &str) {
        lock(&self.failing).remove(table);
    }

    /// Current rows of a table in table column order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        lock(&self.tables)
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// All values of one column.
    pub fn column(&self, table: &str, column: &str) -> Vec<SqlValue> {
        let tables = lock(&self.tables);
        let Some(t) = tables.get(table) else {
            return Vec::new();
        };
        match t.columns.iter().position(|c| c == column) {
            Some(i) => t.rows.iter().map(|r| r[i].clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Statements executed so far, including truncations.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements).clone()
    }

    fn check_writable(&self, table: &str) -> Result<()> {
        if lock(&self.failing).contains(table) {
            return Err(MigrateError::write(table, "write rejected by destination"));
        }
        Ok(())
    }

    fn log(&self, statement: String) {
        debug!("memory target: {}", statement);
        lock(&self.statements).push(statement);
    }
}

#[async_trait]
impl TargetWriter for MemoryTarget {
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn execute_statements(&self, statements: &[String]) -> Result<()> {
        for stmt in statements {
            self.log(stmt.clone());
        }
        Ok(())
    }

    async fn truncate(&self, tables: &[String], _cascade: bool) -> Result<()> {
        for table in tables {
            self.check_writable(table)?;
        }
        let mut all = lock(&self.tables);
        for table in tables {
            if let Some(t) = all.get_mut(table) {
                t.rows.clear();
            }
            self.log(format!("TRUNCATE {}", table));
        }
        Ok(())
    }

    async fn replace_rows(&self, table: &TableSpec, rows: Vec<Row>, _cascade: bool) -> Result<u64> {
        self.check_writable(&table.name)?;
        let count = rows.len() as u64;
        let mut all = lock(&self.tables);
        let t = all.entry(table.name.clone()).or_default();
        t.rows.clear();
        let staged = t.stage(table, rows);
        t.rows.extend(staged);
        self.log(format!("TRUNCATE {}", table.name));
        Ok(count)
    }

    async fn insert_missing(
        &self,
        table: &TableSpec,
        unique_column: &str,
        rows: Vec<Row>,
    ) -> Result<LoadStats> {
        self.check_writable(&table.name)?;
        let unique_pos = table
            .columns
            .iter()
            .position(|c| c.name == unique_column)
            .ok_or_else(|| {
                MigrateError::Config(format!(
                    "unique column {} is not written to {}",
                    unique_column, table.name
                ))
            })?;

        let mut all = lock(&self.tables);
        let t = all.entry(table.name.clone()).or_default();
        let existing_pos = t.column_index(unique_column);
        let mut present: HashSet<NaturalKey> = t
            .rows
            .iter()
            .filter_map(|r| NaturalKey::from_parts([&r[existing_pos]]))
            .collect();

        let mut stats = LoadStats::default();
        let mut fresh = Vec::new();
        for row in rows {
            match NaturalKey::from_parts([&row[unique_pos]]) {
                Some(key) if present.contains(&key) => stats.already_present += 1,
                key => {
                    if let Some(key) = key {
                        present.insert(key);
                    }
                    fresh.push(row);
                    stats.inserted += 1;
                }
            }
        }
        let staged = t.stage(table, fresh);
        t.rows.extend(staged);
        Ok(stats)
    }

    async fn append_rows(&self, table: &TableSpec, rows: Vec<Row>) -> Result<u64> {
        self.check_writable(&table.name)?;
        let count = rows.len() as u64;
        let mut all = lock(&self.tables);
        let t = all.entry(table.name.clone()).or_default();
        let staged = t.stage(table, rows);
        t.rows.extend(staged);
        Ok(count)
    }

    async fn fetch_columns(&self, table: &str, columns: &[String]) -> Result<Vec<Row>> {
        let all = lock(&self.tables);
        let Some(t) = all.get(table) else {
            return Ok(Vec::new());
        };
        let positions: Vec<Option<usize>> = columns
            .iter()
            .map(|c| t.columns.iter().position(|tc| tc == c))
            .collect();
        Ok(t.rows
            .iter()
            .map(|r| {
                positions
                    .iter()
                    .map(|p| p.map(|i| r[i].clone()).unwrap_or(SqlValue::Null))
                    .collect()
            })
            .collect())
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        Ok(lock(&self.tables)
            .get(table)
            .map(|t| t.rows.len() as i64)
            .unwrap_or(0))
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}
