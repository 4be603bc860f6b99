//! Source readers.
//!
//! Every source is consumed as a [`RecordStream`]: a bounded channel fed by a
//! reader task, one [`SourceRecord`] per item. Row-level problems arrive as
//! `Err(MigrateError::MalformedRecord)` items and the stream continues; any
//! other error ends the stream.

mod csv;
mod mysql;

pub use self::csv::read_csv;
pub use self::mysql::MysqlSource;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::core::SourceRecord;
use crate::error::{MigrateError, Result};

/// Records in flight between a reader task and the unit loop.
pub(crate) const CHANNEL_CAPACITY: usize = 256;

pub type RecordStream = mpsc::Receiver<Result<SourceRecord>>;

/// Where a unit's rows come from.
#[derive(Debug, Clone)]
pub enum SourceDescriptor {
    /// SQL run against a named connection from the `sources` config section.
    Query { connection: String, sql: String },
    /// Delimited file with a header row, relative to `migration.data_dir`.
    Csv { path: PathBuf, delimiter: u8 },
    /// Rows declared in code.
    Inline(Vec<SourceRecord>),
}

impl SourceDescriptor {
    pub fn query(connection: &str, sql: &str) -> Self {
        SourceDescriptor::Query {
            connection: connection.to_string(),
            sql: sql.to_string(),
        }
    }

    pub fn csv(path: impl Into<PathBuf>) -> Self {
        SourceDescriptor::Csv {
            path: path.into(),
            delimiter: b',',
        }
    }

    /// Short description for logs and reports.
    pub fn describe(&self) -> String {
        match self {
            SourceDescriptor::Query { connection, sql } => {
                let sql: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
                format!("{}: {}", connection, sql)
            }
            SourceDescriptor::Csv { path, .. } => path.display().to_string(),
            SourceDescriptor::Inline(rows) => format!("inline ({} rows)", rows.len()),
        }
    }
}

/// A connection that can stream query results.
#[async_trait]
pub trait QuerySource: Send + Sync {
    /// Run `sql` and stream its rows.
    fn query(&self, sql: &str) -> RecordStream;

    async fn health_check(&self) -> Result<()>;

    fn name(&self) -> &str;
}

/// All sources available to a run.
pub struct SourceSet {
    queries: HashMap<String, Arc<dyn QuerySource>>,
    data_dir: PathBuf,
}

impl SourceSet {
    /// Connect every configured MySQL source.
    pub async fn connect(config: &Config) -> Result<Self> {
        let mut set = Self::offline(&config.migration.data_dir);
        for (name, source) in &config.sources {
            let mysql = MysqlSource::new(name, source, 2).await?;
            set = set.with_query_source(Arc::new(mysql));
        }
        info!("Connected {} query sources", set.queries.len());
        Ok(set)
    }

    /// A set with files and inline rows only.
    pub fn offline(data_dir: impl AsRef<Path>) -> Self {
        Self {
            queries: HashMap::new(),
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn with_query_source(mut self, source: Arc<dyn QuerySource>) -> Self {
        self.queries.insert(source.name().to_string(), source);
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Start streaming `desc`.
    pub fn open(&self, desc: &SourceDescriptor) -> Result<RecordStream> {
        match desc {
            SourceDescriptor::Query { connection, sql } => {
                let source = self.queries.get(connection).ok_or_else(|| {
                    MigrateError::unavailable(connection.as_str(), "no such source connection")
                })?;
                Ok(source.query(sql))
            }
            SourceDescriptor::Csv { path, delimiter } => {
                Ok(read_csv(self.data_dir.join(path), *delimiter))
            }
            SourceDescriptor::Inline(rows) => {
                let (tx, rx) = mpsc::channel(rows.len().max(1));
                for row in rows {
                    // capacity covers every row
                    let _ = tx.try_send(Ok(row.clone()));
                }
                Ok(rx)
            }
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        for source in self.queries.values() {
            source.health_check().await?;
            info!("Source {} is reachable", source.name());
        }
        Ok(())
    }
}
