//! MySQL/MariaDB query source.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{QuerySource, RecordStream, CHANNEL_CAPACITY};
use crate::config::SourceConfig;
use crate::core::{SourceRecord, SqlValue};
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// A named legacy MySQL schema (`absmain`, `pilar3`).
pub struct MysqlSource {
    name: String,
    pool: MySqlPool,
}

impl MysqlSource {
    pub async fn new(name: &str, config: &SourceConfig, max_conns: usize) -> Result<Self> {
        let ssl_mode = match config.ssl_mode.to_lowercase().as_str() {
            "disabled" | "disable" => MySqlSslMode::Disabled,
            "required" | "require" => MySqlSslMode::Required,
            "verify-ca" | "verify_ca" => MySqlSslMode::VerifyCa,
            "verify-full" | "verify_identity" => MySqlSslMode::VerifyIdentity,
            _ => MySqlSslMode::Preferred,
        };

        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(ssl_mode);

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns as u32)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::unavailable(name, e))?;

        let source = Self {
            name: name.to_string(),
            pool,
        };
        source.health_check().await?;

        info!(
            "Connected to MySQL source {}: {}:{}/{}",
            name, config.host, config.port, config.database
        );
        Ok(source)
    }

    async fn stream_rows(
        pool: MySqlPool,
        name: String,
        sql: String,
        tx: mpsc::Sender<Result<SourceRecord>>,
    ) -> Result<()> {
        let mut rows = sqlx::query(&sql).fetch(&pool);
        let mut line = 0u64;
        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| MigrateError::unavailable(name.as_str(), e))?
        {
            line += 1;
            if tx.send(row_to_record(&row, line, &name)).await.is_err() {
                debug!("{}: reader dropped after {} rows", name, line);
                break;
            }
        }
        debug!("{}: streamed {} rows", name, line);
        Ok(())
    }
}

#[async_trait]
impl QuerySource for MysqlSource {
    fn query(&self, sql: &str) -> RecordStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let pool = self.pool.clone();
        let name = self.name.clone();
        let sql = sql.to_string();

        tokio::spawn(async move {
            if let Err(e) = Self::stream_rows(pool, name, sql, tx.clone()).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        rx
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::unavailable(self.name.as_str(), e))?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Convert a row, decoding each column by its reported MySQL type. A column
/// that cannot be decoded makes the whole row malformed.
fn row_to_record(row: &MySqlRow, line: u64, source_name: &str) -> Result<SourceRecord> {
    let mut record = SourceRecord::new(line);
    for (i, col) in row.columns().iter().enumerate() {
        let type_name = col.type_info().name();
        let value = decode_column(row, i, type_name)
            .map_err(|e| malformed_column(source_name, line, col.name(), type_name, &e))?;
        record.push(col.name(), value);
    }
    Ok(record)
}

fn malformed_column(
    source_name: &str,
    line: u64,
    column: &str,
    type_name: &str,
    err: &sqlx::Error,
) -> MigrateError {
    MigrateError::MalformedRecord {
        source_name: source_name.to_string(),
        line,
        message: format!("column {} ({}): {}", column, type_name, err),
    }
}

fn decode_column(row: &MySqlRow, i: usize, type_name: &str) -> std::result::Result<SqlValue, sqlx::Error> {
    if row.try_get_raw(i)?.is_null() {
        return Ok(SqlValue::Null);
    }

    if type_name.ends_with("UNSIGNED") {
        let v = row.try_get::<u64, _>(i)?;
        return Ok(i64::try_from(v)
            .map(narrow)
            .unwrap_or_else(|_| SqlValue::Text(v.to_string())));
    }

    let value = match type_name {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => narrow(row.try_get::<i64, _>(i)?),
        "BOOLEAN" => SqlValue::Bool(row.try_get::<bool, _>(i)?),
        "FLOAT" => SqlValue::F64(row.try_get::<f32, _>(i)? as f64),
        "DOUBLE" => SqlValue::F64(row.try_get::<f64, _>(i)?),
        "DECIMAL" => SqlValue::Text(row.try_get::<rust_decimal::Decimal, _>(i)?.to_string()),
        "DATE" => match row.try_get::<chrono::NaiveDate, _>(i) {
            Ok(d) => SqlValue::Date(d),
            Err(_) if is_zero_temporal(row, i) => SqlValue::Null,
            Err(e) => return Err(e),
        },
        "DATETIME" | "TIMESTAMP" => match row.try_get::<chrono::NaiveDateTime, _>(i) {
            Ok(dt) => SqlValue::DateTime(dt),
            Err(_) if is_zero_temporal(row, i) => SqlValue::Null,
            Err(e) => return Err(e),
        },
        "TIME" => SqlValue::Text(row.try_get::<chrono::NaiveTime, _>(i)?.to_string()),
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            SqlValue::Text(String::from_utf8_lossy(&row.try_get::<Vec<u8>, _>(i)?).into_owned())
        }
        _ => SqlValue::Text(row.try_get::<String, _>(i)?),
    };
    Ok(value)
}

/// MySQL zero dates (`0000-00-00`, `0000-00-00 00:00:00`) mean "no date".
fn is_zero_temporal(row: &MySqlRow, i: usize) -> bool {
    row.try_get_unchecked::<&[u8], _>(i)
        .map(is_zero_temporal_bytes)
        .unwrap_or(false)
}

/// Zero dates arrive as an empty binary value or as all-zero text.
fn is_zero_temporal_bytes(raw: &[u8]) -> bool {
    raw.iter()
        .all(|b| matches!(b, b'0' | b'-' | b':' | b' ' | b'.'))
}

/// Integers that fit in 32 bits come through as `I32`.
fn narrow(v: i64) -> SqlValue {
    match i32::try_from(v) {
        Ok(v) => SqlValue::I32(v),
        Err(_) => SqlValue::I64(v),
    }
}
