//! PostgreSQL destination.
//!
//! Uses deadpool-postgres for the connection, binary COPY for bulk loads and
//! parameterized statements for everything that carries data values.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use futures::SinkExt;
use rustls::ClientConfig;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Config as PgConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, info, warn};

use super::{Row, TargetWriter};
use crate::config::TargetConfig;
use crate::core::{qualify_table, quote_ident, SqlType, SqlValue, TableSpec};
use crate::error::{MigrateError, Result};
use crate::loader::LoadStats;

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Days from 0001-01-01 (CE day 1) to 2000-01-01, the PostgreSQL epoch.
const PG_EPOCH_DAYS_FROM_CE: i32 = 730_120;

/// Microseconds between the Unix and PostgreSQL epochs.
const PG_EPOCH_UNIX_MICROS: i64 = 946_684_800_000_000;

/// PostgreSQL destination writer.
pub struct PostgresWriter {
    pool: Pool,
    schema: String,
    copy_batch_rows: usize,
}

impl PostgresWriter {
    /// Connect using the target configuration.
    pub async fn new(config: &TargetConfig, max_conns: usize, copy_batch_rows: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("vri-pg-migrate");

        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode = config.ssl_mode.to_lowercase();
        let pool = match ssl_mode.as_str() {
            "disable" => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .build()
                    .map_err(|e| MigrateError::pool(e, "creating PostgreSQL target pool"))?
            }
            _ => {
                let tls_config = Self::build_tls_config(&ssl_mode)?;
                let tls_connector = MakeRustlsConnect::new(tls_config);
                let mgr = Manager::from_config(pg_config, tls_connector, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .build()
                    .map_err(|e| MigrateError::pool(e, "creating PostgreSQL target pool"))?
            }
        };

        let writer = Self {
            pool,
            schema: config.schema.clone(),
            copy_batch_rows: copy_batch_rows.max(1),
        };
        writer.health_check().await?;

        info!(
            "Connected to PostgreSQL target: {}:{}/{}",
            config.host, config.port, config.database
        );
        Ok(writer)
    }

    /// Build TLS configuration.
    fn build_tls_config(ssl_mode: &str) -> Result<ClientConfig> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = match ssl_mode {
            "require" => {
                warn!("ssl_mode=require: TLS enabled but server certificate is not verified.");
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier))
                    .with_no_client_auth()
            }
            "verify-ca" | "verify-full" => {
                info!("ssl_mode={}: certificate verification enabled", ssl_mode);
                ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            }
            other => {
                return Err(MigrateError::Config(format!(
                    "Invalid ssl_mode '{}'. Valid options: disable, require, verify-ca, verify-full",
                    other
                )));
            }
        };

        Ok(config)
    }

    fn qualify(&self, table: &str) -> String {
        qualify_table(&self.schema, table)
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting PostgreSQL connection"))
    }

    fn copy_statement(&self, table: &TableSpec) -> String {
        let cols: Vec<String> = table.columns.iter().map(|c| quote_ident(&c.name)).collect();
        format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT BINARY)",
            self.qualify(&table.name),
            cols.join(", ")
        )
    }

    /// Stream rows into an open transaction with binary COPY, one COPY per chunk.
    async fn copy_rows(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        table: &TableSpec,
        rows: &[Row],
    ) -> Result<u64> {
        let copy_sql = self.copy_statement(table);
        let mut written = 0u64;

        for chunk in rows.chunks(self.copy_batch_rows) {
            let sink = tx
                .copy_in(&copy_sql)
                .await
                .map_err(|e| MigrateError::write(&table.name, format!("COPY init: {}", e)))?;

            let mut buf = BytesMut::with_capacity(chunk.len() * 128);
            // PGCOPY signature, flags, header extension length
            buf.put_slice(b"PGCOPY\n\xff\r\n\0");
            buf.put_i32(0);
            buf.put_i32(0);
            for row in chunk {
                buf.put_i16(row.len() as i16);
                for value in row {
                    write_binary_value(&mut buf, value);
                }
            }
            buf.put_i16(-1);

            tokio::pin!(sink);
            sink.send(buf.freeze())
                .await
                .map_err(|e| MigrateError::write(&table.name, format!("COPY send: {}", e)))?;
            written += sink
                .finish()
                .await
                .map_err(|e| MigrateError::write(&table.name, format!("COPY finish: {}", e)))?;
        }

        Ok(written)
    }

    /// Move the serial sequence past explicitly loaded ids.
    async fn reset_sequence(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        table: &TableSpec,
    ) -> Result<()> {
        let Some(identity) = table.identity.as_deref() else {
            return Ok(());
        };
        if table.find(identity).is_none() {
            return Ok(());
        }
        let qualified = self.qualify(&table.name);
        let sql = format!(
            "SELECT setval(pg_get_serial_sequence($1, $2), COALESCE((SELECT MAX({}) FROM {}), 0) + 1, false)",
            quote_ident(identity),
            qualified
        );
        tx.execute(&sql, &[&qualified, &identity])
            .await
            .map_err(|e| MigrateError::write(&table.name, format!("sequence reset: {}", e)))?;
        debug!("Reset sequence for {}.{}", table.name, identity);
        Ok(())
    }
}

#[async_trait]
impl TargetWriter for PostgresWriter {
    async fn health_check(&self) -> Result<()> {
        let client = self.client().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn execute_statements(&self, statements: &[String]) -> Result<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        for stmt in statements {
            debug!("Executing: {}", stmt);
            tx.batch_execute(stmt).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn truncate(&self, tables: &[String], cascade: bool) -> Result<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        for table in tables {
            let sql = truncate_statement(&self.qualify(table), cascade);
            debug!("{}", sql);
            tx.batch_execute(&sql)
                .await
                .map_err(|e| MigrateError::write(table, e))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_rows(&self, table: &TableSpec, rows: Vec<Row>, cascade: bool) -> Result<u64> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        tx.batch_execute(&truncate_statement(&self.qualify(&table.name), cascade))
            .await
            .map_err(|e| MigrateError::write(&table.name, e))?;
        let written = self.copy_rows(&tx, table, &rows).await?;
        self.reset_sequence(&tx, table).await?;

        tx.commit()
            .await
            .map_err(|e| MigrateError::write(&table.name, format!("commit: {}", e)))?;
        Ok(written)
    }

    async fn insert_missing(
        &self,
        table: &TableSpec,
        unique_column: &str,
        rows: Vec<Row>,
    ) -> Result<LoadStats> {
        let unique = table
            .columns
            .iter()
            .position(|c| c.name == unique_column)
            .ok_or_else(|| {
                MigrateError::Config(format!(
                    "unique column {} is not written to {}",
                    unique_column, table.name
                ))
            })?;
        let unique_type = table.columns[unique].sql_type;
        let qualified = self.qualify(&table.name);

        let exists_sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {} = $1)",
            qualified,
            quote_ident(unique_column)
        );
        let cols: Vec<String> = table.columns.iter().map(|c| quote_ident(&c.name)).collect();
        let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("${}", i)).collect();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            qualified,
            cols.join(", "),
            placeholders.join(", ")
        );

        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        let exists_stmt = tx.prepare(&exists_sql).await?;
        let insert_stmt = tx.prepare(&insert_sql).await?;

        let mut stats = LoadStats::default();
        for row in &rows {
            let key = to_param(&row[unique], unique_type);
            let present: bool = tx
                .query_one(&exists_stmt, &[key.as_ref() as &(dyn ToSql + Sync)])
                .await
                .map_err(|e| MigrateError::write(&table.name, e))?
                .get(0);
            if present {
                stats.already_present += 1;
                continue;
            }

            let params: Vec<Box<dyn ToSql + Sync + Send>> = row
                .iter()
                .zip(&table.columns)
                .map(|(v, c)| to_param(v, c.sql_type))
                .collect();
            let refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();
            tx.execute(&insert_stmt, &refs)
                .await
                .map_err(|e| MigrateError::write(&table.name, e))?;
            stats.inserted += 1;
        }

        self.reset_sequence(&tx, table).await?;
        tx.commit()
            .await
            .map_err(|e| MigrateError::write(&table.name, format!("commit: {}", e)))?;
        Ok(stats)
    }

    async fn append_rows(&self, table: &TableSpec, rows: Vec<Row>) -> Result<u64> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        let written = self.copy_rows(&tx, table, &rows).await?;
        tx.commit()
            .await
            .map_err(|e| MigrateError::write(&table.name, format!("commit: {}", e)))?;
        Ok(written)
    }

    async fn fetch_columns(&self, table: &str, columns: &[String]) -> Result<Vec<Row>> {
        let client = self.client().await?;
        let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let sql = format!("SELECT {} FROM {}", cols.join(", "), self.qualify(table));
        let rows = client.query(&sql, &[]).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                values.push(decode_column(row, idx)?);
            }
            out.push(values);
        }
        Ok(out)
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let client = self.client().await?;
        let sql = format!("SELECT COUNT(*)::int8 FROM {}", self.qualify(table));
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.get::<_, i64>(0))
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

fn truncate_statement(qualified: &str, cascade: bool) -> String {
    format!(
        "TRUNCATE TABLE {} RESTART IDENTITY{}",
        qualified,
        if cascade { " CASCADE" } else { "" }
    )
}

/// Box a value as a statement parameter of the column's type. Values have
/// already been coerced to the column type, so anything else is NULL.
fn to_param(value: &SqlValue, ty: SqlType) -> Box<dyn ToSql + Sync + Send> {
    match ty {
        SqlType::Boolean => Box::new(match value {
            SqlValue::Bool(b) => Some(*b),
            _ => None,
        }),
        SqlType::Integer => Box::new(match value {
            SqlValue::I32(v) => Some(*v),
            _ => None,
        }),
        SqlType::BigInt => Box::new(value.as_i64()),
        SqlType::Double => Box::new(match value {
            SqlValue::F64(v) => Some(*v),
            _ => None,
        }),
        SqlType::Text => Box::new(value.as_str().map(str::to_string)),
        SqlType::Date => Box::new(match value {
            SqlValue::Date(d) => Some(*d),
            _ => None,
        }),
        SqlType::Timestamp => Box::new(match value {
            SqlValue::DateTime(dt) => Some(*dt),
            _ => None,
        }),
    }
}

/// Read one column of a result row into a [`SqlValue`].
fn decode_column(row: &tokio_postgres::Row, idx: usize) -> Result<SqlValue> {
    let ty = row.columns()[idx].type_();
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.into()
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?.map(|v| v as i32).into()
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?.into()
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.into()
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?.map(|v| v as f64).into()
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.into()
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<chrono::NaiveDate>>(idx)?.into()
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)?.into()
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .map(|v| v.naive_utc())
            .into()
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME {
        row.try_get::<_, Option<String>>(idx)?.into()
    } else {
        return Err(MigrateError::Config(format!(
            "column {} has unsupported type {}",
            row.columns()[idx].name(),
            ty
        )));
    };
    Ok(value)
}

/// Write a SqlValue as PostgreSQL binary format.
fn write_binary_value(buf: &mut BytesMut, value: &SqlValue) {
    match value {
        SqlValue::Null => {
            buf.put_i32(-1);
        }
        SqlValue::Bool(b) => {
            buf.put_i32(1);
            buf.put_u8(if *b { 1 } else { 0 });
        }
        SqlValue::I32(i) => {
            buf.put_i32(4);
            buf.put_i32(*i);
        }
        SqlValue::I64(i) => {
            buf.put_i32(8);
            buf.put_i64(*i);
        }
        SqlValue::F64(f) => {
            buf.put_i32(8);
            buf.put_f64(*f);
        }
        SqlValue::Text(s) => {
            let bytes = s.as_bytes();
            buf.put_i32(bytes.len() as i32);
            buf.put_slice(bytes);
        }
        SqlValue::Date(d) => {
            use chrono::Datelike;
            buf.put_i32(4);
            buf.put_i32(d.num_days_from_ce() - PG_EPOCH_DAYS_FROM_CE);
        }
        SqlValue::DateTime(dt) => {
            buf.put_i32(8);
            buf.put_i64(dt.and_utc().timestamp_micros() - PG_EPOCH_UNIX_MICROS);
        }
    }
}

/// Certificate verifier that accepts any server certificate (`ssl_mode=require`).
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
