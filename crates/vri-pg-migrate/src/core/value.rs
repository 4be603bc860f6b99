//! SQL value types shared by sources, the normalizer and the destination.
//!
//! Source rows arrive with whatever types the legacy schema declared (or as
//! plain text for CSV exports). Mapping functions turn them into values of the
//! destination column type, and the loader checks that before anything is
//! written.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Declared type of a destination column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Boolean,
    Integer,
    BigInt,
    Double,
    Text,
    Date,
    Timestamp,
}

impl SqlType {
    /// PostgreSQL type name, used in log messages and generated DDL.
    pub fn pg_name(&self) -> &'static str {
        match self {
            SqlType::Boolean => "boolean",
            SqlType::Integer => "integer",
            SqlType::BigInt => "bigint",
            SqlType::Double => "double precision",
            SqlType::Text => "text",
            SqlType::Date => "date",
            SqlType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pg_name())
    }
}

/// Owned SQL value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Borrow the text payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload widened to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I32(v) => Some(*v as i64),
            SqlValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Type this value carries, `None` for NULL.
    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(_) => Some(SqlType::Boolean),
            SqlValue::I32(_) => Some(SqlType::Integer),
            SqlValue::I64(_) => Some(SqlType::BigInt),
            SqlValue::F64(_) => Some(SqlType::Double),
            SqlValue::Text(_) => Some(SqlType::Text),
            SqlValue::Date(_) => Some(SqlType::Date),
            SqlValue::DateTime(_) => Some(SqlType::Timestamp),
        }
    }

    /// True if the value is NULL or already of type `ty`.
    pub fn conforms_to(&self, ty: SqlType) -> bool {
        match self.sql_type() {
            None => true,
            Some(actual) => actual == ty,
        }
    }

    /// Lossless conversion into the column type.
    ///
    /// Integers move between widths when the value fits, dates widen to
    /// midnight timestamps. Anything else is returned unchanged in `Err`.
    pub fn coerce(self, ty: SqlType) -> std::result::Result<SqlValue, SqlValue> {
        if self.conforms_to(ty) {
            return Ok(self);
        }
        match (self, ty) {
            (SqlValue::I32(v), SqlType::BigInt) => Ok(SqlValue::I64(v as i64)),
            (SqlValue::I64(v), SqlType::Integer) => match i32::try_from(v) {
                Ok(v) => Ok(SqlValue::I32(v)),
                Err(_) => Err(SqlValue::I64(v)),
            },
            (SqlValue::I32(v), SqlType::Double) => Ok(SqlValue::F64(v as f64)),
            (SqlValue::Date(d), SqlType::Timestamp) => Ok(SqlValue::DateTime(d.and_time(
                chrono::NaiveTime::MIN,
            ))),
            (other, _) => Err(other),
        }
    }
}

impl fmt::Display for SqlValue {
    /// Report rendering: NULL is the empty string.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => Ok(()),
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::I32(v) => write!(f, "{}", v),
            SqlValue::I64(v) => write!(f, "{}", v),
            SqlValue::F64(v) => write!(f, "{}", v),
            SqlValue::Text(s) => f.write_str(s),
            SqlValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            SqlValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}
