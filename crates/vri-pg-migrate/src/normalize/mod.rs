//! Value normalization: raw source fields into typed destination values.
//!
//! [`normalize`] is total. Anything it cannot interpret becomes a NULL with a
//! [`Diagnostic`] attached, so one bad cell never aborts a batch.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::core::{SourceRecord, SqlValue};

/// Prefix the legacy exports use for "no value" sentinels (`VACIO_DNI`, ...).
const EMPTY_SENTINEL_PREFIX: &str = "VACIO_";

/// Target kind of a source field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSpec {
    Text,
    Integer,
    BigInt,
    Double,
    Boolean,
    Date,
    Timestamp,
}

/// Why a value came out NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnostic {
    /// Empty string or a recognized placeholder token.
    Placeholder,
    /// The field does not exist on the source record.
    Missing,
    InvalidInteger,
    InvalidNumber,
    InvalidBoolean,
    InvalidDate,
}

impl Diagnostic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Diagnostic::Placeholder => "placeholder",
            Diagnostic::Missing => "missing field",
            Diagnostic::InvalidInteger => "invalid integer",
            Diagnostic::InvalidNumber => "invalid number",
            Diagnostic::InvalidBoolean => "invalid boolean",
            Diagnostic::InvalidDate => "invalid date",
        }
    }
}

/// Result of normalizing one value.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub value: SqlValue,
    pub diagnostic: Option<Diagnostic>,
}

impl Normalized {
    fn ok(value: SqlValue) -> Self {
        Self {
            value,
            diagnostic: None,
        }
    }

    fn null(diagnostic: Diagnostic) -> Self {
        Self {
            value: SqlValue::Null,
            diagnostic: Some(diagnostic),
        }
    }

    /// True when the value is NULL because the input was unusable,
    /// as opposed to simply absent.
    pub fn is_invalid(&self) -> bool {
        !matches!(
            self.diagnostic,
            None | Some(Diagnostic::Placeholder) | Some(Diagnostic::Missing)
        )
    }

    pub fn into_value(self) -> SqlValue {
        self.value
    }
}

/// True for raw text the legacy systems used to mean "no data".
pub fn is_placeholder(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || trimmed == "*"
        || trimmed.starts_with(EMPTY_SENTINEL_PREFIX)
        || trimmed.eq_ignore_ascii_case("NULL")
}

/// Normalize one raw value into the given kind.
pub fn normalize(raw: &SqlValue, spec: FieldSpec) -> Normalized {
    if let SqlValue::Text(s) = raw {
        if is_placeholder(s) {
            return Normalized::null(Diagnostic::Placeholder);
        }
    }
    if raw.is_null() {
        return Normalized::ok(SqlValue::Null);
    }

    match spec {
        FieldSpec::Text => Normalized::ok(SqlValue::Text(match raw {
            SqlValue::Text(s) => s.trim().to_string(),
            other => other.to_string(),
        })),
        FieldSpec::Integer => match to_i64(raw).and_then(|v| i32::try_from(v).ok()) {
            Some(v) => Normalized::ok(SqlValue::I32(v)),
            None => Normalized::null(Diagnostic::InvalidInteger),
        },
        FieldSpec::BigInt => match to_i64(raw) {
            Some(v) => Normalized::ok(SqlValue::I64(v)),
            None => Normalized::null(Diagnostic::InvalidInteger),
        },
        FieldSpec::Double => match raw {
            SqlValue::F64(v) => Normalized::ok(SqlValue::F64(*v)),
            SqlValue::I32(v) => Normalized::ok(SqlValue::F64(*v as f64)),
            SqlValue::I64(v) => Normalized::ok(SqlValue::F64(*v as f64)),
            SqlValue::Text(s) => match s.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => Normalized::ok(SqlValue::F64(v)),
                _ => Normalized::null(Diagnostic::InvalidNumber),
            },
            _ => Normalized::null(Diagnostic::InvalidNumber),
        },
        FieldSpec::Boolean => match to_bool(raw) {
            Some(b) => Normalized::ok(SqlValue::Bool(b)),
            None => Normalized::null(Diagnostic::InvalidBoolean),
        },
        FieldSpec::Date => match raw {
            SqlValue::Date(d) => Normalized::ok(SqlValue::Date(*d)),
            SqlValue::DateTime(dt) => Normalized::ok(SqlValue::Date(dt.date())),
            SqlValue::Text(s) => match parse_date(s) {
                Some(d) => Normalized::ok(SqlValue::Date(d)),
                None => Normalized::null(Diagnostic::InvalidDate),
            },
            _ => Normalized::null(Diagnostic::InvalidDate),
        },
        FieldSpec::Timestamp => match raw {
            SqlValue::DateTime(dt) => Normalized::ok(SqlValue::DateTime(*dt)),
            SqlValue::Date(d) => Normalized::ok(SqlValue::DateTime(d.and_time(chrono::NaiveTime::MIN))),
            SqlValue::Text(s) => match parse_timestamp(s) {
                Some(dt) => Normalized::ok(SqlValue::DateTime(dt)),
                None => Normalized::null(Diagnostic::InvalidDate),
            },
            _ => Normalized::null(Diagnostic::InvalidDate),
        },
    }
}

fn to_i64(raw: &SqlValue) -> Option<i64> {
    match raw {
        SqlValue::I32(v) => Some(*v as i64),
        SqlValue::I64(v) => Some(*v),
        SqlValue::Bool(b) => Some(*b as i64),
        SqlValue::F64(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
        SqlValue::Text(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn to_bool(raw: &SqlValue) -> Option<bool> {
    match raw {
        SqlValue::Bool(b) => Some(*b),
        SqlValue::I32(v) => Some(*v != 0),
        SqlValue::I64(v) => Some(*v != 0),
        SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "t" | "si" | "s" | "a" => Some(true),
            "0" | "false" | "f" | "no" | "n" | "i" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// `YYYY-MM-DD`, optionally followed by a time part that is ignored.
/// Anything that does not split into exactly three `-` tokens is rejected.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let token = raw.split_whitespace().next()?;
    let parts: Vec<&str> = token.split('-').collect();
    if parts.len() != 3 {
        return None;
    }
    let year = parts[0].parse::<i32>().ok()?;
    let month = parts[1].parse::<u32>().ok()?;
    let day = parts[2].parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| parse_date(trimmed).map(|d| d.and_time(chrono::NaiveTime::MIN)))
}

impl SourceRecord {
    /// Normalize a named field; absent fields are NULL with [`Diagnostic::Missing`].
    pub fn field(&self, name: &str, spec: FieldSpec) -> Normalized {
        if !self.contains(name) {
            return Normalized::null(Diagnostic::Missing);
        }
        normalize(self.get(name), spec)
    }

    /// Trimmed text of a field, `None` for placeholders.
    pub fn text(&self, name: &str) -> Option<String> {
        match self.field(name, FieldSpec::Text).value {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i32> {
        match self.field(name, FieldSpec::Integer).value {
            SqlValue::I32(v) => Some(v),
            _ => None,
        }
    }
}

/// Case/whitespace-insensitive form of a name, used for identity keys:
/// trimmed, lower-cased, inner runs of whitespace collapsed to one space.
pub fn fold_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `ana maria diaz` -> `ana_maria_diaz`.
pub fn slug(raw: &str) -> String {
    fold_name(raw).replace(' ', "_")
}
