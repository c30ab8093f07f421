//! Type conversions for PostgreSQL.
//!
//! Parameters are bound through [`PgValue`], which adapts a dynamic
//! [`Value`] to whatever type the server inferred for the placeholder.
//! Columns the row decoder has no native mapping for are read through
//! [`RawBytes`]; intervals are rendered as text through [`PgInterval`].

use std::error::Error;
use std::fmt;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use dbmesh_core::Value;
use postgres_types::{FromSql, IsNull, ToSql, Type, to_sql_checked};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

type SqlError = Box<dyn Error + Sync + Send>;

/// Check if the type is one of the text-like types.
pub fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    )
}

fn mismatch(value: &Value, ty: &Type) -> SqlError {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Int(_) => "integer",
        Value::Float(_) => "float",
        Value::Text(_) => "text",
        Value::Json(_) => "json",
        Value::Decimal(_) => "decimal",
        Value::Bytes(_) => "bytes",
        Value::Timestamp(_) => "timestamp",
        Value::DateTime(_) => "datetime",
        Value::Date(_) => "date",
        Value::Time(_) => "time",
    };
    format!("cannot bind a {} value to a parameter of type {}", kind, ty).into()
}

/// A [`Value`] bound as a statement parameter.
#[derive(Debug, Clone, Copy)]
pub struct PgValue<'a>(pub &'a Value);

impl ToSql for PgValue<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, SqlError> {
        let value = self.0;
        match value {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                _ if is_text(ty) => b.to_string().to_sql(ty, out),
                _ => Err(mismatch(value, ty)),
            },
            Value::Int(i) => int_to_sql(*i, ty, out).unwrap_or_else(|| Err(mismatch(value, ty))),
            Value::Float(f) => match *ty {
                Type::FLOAT8 => f.to_sql(ty, out),
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::NUMERIC => Decimal::try_from(*f)?.to_sql(ty, out),
                _ if is_text(ty) => f.to_string().to_sql(ty, out),
                _ => Err(mismatch(value, ty)),
            },
            Value::Decimal(d) => match *ty {
                Type::NUMERIC => d.to_sql(ty, out),
                Type::FLOAT8 => d
                    .to_f64()
                    .ok_or_else(|| mismatch(value, ty))?
                    .to_sql(ty, out),
                _ if is_text(ty) => d.to_string().to_sql(ty, out),
                _ => Err(mismatch(value, ty)),
            },
            Value::Text(s) => text_to_sql(s, ty, out).unwrap_or_else(|| Err(mismatch(value, ty))),
            Value::Json(j) => match *ty {
                Type::JSON | Type::JSONB => j.to_sql(ty, out),
                _ if is_text(ty) => j.to_string().to_sql(ty, out),
                _ => Err(mismatch(value, ty)),
            },
            Value::Bytes(b) => match *ty {
                Type::BYTEA => b.to_sql(ty, out),
                _ => Err(mismatch(value, ty)),
            },
            Value::Timestamp(ts) => match *ty {
                Type::TIMESTAMPTZ => ts.to_sql(ty, out),
                Type::TIMESTAMP => ts.naive_utc().to_sql(ty, out),
                Type::DATE => ts.date_naive().to_sql(ty, out),
                _ if is_text(ty) => ts.to_rfc3339().to_sql(ty, out),
                _ => Err(mismatch(value, ty)),
            },
            Value::DateTime(dt) => match *ty {
                Type::TIMESTAMP => dt.to_sql(ty, out),
                Type::TIMESTAMPTZ => dt.and_utc().to_sql(ty, out),
                Type::DATE => dt.date().to_sql(ty, out),
                _ if is_text(ty) => dt.to_string().to_sql(ty, out),
                _ => Err(mismatch(value, ty)),
            },
            Value::Date(d) => match *ty {
                Type::DATE => d.to_sql(ty, out),
                Type::TIMESTAMP => d.and_time(chrono::NaiveTime::MIN).to_sql(ty, out),
                Type::TIMESTAMPTZ => d.and_time(chrono::NaiveTime::MIN).and_utc().to_sql(ty, out),
                _ if is_text(ty) => d.to_string().to_sql(ty, out),
                _ => Err(mismatch(value, ty)),
            },
            Value::Time(t) => match *ty {
                Type::TIME => t.to_sql(ty, out),
                _ if is_text(ty) => t.to_string().to_sql(ty, out),
                _ => Err(mismatch(value, ty)),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn int_to_sql(i: i64, ty: &Type, out: &mut BytesMut) -> Option<Result<IsNull, SqlError>> {
    let result = match *ty {
        Type::INT8 => i.to_sql(ty, out),
        Type::INT4 => i32::try_from(i).map_err(SqlError::from).and_then(|v| v.to_sql(ty, out)),
        Type::INT2 => i16::try_from(i).map_err(SqlError::from).and_then(|v| v.to_sql(ty, out)),
        Type::OID => u32::try_from(i).map_err(SqlError::from).and_then(|v| v.to_sql(ty, out)),
        Type::FLOAT8 => (i as f64).to_sql(ty, out),
        Type::FLOAT4 => (i as f32).to_sql(ty, out),
        Type::NUMERIC => Decimal::from(i).to_sql(ty, out),
        _ if is_text(ty) => i.to_string().to_sql(ty, out),
        _ => return None,
    };
    Some(result)
}

// Text is parsed into the inferred type where that is unambiguous.
fn text_to_sql(s: &str, ty: &Type, out: &mut BytesMut) -> Option<Result<IsNull, SqlError>> {
    let result = match *ty {
        _ if is_text(ty) => s.to_sql(ty, out),
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => match s.trim().parse::<i64>() {
            Ok(i) => return int_to_sql(i, ty, out),
            Err(e) => Err(e.into()),
        },
        Type::FLOAT4 | Type::FLOAT8 => s
            .trim()
            .parse::<f64>()
            .map_err(SqlError::from)
            .and_then(|f| PgValue(&Value::Float(f)).to_sql(ty, out)),
        Type::NUMERIC => s
            .trim()
            .parse::<Decimal>()
            .map_err(SqlError::from)
            .and_then(|d| d.to_sql(ty, out)),
        Type::BOOL => match s.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "1" | "yes" | "on" => true.to_sql(ty, out),
            "f" | "false" | "0" | "no" | "off" => false.to_sql(ty, out),
            other => Err(format!("invalid boolean '{}'", other).into()),
        },
        Type::TIMESTAMPTZ => DateTime::parse_from_rfc3339(s.trim())
            .map_err(SqlError::from)
            .and_then(|ts| ts.with_timezone(&Utc).to_sql(ty, out)),
        Type::TIMESTAMP => s
            .trim()
            .parse::<NaiveDateTime>()
            .map_err(SqlError::from)
            .and_then(|dt| dt.to_sql(ty, out)),
        Type::DATE => s
            .trim()
            .parse::<chrono::NaiveDate>()
            .map_err(SqlError::from)
            .and_then(|d| d.to_sql(ty, out)),
        Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(s)
            .map_err(SqlError::from)
            .and_then(|j| j.to_sql(ty, out)),
        Type::UUID => uuid::Uuid::parse_str(s.trim())
            .map_err(SqlError::from)
            .and_then(|u| u.to_sql(ty, out)),
        Type::BYTEA => s.as_bytes().to_sql(ty, out),
        _ => return None,
    };
    Some(result)
}

/// Column value read as its raw wire bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBytes(pub Vec<u8>);

impl<'a> FromSql<'a> for RawBytes {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, SqlError> {
        Ok(Self(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// A PostgreSQL `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgInterval {
    /// Whole months.
    pub months: i32,
    /// Whole days.
    pub days: i32,
    /// Remaining microseconds.
    pub micros: i64,
}

impl<'a> FromSql<'a> for PgInterval {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, SqlError> {
        if raw.len() != 16 {
            return Err(format!("invalid interval length {}", raw.len()).into());
        }
        Ok(Self {
            micros: i64::from_be_bytes(<[u8; 8]>::try_from(&raw[0..8])?),
            days: i32::from_be_bytes(<[u8; 4]>::try_from(&raw[8..12])?),
            months: i32::from_be_bytes(<[u8; 4]>::try_from(&raw[12..16])?),
        })
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

fn unit(n: i64, singular: &str) -> String {
    if n == 1 {
        format!("{} {}", n, singular)
    } else {
        format!("{} {}s", n, singular)
    }
}

// Rendered the way the server prints intervals by default.
impl fmt::Display for PgInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        let years = self.months / 12;
        let months = self.months % 12;
        if years != 0 {
            parts.push(unit(years.into(), "year"));
        }
        if months != 0 {
            parts.push(unit(months.into(), "mon"));
        }
        if self.days != 0 {
            parts.push(unit(self.days.into(), "day"));
        }

        if self.micros != 0 || parts.is_empty() {
            let sign = if self.micros < 0 { "-" } else { "" };
            let total = self.micros.unsigned_abs();
            let hours = total / 3_600_000_000;
            let minutes = (total / 60_000_000) % 60;
            let seconds = (total / 1_000_000) % 60;
            let fraction = total % 1_000_000;
            let mut clock = format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds);
            if fraction != 0 {
                let digits = format!("{:06}", fraction);
                clock.push('.');
                clock.push_str(digits.trim_end_matches('0'));
            }
            parts.push(clock);
        }

        f.write_str(&parts.join(" "))
    }
}
