//! Type conversion utilities for MySQL.
//!
//! Both wire protocols are decoded by column type: the text protocol hands
//! every value over as bytes, so numbers, dates and JSON are parsed back
//! into typed values here.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use dbmesh_core::Value;
use mysql_async::Value as MyValue;
use mysql_async::consts::ColumnType;
use rust_decimal::Decimal;

/// Convert a dbmesh value to a MySQL parameter.
pub fn to_mysql(value: &Value) -> MyValue {
    match value {
        Value::Null => MyValue::NULL,
        Value::Bool(b) => MyValue::Int(i64::from(*b)),
        Value::Int(i) => MyValue::Int(*i),
        Value::Float(f) => MyValue::Double(*f),
        Value::Text(s) => MyValue::Bytes(s.as_bytes().to_vec()),
        Value::Json(j) => MyValue::Bytes(j.to_string().into_bytes()),
        Value::Decimal(d) => MyValue::Bytes(d.to_string().into_bytes()),
        Value::Bytes(b) => MyValue::Bytes(b.clone()),
        Value::Timestamp(ts) => datetime(&ts.naive_utc()),
        Value::DateTime(dt) => datetime(dt),
        Value::Date(d) => MyValue::Date(
            d.year() as u16,
            d.month() as u8,
            d.day() as u8,
            0,
            0,
            0,
            0,
        ),
        Value::Time(t) => MyValue::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
    }
}

fn datetime(dt: &NaiveDateTime) -> MyValue {
    MyValue::Date(
        dt.year() as u16,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
        dt.nanosecond() / 1_000,
    )
}

/// Convert a MySQL value read from a column of type `column_type`.
pub fn from_mysql(value: MyValue, column_type: ColumnType) -> Value {
    match value {
        MyValue::NULL => Value::Null,
        MyValue::Int(i) => Value::Int(i),
        MyValue::UInt(u) => match i64::try_from(u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Text(u.to_string()),
        },
        MyValue::Float(f) => Value::Float(f.into()),
        MyValue::Double(d) => Value::Float(d),
        MyValue::Date(y, mo, d, h, mi, s, us) => {
            let date = NaiveDate::from_ymd_opt(y.into(), mo.into(), d.into());
            let time = NaiveTime::from_hms_micro_opt(h.into(), mi.into(), s.into(), us);
            match (date, time) {
                (Some(date), _) if column_type == ColumnType::MYSQL_TYPE_DATE => Value::Date(date),
                (Some(date), Some(time)) => Value::DateTime(date.and_time(time)),
                // Zero dates have no calendar equivalent.
                _ => Value::Text(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    y, mo, d, h, mi, s
                )),
            }
        }
        MyValue::Time(negative, days, h, mi, s, us) => {
            let time = NaiveTime::from_hms_micro_opt(h.into(), mi.into(), s.into(), us);
            match time {
                Some(time) if !negative && days == 0 => Value::Time(time),
                _ => {
                    let sign = if negative { "-" } else { "" };
                    Value::Text(format!(
                        "{}{:02}:{:02}:{:02}",
                        sign,
                        days * 24 + u32::from(h),
                        mi,
                        s
                    ))
                }
            }
        }
        MyValue::Bytes(bytes) => from_text(bytes, column_type),
    }
}

fn from_text(bytes: Vec<u8>, column_type: ColumnType) -> Value {
    let Ok(text) = std::str::from_utf8(&bytes) else {
        return Value::Bytes(bytes);
    };

    let parsed = match column_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => text.parse::<i64>().ok().map(Value::Int),
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
            text.parse::<f64>().ok().map(Value::Float)
        }
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            text.parse::<Decimal>().ok().map(Value::Decimal)
        }
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
            NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(Value::Date)
        }
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_TIMESTAMP => {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(Value::DateTime)
        }
        ColumnType::MYSQL_TYPE_TIME => NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
            .ok()
            .map(Value::Time),
        ColumnType::MYSQL_TYPE_JSON => serde_json::from_str(text).ok().map(Value::Json),
        _ => None,
    };

    parsed.unwrap_or(Value::Bytes(bytes))
}
