//! PostgreSQL row conversion.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use dbmesh_core::Value;
use postgres_types::{FromSql, Type};
use rust_decimal::Decimal;
use tokio_postgres::Row;

use crate::error::{PgError, PgResult};
use crate::types::{PgInterval, RawBytes};

/// Column names of a statement, in select order.
pub fn column_names(columns: &[tokio_postgres::Column]) -> Vec<String> {
    columns.iter().map(|c| c.name().to_string()).collect()
}

/// Convert every column of a row into a [`Value`].
pub fn row_values(row: &Row) -> PgResult<Vec<Value>> {
    (0..row.len()).map(|idx| column_value(row, idx)).collect()
}

fn get<'a, T>(row: &'a Row, idx: usize) -> PgResult<Option<T>>
where
    T: FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        PgError::deserialization(format!(
            "failed to read column '{}': {}",
            row.columns()[idx].name(),
            e
        ))
    })
}

fn column_value(row: &Row, idx: usize) -> PgResult<Value> {
    let ty = row.columns()[idx].type_();
    let value = match *ty {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT8 => get::<i64>(row, idx)?.map(Value::Int),
        Type::OID => get::<u32>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| Value::Float(v.into())),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(Value::Float),
        Type::NUMERIC => get::<Decimal>(row, idx)?.map(Value::Decimal),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx)?.map(Value::Text)
        }
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(Value::Bytes),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)?.map(Value::Timestamp),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?.map(Value::DateTime),
        Type::DATE => get::<NaiveDate>(row, idx)?.map(Value::Date),
        Type::TIME => get::<NaiveTime>(row, idx)?.map(Value::Time),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx)?.map(Value::Json),
        Type::UUID => get::<uuid::Uuid>(row, idx)?.map(|u| Value::Text(u.to_string())),
        Type::INTERVAL => get::<PgInterval>(row, idx)?.map(|i| Value::Text(i.to_string())),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::NAME_ARRAY => {
            get::<Vec<Option<String>>>(row, idx)?.map(|items| {
                Value::Json(serde_json::Value::Array(
                    items
                        .into_iter()
                        .map(|item| item.map_or(serde_json::Value::Null, serde_json::Value::String))
                        .collect(),
                ))
            })
        }
        Type::INT4_ARRAY => get::<Vec<Option<i32>>>(row, idx)?.map(|items| {
            Value::Json(serde_json::Value::Array(
                items.into_iter().map(|item| serde_json::json!(item)).collect(),
            ))
        }),
        Type::INT8_ARRAY => get::<Vec<Option<i64>>>(row, idx)?.map(|items| {
            Value::Json(serde_json::Value::Array(
                items.into_iter().map(|item| serde_json::json!(item)).collect(),
            ))
        }),
        _ => get::<RawBytes>(row, idx)?.map(|raw| Value::Bytes(raw.0)),
    };
    Ok(value.unwrap_or(Value::Null))
}
