//! Rendering of validated caller input into extension statements.
//!
//! Every identifier, column list and interval an extension operation puts
//! into statement text passes through one of these helpers.

use chrono::{DateTime, Utc};
use dbmesh_core::sql::{quote_identifier, quote_literal};
use dbmesh_core::{DbError, DbResult, GenericRow, Ident, Interval};

use crate::builder::{AggregateFunction, ColumnAggregation};

/// Validate a hypertable, view or table name.
pub fn table(field: &str, value: &str) -> DbResult<Ident> {
    Ident::parse(field, value)
}

/// Validate an unqualified column name.
pub fn column(field: &str, value: &str) -> DbResult<Ident> {
    let ident = Ident::parse(field, value)?;
    if ident.schema().is_some() {
        return Err(DbError::invalid(
            field,
            format!("'{}' must be a plain column name", value),
        ));
    }
    Ok(ident)
}

/// Validate an interval.
pub fn interval(field: &str, value: &str) -> DbResult<Interval> {
    Interval::parse(field, value)
}

/// Validate a comma-separated column list such as `device_id, location`.
pub fn column_list(field: &str, value: &str) -> DbResult<String> {
    let columns = value
        .split(',')
        .map(|c| column(field, c).map(|c| c.sql()))
        .collect::<DbResult<Vec<_>>>()?;
    Ok(columns.join(", "))
}

/// Validate an order-by list such as `time DESC, device_id NULLS FIRST`.
pub fn order_list(field: &str, value: &str) -> DbResult<String> {
    let mut items = Vec::new();
    for item in value.split(',') {
        let mut words = item.split_whitespace();
        let name = words
            .next()
            .ok_or_else(|| DbError::invalid(field, "empty order-by item"))?;
        let mut rendered = column(field, name)?.sql();

        let modifiers: Vec<String> = words.map(str::to_ascii_uppercase).collect();
        let modifiers: Vec<&str> = modifiers.iter().map(String::as_str).collect();
        let suffix = match modifiers.as_slice() {
            [] => "",
            ["ASC"] => " ASC",
            ["DESC"] => " DESC",
            ["NULLS", "FIRST"] => " NULLS FIRST",
            ["NULLS", "LAST"] => " NULLS LAST",
            ["ASC", "NULLS", "FIRST"] => " ASC NULLS FIRST",
            ["ASC", "NULLS", "LAST"] => " ASC NULLS LAST",
            ["DESC", "NULLS", "FIRST"] => " DESC NULLS FIRST",
            ["DESC", "NULLS", "LAST"] => " DESC NULLS LAST",
            _ => {
                return Err(DbError::invalid(
                    field,
                    format!("'{}' is not a valid order-by item", item.trim()),
                ));
            }
        };
        rendered.push_str(suffix);
        items.push(rendered);
    }
    Ok(items.join(", "))
}

/// Validate an aggregation's column and alias.
///
/// `*` is accepted only for `COUNT`.
pub fn aggregation(aggregation: &ColumnAggregation) -> DbResult<ColumnAggregation> {
    let source = match aggregation.column.trim() {
        "*" if aggregation.function == AggregateFunction::Count => "*".to_string(),
        other => column("aggregation column", other)?.sql(),
    };
    let alias = aggregation
        .alias
        .as_deref()
        .filter(|a| !a.trim().is_empty())
        .map(|a| column("aggregation alias", a).map(|ident| ident.sql()))
        .transpose()?;
    Ok(ColumnAggregation {
        function: aggregation.function,
        column: source,
        alias,
    })
}

/// Catalog predicate matching a relation by name, and by schema when the
/// identifier is qualified.
pub fn relation_filter(ident: &Ident, name_column: &str, schema_column: &str) -> String {
    match ident.schema() {
        Some(schema) => format!(
            "{} = {} AND {} = {}",
            name_column,
            ident.name_literal(),
            schema_column,
            quote_literal(schema)
        ),
        None => format!("{} = {}", name_column, ident.name_literal()),
    }
}

/// A `timestamptz` literal, or `NULL` for an open bound.
pub fn timestamp(bound: Option<DateTime<Utc>>) -> String {
    match bound {
        Some(ts) => format!("{}::timestamptz", quote_literal(&ts.to_rfc3339())),
        None => "NULL".to_string(),
    }
}

/// An `INTERVAL` literal, or `NULL` when absent.
pub fn interval_or_null(value: Option<&Interval>) -> String {
    value.map_or_else(|| "NULL".to_string(), Interval::literal)
}

/// Quote a column name read back from the catalog.
pub fn catalog_column(name: &str) -> String {
    quote_identifier(name)
}

/// Read an optional text column, treating empty text as absent.
pub fn text(row: &GenericRow, column: &str) -> Option<String> {
    row.text(column).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_column_list() {
        assert_eq!(
            column_list("segment_by", "device_id, location").unwrap(),
            "device_id, location"
        );
        assert!(column_list("segment_by", "device_id; DROP TABLE t").is_err());
        assert!(column_list("segment_by", "public.device_id").is_err());
        assert!(column_list("segment_by", "a,,b").is_err());
    }

    #[test]
    fn test_order_list() {
        assert_eq!(
            order_list("order_by", "time desc, device_id NULLS FIRST").unwrap(),
            "time DESC, device_id NULLS FIRST"
        );
        assert!(order_list("order_by", "time SIDEWAYS").is_err());
        assert!(order_list("order_by", "time DESC; --").is_err());
    }

    #[test]
    fn test_aggregation() {
        let count = ColumnAggregation::new(AggregateFunction::Count, "*");
        assert_eq!(aggregation(&count).unwrap(), count);

        let avg = ColumnAggregation::new(AggregateFunction::Avg, " value ").alias("mean");
        assert_eq!(
            aggregation(&avg).unwrap(),
            ColumnAggregation::new(AggregateFunction::Avg, "value").alias("mean")
        );

        assert!(aggregation(&ColumnAggregation::new(AggregateFunction::Sum, "*")).is_err());
        assert!(
            aggregation(&ColumnAggregation::new(AggregateFunction::Max, "value) FROM x; --"))
                .is_err()
        );
        assert!(
            aggregation(&ColumnAggregation::new(AggregateFunction::Min, "v").alias("a b")).is_err()
        );
    }

    #[test]
    fn test_relation_filter() {
        let plain = table("table", "metrics").unwrap();
        assert_eq!(
            relation_filter(&plain, "hypertable_name", "hypertable_schema"),
            "hypertable_name = 'metrics'"
        );

        let qualified = table("table", "sensors.metrics").unwrap();
        assert_eq!(
            relation_filter(&qualified, "hypertable_name", "hypertable_schema"),
            "hypertable_name = 'metrics' AND hypertable_schema = 'sensors'"
        );
    }

    #[test]
    fn test_timestamp_bounds() {
        let ts = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            timestamp(Some(ts)),
            "'2023-01-01T00:00:00+00:00'::timestamptz"
        );
        assert_eq!(timestamp(None), "NULL");
    }
}
