//! Integration tests for time-series query rendering.

use chrono::{DateTime, TimeZone, Utc};
use dbmesh::Value;
use dbmesh::timescale::{
    AggregateFunction, ColumnAggregation, TimeSeriesQueryOptions, TimeseriesQueryBuilder,
    WindowFunction, inject_window_functions,
};
use dbmesh_core::sql::placeholders;
use pretty_assertions::assert_eq;

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, d, 0, 0, 0).unwrap()
}

#[test]
fn test_metrics_end_to_end() {
    let (sql, args) = TimeseriesQueryBuilder::new("metrics")
        .time_bucket("1 hour", "time")
        .aggregate(AggregateFunction::Avg, "value", Some("avg_value"))
        .where_time_range("time", day(1), day(2))
        .limit(100)
        .build();

    for fragment in [
        "time_bucket('1 hour', time)",
        "AVG(value) AS avg_value",
        "FROM metrics",
        "BETWEEN $1 AND $2",
        "LIMIT 100",
    ] {
        assert!(sql.contains(fragment), "{} missing from {}", fragment, sql);
    }
    assert_eq!(args, vec![Value::Timestamp(day(1)), Value::Timestamp(day(2))]);

    let (facade_sql, facade_args) = TimeSeriesQueryOptions::new("metrics", "time", "1 hour")
        .aggregate(ColumnAggregation::new(AggregateFunction::Avg, "value").alias("avg_value"))
        .time_range(day(1), day(2))
        .limit(100)
        .render()
        .unwrap();
    assert_eq!(facade_sql, sql.replace(" LIMIT 100", " ORDER BY time_bucket LIMIT 100"));
    assert_eq!(facade_args, args);
}

#[test]
fn test_placeholders_follow_call_order() {
    let shapes: [&[i64]; 4] = [&[1, 2, 3], &[], &[4], &[5, 6]];
    let mut builder = TimeseriesQueryBuilder::new("readings").where_time_range("ts", day(1), day(3));

    for (n, values) in shapes.iter().enumerate() {
        let clause = (1..=values.len())
            .map(|i| format!("f{}_{} = ${}", n, i, i))
            .collect::<Vec<_>>()
            .join(" OR ");
        let clause = if clause.is_empty() { "TRUE".to_string() } else { clause };
        builder = builder.r#where(clause, values.iter().map(|v| Value::Int(*v)));
    }

    let (sql, args) = builder.build();
    let indices: Vec<usize> = placeholders(&sql).into_iter().map(|p| p.index).collect();
    assert_eq!(indices, (1..=8).collect::<Vec<_>>());
    assert_eq!(args.len(), 8);
    assert_eq!(&args[2..], &[1, 2, 3, 4, 5, 6].map(Value::Int)[..]);
}

#[test]
fn test_facade_with_window_and_predicate() {
    let (sql, args) = TimeSeriesQueryOptions::new("sensors.readings", "ts", "15 minutes")
        .bucket_alias("slot")
        .select(["device_id"])
        .aggregate(ColumnAggregation::new(AggregateFunction::Sum, "bytes"))
        .aggregate(ColumnAggregation::new(AggregateFunction::Count, "*"))
        .time_range(day(1), day(8))
        .r#where("device_id = ANY($1)", [Value::from("{a,b}")])
        .group_by(["device_id"])
        .window(
            WindowFunction::new("SUM", "SUM(bytes)")
                .partition_by("device_id")
                .order_by("slot")
                .alias("running_bytes"),
        )
        .limit(500)
        .offset(500)
        .render()
        .unwrap();

    assert_eq!(
        sql,
        "SELECT time_bucket('15 minutes', ts) AS slot, device_id, SUM(bytes) AS sum_bytes, \
         COUNT(*) AS count_all, \
         SUM(SUM(bytes)) OVER (PARTITION BY device_id ORDER BY slot) AS running_bytes \
         FROM sensors.readings WHERE ts BETWEEN $1 AND $2 AND device_id = ANY($3) \
         GROUP BY slot, device_id ORDER BY slot LIMIT 500 OFFSET 500"
    );
    assert_eq!(args.len(), 3);
}

#[test]
fn test_injection_leaves_ambiguous_queries_alone() {
    let lag = [WindowFunction::new("LAG", "v").order_by("t")];
    let union = "SELECT t, v FROM a UNION ALL SELECT t, v FROM b";
    assert_eq!(inject_window_functions(union, &lag), union);
    assert_eq!(inject_window_functions("SELECT now()", &lag), "SELECT now()");
}
