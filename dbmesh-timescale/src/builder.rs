//! Time-bucketed aggregate query builder.
//!
//! The builder renders `SELECT` statements with positional `$n`
//! parameters. Arguments are accumulated in call order, and every clause
//! passed to [`TimeseriesQueryBuilder::r#where`] is renumbered so its
//! placeholders point past the arguments already collected.
//!
//! ```rust
//! use dbmesh_timescale::{AggregateFunction, TimeseriesQueryBuilder};
//!
//! let (sql, args) = TimeseriesQueryBuilder::new("metrics")
//!     .time_bucket("1 hour", "time")
//!     .aggregate(AggregateFunction::Avg, "value", None)
//!     .r#where("device_id = $1", ["dev-1".into()])
//!     .r#where("value > $1", [10.into()])
//!     .limit(100)
//!     .build();
//!
//! assert_eq!(
//!     sql,
//!     "SELECT time_bucket('1 hour', time) AS time_bucket, AVG(value) AS avg_value \
//!      FROM metrics WHERE device_id = $1 AND value > $2 GROUP BY time_bucket LIMIT 100"
//! );
//! assert_eq!(args.len(), 2);
//! ```
//!
//! Table names, columns and clauses are written into the statement as
//! given; callers pass validated identifiers (see [`crate::render`]) for
//! anything that did not originate in their own code.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use dbmesh_core::sql::{quote_literal, renumber_placeholders, top_level_keyword_positions};
use dbmesh_core::{DbError, Value};
use serde::{Deserialize, Serialize};

/// Alias given to the bucket column when the caller names none.
pub const DEFAULT_BUCKET_ALIAS: &str = "time_bucket";

/// Aggregate functions understood by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    /// Arithmetic mean.
    Avg,
    /// Sum of values.
    Sum,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
    /// Number of rows.
    Count,
    /// Value at the earliest time in the group.
    First,
    /// Value at the latest time in the group.
    Last,
}

impl AggregateFunction {
    /// SQL name of the function.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avg => "AVG",
            Self::Sum => "SUM",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Count => "COUNT",
            Self::First => "FIRST",
            Self::Last => "LAST",
        }
    }

    /// Whether the function takes the time column as a second argument.
    pub fn is_positional(&self) -> bool {
        matches!(self, Self::First | Self::Last)
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateFunction {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AVG" => Ok(Self::Avg),
            "SUM" => Ok(Self::Sum),
            "MIN" => Ok(Self::Min),
            "MAX" => Ok(Self::Max),
            "COUNT" => Ok(Self::Count),
            "FIRST" => Ok(Self::First),
            "LAST" => Ok(Self::Last),
            _ => Err(DbError::invalid(
                "aggregate",
                format!("unknown aggregate function '{}'", s),
            )),
        }
    }
}

/// One aggregation over a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnAggregation {
    /// The aggregate function.
    pub function: AggregateFunction,
    /// Column or expression aggregated.
    pub column: String,
    /// Output column name.
    pub alias: Option<String>,
}

impl ColumnAggregation {
    /// Aggregate `column` with `function`.
    pub fn new(function: AggregateFunction, column: impl Into<String>) -> Self {
        Self {
            function,
            column: column.into(),
            alias: None,
        }
    }

    /// Name the output column.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The output column name: the alias, or `lower(function)_column`.
    ///
    /// Characters that cannot appear in a bare identifier are folded to
    /// `_`, and `COUNT(*)` is named `count_all`.
    pub fn output_name(&self) -> String {
        if let Some(alias) = self.alias.as_deref().filter(|a| !a.is_empty()) {
            return alias.to_string();
        }

        let column = self.column.trim();
        let suffix = if column == "*" {
            "all".to_string()
        } else {
            let folded: String = column
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
                .collect();
            folded.trim_matches('_').to_string()
        };

        let function = self.function.as_str().to_ascii_lowercase();
        if suffix.is_empty() {
            function
        } else {
            format!("{}_{}", function, suffix)
        }
    }

    /// The aggregate call without its alias.
    pub fn expression(&self, time_column: Option<&str>) -> String {
        match time_column {
            Some(time) if self.function.is_positional() => {
                format!("{}({}, {})", self.function, self.column, time)
            }
            _ => format!("{}({})", self.function, self.column),
        }
    }

    /// The aggregate as a select item.
    pub fn to_sql(&self, time_column: Option<&str>) -> String {
        format!("{} AS {}", self.expression(time_column), self.output_name())
    }
}

/// A `time_bucket` select item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBucket {
    /// Bucket width, e.g. `1 hour`.
    pub interval: String,
    /// Source time column.
    pub column: String,
    /// Output column name.
    pub alias: String,
}

impl TimeBucket {
    /// The bucket as a select item.
    pub fn to_sql(&self) -> String {
        format!(
            "time_bucket({}, {}) AS {}",
            quote_literal(&self.interval),
            self.column,
            self.alias
        )
    }
}

/// Fluent builder for time-series `SELECT` statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeseriesQueryBuilder {
    table: String,
    bucket: Option<TimeBucket>,
    columns: Vec<String>,
    aggregations: Vec<ColumnAggregation>,
    predicates: Vec<String>,
    args: Vec<Value>,
    group_by: Vec<String>,
    order_by: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl TimeseriesQueryBuilder {
    /// Start a query over `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Bucket `column` by `interval`, aliased as `time_bucket`.
    pub fn time_bucket(self, interval: impl Into<String>, column: impl Into<String>) -> Self {
        self.time_bucket_as(interval, column, DEFAULT_BUCKET_ALIAS)
    }

    /// Bucket `column` by `interval` under a custom alias.
    pub fn time_bucket_as(
        mut self,
        interval: impl Into<String>,
        column: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        let alias = alias.into();
        self.bucket = Some(TimeBucket {
            interval: interval.into(),
            column: column.into(),
            alias: if alias.is_empty() {
                DEFAULT_BUCKET_ALIAS.to_string()
            } else {
                alias
            },
        });
        self
    }

    /// Add plain select columns.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Add an aggregation.
    pub fn aggregate(
        mut self,
        function: AggregateFunction,
        column: impl Into<String>,
        alias: Option<&str>,
    ) -> Self {
        let mut aggregation = ColumnAggregation::new(function, column);
        aggregation.alias = alias.map(str::to_string);
        self.aggregations.push(aggregation);
        self
    }

    /// Add a prepared aggregation.
    pub fn aggregation(mut self, aggregation: ColumnAggregation) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    /// Restrict `column` to `[start, end]`, binding both bounds.
    pub fn where_time_range(
        mut self,
        column: impl AsRef<str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        let first = self.args.len() + 1;
        self.predicates.push(format!(
            "{} BETWEEN ${} AND ${}",
            column.as_ref(),
            first,
            first + 1
        ));
        self.args.push(Value::Timestamp(start));
        self.args.push(Value::Timestamp(end));
        self
    }

    /// Add a predicate written with placeholders numbered from `$1`.
    ///
    /// Placeholders are shifted past the arguments collected so far, so
    /// `"a = $1"` after two earlier arguments becomes `"a = $3"`.
    pub fn r#where<I>(mut self, clause: impl AsRef<str>, args: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let clause = renumber_placeholders(clause.as_ref(), self.args.len());
        self.predicates.push(clause);
        self.args.extend(args);
        self
    }

    /// Add GROUP BY columns.
    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Add ORDER BY items.
    pub fn order_by<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order_by.extend(items.into_iter().map(Into::into));
        self
    }

    /// Set LIMIT. Zero means no limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set OFFSET. Zero means no offset.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The time bucket, if set.
    pub fn bucket(&self) -> Option<&TimeBucket> {
        self.bucket.as_ref()
    }

    /// Arguments collected so far, in binding order.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Render the statement and its arguments.
    pub fn build(&self) -> (String, Vec<Value>) {
        let mut select = Vec::with_capacity(1 + self.columns.len() + self.aggregations.len());
        let mut group_by = self.group_by.clone();

        if let Some(bucket) = &self.bucket {
            select.push(bucket.to_sql());
            if !group_by.iter().any(|c| c == &bucket.alias) {
                group_by.insert(0, bucket.alias.clone());
            }
        }
        select.extend(self.columns.iter().cloned());

        let time_column = self.bucket.as_ref().map(|b| b.column.as_str());
        select.extend(self.aggregations.iter().map(|a| a.to_sql(time_column)));

        let mut sql = String::with_capacity(128);
        sql.push_str("SELECT ");
        if select.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&select.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.table);

        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            let grouped = self.predicates.len() > 1;
            let predicates: Vec<String> = self
                .predicates
                .iter()
                .map(|p| {
                    if grouped && !top_level_keyword_positions(p, "OR").is_empty() {
                        format!("({})", p)
                    } else {
                        p.clone()
                    }
                })
                .collect();
            sql.push_str(&predicates.join(" AND "));
        }
        if !group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&group_by.join(", "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if let Some(limit) = self.limit.filter(|n| *n > 0) {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset.filter(|n| *n > 0) {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        (sql, self.args.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dbmesh_core::sql::placeholders;
    use pretty_assertions::assert_eq;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, d, 0, 0, 0).unwrap()
    }

    fn indices(sql: &str) -> Vec<usize> {
        placeholders(sql).into_iter().map(|p| p.index).collect()
    }

    #[test]
    fn test_bare_table_selects_star() {
        let (sql, args) = TimeseriesQueryBuilder::new("metrics").build();
        assert_eq!(sql, "SELECT * FROM metrics");
        assert!(args.is_empty());
    }

    #[test]
    fn test_select_order() {
        let (sql, _) = TimeseriesQueryBuilder::new("metrics")
            .aggregate(AggregateFunction::Max, "value", Some("peak"))
            .select(["device_id"])
            .time_bucket_as("5 minutes", "ts", "bucket")
            .group_by(["device_id"])
            .build();

        assert_eq!(
            sql,
            "SELECT time_bucket('5 minutes', ts) AS bucket, device_id, MAX(value) AS peak \
             FROM metrics GROUP BY bucket, device_id"
        );
    }

    #[test]
    fn test_bucket_alias_not_grouped_twice() {
        let (sql, _) = TimeseriesQueryBuilder::new("metrics")
            .time_bucket("1 day", "time")
            .group_by(["device_id", "time_bucket"])
            .build();
        assert!(sql.ends_with("GROUP BY device_id, time_bucket"));
    }

    #[test]
    fn test_renumbering_after_three_arguments() {
        let (sql, args) = TimeseriesQueryBuilder::new("metrics")
            .where_time_range("time", day(1), day(2))
            .r#where("device_id = $1", [Value::from("dev-1")])
            .r#where("value > $1 AND value < $2", [Value::Int(10), Value::Int(20)])
            .build();

        assert_eq!(
            sql,
            "SELECT * FROM metrics WHERE time BETWEEN $1 AND $2 AND device_id = $3 \
             AND value > $4 AND value < $5"
        );
        assert_eq!(
            args,
            vec![
                Value::Timestamp(day(1)),
                Value::Timestamp(day(2)),
                Value::from("dev-1"),
                Value::Int(10),
                Value::Int(20),
            ]
        );
    }

    #[test]
    fn test_renumbering_after_five_arguments() {
        let (sql, args) = TimeseriesQueryBuilder::new("metrics")
            .r#where("a = $1 AND b = $2 AND c = $3", [1.into(), 2.into(), 3.into()])
            .r#where("d IN ($1, $2)", [4.into(), 5.into()])
            .r#where("e = $2 OR f = $1", [6.into(), 7.into()])
            .build();

        assert_eq!(
            sql,
            "SELECT * FROM metrics WHERE a = $1 AND b = $2 AND c = $3 AND d IN ($4, $5) \
             AND (e = $7 OR f = $6)"
        );
        assert_eq!(args.len(), 7);
        assert_eq!(args[5], Value::Int(6));
    }

    #[test]
    fn test_or_clause_stays_inside_time_range() {
        let (sql, args) = TimeseriesQueryBuilder::new("metrics")
            .where_time_range("time", day(1), day(2))
            .r#where("host = $1 OR host = $2", ["a".into(), "b".into()])
            .build();

        assert_eq!(
            sql,
            "SELECT * FROM metrics WHERE time BETWEEN $1 AND $2 AND (host = $3 OR host = $4)"
        );
        assert_eq!(args.len(), 4);
    }

    #[test]
    fn test_lone_or_clause_is_not_wrapped() {
        let (sql, _) = TimeseriesQueryBuilder::new("metrics")
            .r#where("host = $1 OR (a = 1 AND b = 2)", ["a".into()])
            .build();
        assert_eq!(sql, "SELECT * FROM metrics WHERE host = $1 OR (a = 1 AND b = 2)");
    }

    #[test]
    fn test_renumbering_never_collides() {
        // $1 must not be shifted into an index that is then shifted again.
        let (sql, _) = TimeseriesQueryBuilder::new("t")
            .r#where("x = $1", [1.into()])
            .r#where("y = $1 AND z = $2", [2.into(), 3.into()])
            .build();
        assert_eq!(indices(&sql), vec![1, 2, 3]);
    }

    #[test]
    fn test_placeholders_track_argument_count() {
        let shapes = [2usize, 0, 3, 1, 4, 2];
        let mut builder = TimeseriesQueryBuilder::new("t");
        for (n, &k) in shapes.iter().enumerate() {
            let clause = (1..=k)
                .map(|i| format!("c{}_{} = ${}", n, i, i))
                .collect::<Vec<_>>()
                .join(" AND ");
            let clause = if clause.is_empty() { "TRUE".to_string() } else { clause };
            builder = builder.r#where(clause, (0..k).map(|i| Value::Int((n * 10 + i) as i64)));
        }

        let (sql, args) = builder.build();
        let total: usize = shapes.iter().sum();
        assert_eq!(indices(&sql), (1..=total).collect::<Vec<_>>());
        assert_eq!(args.len(), total);
        assert_eq!(args[2], Value::Int(20));
    }

    #[test]
    fn test_quoted_dollars_are_not_renumbered() {
        let (sql, _) = TimeseriesQueryBuilder::new("t")
            .r#where("a = $1", [1.into()])
            .r#where("note <> '$1' AND b = $1", [2.into()])
            .build();
        assert!(sql.ends_with("note <> '$1' AND b = $2"));
    }

    #[test]
    fn test_first_last_use_bucket_column() {
        let (sql, _) = TimeseriesQueryBuilder::new("metrics")
            .time_bucket("1 hour", "time")
            .aggregate(AggregateFunction::First, "value", None)
            .aggregate(AggregateFunction::Last, "value", None)
            .build();
        assert!(sql.contains("FIRST(value, time) AS first_value"));
        assert!(sql.contains("LAST(value, time) AS last_value"));
    }

    #[test]
    fn test_default_aliases() {
        assert_eq!(
            ColumnAggregation::new(AggregateFunction::Count, "*").output_name(),
            "count_all"
        );
        assert_eq!(
            ColumnAggregation::new(AggregateFunction::Sum, "m.bytes").output_name(),
            "sum_m_bytes"
        );
        assert_eq!(
            ColumnAggregation::new(AggregateFunction::Avg, "value")
                .alias("mean")
                .output_name(),
            "mean"
        );
    }

    #[test]
    fn test_zero_limit_and_offset_are_omitted() {
        let (sql, _) = TimeseriesQueryBuilder::new("metrics").limit(0).offset(0).build();
        assert_eq!(sql, "SELECT * FROM metrics");

        let (sql, _) = TimeseriesQueryBuilder::new("metrics")
            .order_by(["time DESC"])
            .limit(10)
            .offset(20)
            .build();
        assert_eq!(sql, "SELECT * FROM metrics ORDER BY time DESC LIMIT 10 OFFSET 20");
    }

    #[test]
    fn test_build_is_repeatable() {
        let builder = TimeseriesQueryBuilder::new("metrics").time_bucket("1 hour", "time");
        assert_eq!(builder.build(), builder.build());
        assert!(builder.build().0.ends_with("GROUP BY time_bucket"));
    }

    #[test]
    fn test_aggregate_function_parse() {
        assert_eq!("avg".parse::<AggregateFunction>().unwrap(), AggregateFunction::Avg);
        assert_eq!(" Last ".parse::<AggregateFunction>().unwrap(), AggregateFunction::Last);
        assert!("median".parse::<AggregateFunction>().is_err());
    }
}
