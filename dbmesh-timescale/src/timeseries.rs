//! Time-series queries, downsampling and analysis.
//!
//! [`TimeSeriesQueryOptions`] is the declarative form of a bucketed query.
//! Identifiers, intervals, columns and order-by items are validated;
//! the extra predicate and window-function expressions are written into the
//! statement as given and should bind caller values through `$n` arguments.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use dbmesh_core::{CallContext, DbError, DbResult, GenericRow, Value};
use serde::Serialize;
use tracing::info;

use crate::builder::{AggregateFunction, ColumnAggregation, DEFAULT_BUCKET_ALIAS, TimeseriesQueryBuilder};
use crate::db::{SqlOutcome, TimescaleDb};
use crate::hypertable::HypertableConfig;
use crate::render;
use crate::window::{WindowFunction, inject_window_functions};

/// Bucket widths offered to callers choosing an interval.
pub const COMMON_TIME_INTERVALS: &[&str] = &[
    "1 minute", "5 minutes", "10 minutes", "15 minutes", "30 minutes", "1 hour", "2 hours",
    "3 hours", "6 hours", "12 hours", "1 day", "1 week", "1 month", "3 months", "6 months",
    "1 year",
];

/// A closed time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub start: DateTime<Utc>,
    /// Inclusive upper bound.
    pub end: DateTime<Utc>,
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn first_of(year: i32, month: u32) -> DbResult<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(midnight)
        .ok_or_else(|| DbError::invalid("time_range", "date out of range"))
}

impl TimeRange {
    /// Create a range.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Resolve a named range relative to `now`.
    ///
    /// Names are case-insensitive and underscores are optional, so
    /// `last_7_days` and `Last7Days` are the same range. Weeks start on
    /// Sunday. "This" ranges end at `now`; "last" calendar ranges end at the
    /// start of the current period.
    pub fn predefined(name: &str, now: DateTime<Utc>) -> DbResult<Self> {
        let today = midnight(now.date_naive());
        let week_start = today - Duration::days(i64::from(now.weekday().num_days_from_sunday()));
        let key = name.trim().to_ascii_lowercase().replace('_', "");

        let range = match key.as_str() {
            "today" => Self::new(today, now),
            "yesterday" => Self::new(today - Duration::days(1), today),
            "last24hours" => Self::new(now - Duration::hours(24), now),
            "thisweek" => Self::new(week_start, now),
            "lastweek" => Self::new(week_start - Duration::days(7), week_start),
            "last7days" => Self::new(now - Duration::days(7), now),
            "thismonth" => Self::new(first_of(now.year(), now.month())?, now),
            "lastmonth" => {
                let (year, month) = if now.month() == 1 {
                    (now.year() - 1, 12)
                } else {
                    (now.year(), now.month() - 1)
                };
                Self::new(first_of(year, month)?, first_of(now.year(), now.month())?)
            }
            "last30days" => Self::new(now - Duration::days(30), now),
            "thisyear" => Self::new(first_of(now.year(), 1)?, now),
            "lastyear" => Self::new(first_of(now.year() - 1, 1)?, first_of(now.year(), 1)?),
            "last365days" => Self::new(now - Duration::days(365), now),
            _ => {
                return Err(DbError::invalid(
                    "time_range",
                    format!("unknown time range '{}'", name),
                ));
            }
        };
        Ok(range)
    }
}

/// Declarative bucketed query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeriesQueryOptions {
    /// Source table, optionally schema-qualified.
    pub table: String,
    /// Column holding the row timestamp.
    pub time_column: String,
    /// Bucket width, e.g. `1 hour`.
    pub bucket_interval: String,
    /// Bucket column name; `time_bucket` when unset.
    pub bucket_alias: Option<String>,
    /// Plain columns selected after the bucket.
    pub columns: Vec<String>,
    /// Aggregations selected after the plain columns.
    pub aggregations: Vec<ColumnAggregation>,
    /// Window functions injected into the final select list.
    pub window_functions: Vec<WindowFunction>,
    /// Restrict `time_column` to this range.
    pub time_range: Option<TimeRange>,
    /// Extra predicate with placeholders numbered from `$1`.
    pub where_condition: Option<String>,
    /// Arguments bound to `where_condition`.
    pub where_args: Vec<Value>,
    /// Grouping columns added after the bucket.
    pub group_by: Vec<String>,
    /// Order-by list; the bucket alias when unset.
    pub order_by: Option<String>,
    /// Row limit; zero means none.
    pub limit: u64,
    /// Rows to skip; zero means none.
    pub offset: u64,
}

impl TimeSeriesQueryOptions {
    /// Bucket `time_column` of `table` by `bucket_interval`.
    pub fn new(
        table: impl Into<String>,
        time_column: impl Into<String>,
        bucket_interval: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            time_column: time_column.into(),
            bucket_interval: bucket_interval.into(),
            ..Default::default()
        }
    }

    /// Name the bucket column.
    pub fn bucket_alias(mut self, alias: impl Into<String>) -> Self {
        self.bucket_alias = Some(alias.into());
        self
    }

    /// Add plain columns.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Add an aggregation.
    pub fn aggregate(mut self, aggregation: ColumnAggregation) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    /// Add a window function.
    pub fn window(mut self, function: WindowFunction) -> Self {
        self.window_functions.push(function);
        self
    }

    /// Restrict the time column to `[start, end]`.
    pub fn time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_range = Some(TimeRange::new(start, end));
        self
    }

    /// Set the extra predicate and its arguments.
    pub fn r#where<I>(mut self, condition: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        self.where_condition = Some(condition.into());
        self.where_args = args.into_iter().collect();
        self
    }

    /// Add GROUP BY columns after the bucket.
    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Set the order-by list.
    pub fn order_by(mut self, items: impl Into<String>) -> Self {
        self.order_by = Some(items.into());
        self
    }

    /// Set LIMIT.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Set OFFSET.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Validate the options and render the statement with its arguments.
    pub fn render(&self) -> DbResult<(String, Vec<Value>)> {
        let table = render::table("table", &self.table)?;
        let time_column = render::column("time_column", &self.time_column)?;
        let interval = render::interval("bucket_interval", &self.bucket_interval)?;
        let alias = match self.bucket_alias.as_deref().filter(|a| !a.trim().is_empty()) {
            Some(alias) => render::column("bucket_alias", alias)?.sql(),
            None => DEFAULT_BUCKET_ALIAS.to_string(),
        };

        let mut builder = TimeseriesQueryBuilder::new(table.sql()).time_bucket_as(
            interval.as_str(),
            time_column.sql(),
            alias.clone(),
        );

        let columns = self
            .columns
            .iter()
            .map(|c| render::column("columns", c).map(|c| c.sql()))
            .collect::<DbResult<Vec<_>>>()?;
        builder = builder.select(columns);

        for aggregation in &self.aggregations {
            builder = builder.aggregation(render::aggregation(aggregation)?);
        }

        if let Some(range) = &self.time_range {
            builder = builder.where_time_range(time_column.sql(), range.start, range.end);
        }
        if let Some(condition) = self.where_condition.as_deref().filter(|c| !c.trim().is_empty()) {
            builder = builder.r#where(condition, self.where_args.iter().cloned());
        }

        let group_by = self
            .group_by
            .iter()
            .map(|c| render::column("group_by", c).map(|c| c.sql()))
            .collect::<DbResult<Vec<_>>>()?;
        builder = builder.group_by(group_by);

        let order_by = match self.order_by.as_deref().filter(|o| !o.trim().is_empty()) {
            Some(order_by) => render::order_list("order_by", order_by)?,
            None => alias,
        };
        builder = builder
            .order_by([order_by])
            .limit(self.limit)
            .offset(self.offset);

        let (sql, args) = builder.build();
        Ok((inject_window_functions(&sql, &self.window_functions), args))
    }
}

/// Aggregation of one hypertable into another at a coarser bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownsampleOptions {
    /// Table read from.
    pub source_table: String,
    /// Table the buckets are inserted into.
    pub dest_table: String,
    /// Timestamp column of the source table.
    pub time_column: String,
    /// Bucket width, e.g. `1 hour`.
    pub bucket_interval: String,
    /// Aggregations computed per bucket; at least one is required.
    pub aggregations: Vec<ColumnAggregation>,
    /// Filter on source rows, written as given.
    pub where_condition: Option<String>,
    /// Create the destination hypertable if it does not exist.
    pub create_table: bool,
    /// Chunk width of a created destination; the bucket width when unset.
    pub chunk_time_interval: Option<String>,
}

impl DownsampleOptions {
    /// Downsample `source_table` into `dest_table`.
    pub fn new(
        source_table: impl Into<String>,
        dest_table: impl Into<String>,
        time_column: impl Into<String>,
        bucket_interval: impl Into<String>,
    ) -> Self {
        Self {
            source_table: source_table.into(),
            dest_table: dest_table.into(),
            time_column: time_column.into(),
            bucket_interval: bucket_interval.into(),
            ..Default::default()
        }
    }

    /// Add an aggregation.
    pub fn aggregate(mut self, aggregation: ColumnAggregation) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    /// Filter source rows.
    pub fn where_condition(mut self, condition: impl Into<String>) -> Self {
        self.where_condition = Some(condition.into());
        self
    }

    /// Create the destination hypertable first.
    pub fn create_table(mut self, yes: bool) -> Self {
        self.create_table = yes;
        self
    }

    /// Set the chunk width of a created destination.
    pub fn chunk_time_interval(mut self, interval: impl Into<String>) -> Self {
        self.chunk_time_interval = Some(interval.into());
        self
    }

    fn validated_aggregations(&self) -> DbResult<Vec<ColumnAggregation>> {
        if self.aggregations.is_empty() {
            return Err(DbError::invalid(
                "aggregations",
                "at least one aggregation is required",
            ));
        }
        self.aggregations.iter().map(render::aggregation).collect()
    }

    /// Render the `INSERT ... SELECT` statement.
    pub fn insert_sql(&self) -> DbResult<String> {
        let source = render::table("source_table", &self.source_table)?;
        let dest = render::table("dest_table", &self.dest_table)?;
        let time_column = render::column("time_column", &self.time_column)?;
        let interval = render::interval("bucket_interval", &self.bucket_interval)?;
        let aggregations = self.validated_aggregations()?;

        let mut targets = vec![DEFAULT_BUCKET_ALIAS.to_string()];
        targets.extend(aggregations.iter().map(ColumnAggregation::output_name));

        let mut builder = TimeseriesQueryBuilder::new(source.sql())
            .time_bucket(interval.as_str(), time_column.sql());
        for aggregation in aggregations {
            builder = builder.aggregation(aggregation);
        }
        if let Some(condition) = self.where_condition.as_deref().filter(|c| !c.trim().is_empty()) {
            builder = builder.r#where(condition, std::iter::empty());
        }
        let (select, _) = builder.order_by([DEFAULT_BUCKET_ALIAS]).build();

        Ok(format!(
            "INSERT INTO {} ({}) {}",
            dest.sql(),
            targets.join(", "),
            select
        ))
    }

    /// Render `CREATE TABLE` for the destination, typing each aggregate
    /// from the source column types.
    pub fn create_table_sql(&self, source_types: &[(String, String)]) -> DbResult<String> {
        let dest = render::table("dest_table", &self.dest_table)?;
        let aggregations = self.validated_aggregations()?;

        let mut columns = vec![format!("{} timestamptz NOT NULL", DEFAULT_BUCKET_ALIAS)];
        for (validated, original) in aggregations.iter().zip(&self.aggregations) {
            let data_type = match validated.function {
                AggregateFunction::Count => "bigint".to_string(),
                AggregateFunction::Avg => "double precision".to_string(),
                _ => source_types
                    .iter()
                    .find(|(name, _)| name == original.column.trim())
                    .map(|(_, data_type)| data_type.clone())
                    .unwrap_or_else(|| "double precision".to_string()),
            };
            columns.push(format!("{} {}", validated.output_name(), data_type));
        }
        columns.push(format!("PRIMARY KEY ({})", DEFAULT_BUCKET_ALIAS));

        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            dest.sql(),
            columns.join(", ")
        ))
    }
}

/// Statistics over a time range of one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeSeriesAnalysis {
    /// Rows inside the analyzed range.
    pub row_count: i64,
    /// Earliest timestamp, as text.
    pub min_time: Option<String>,
    /// Latest timestamp, as text.
    pub max_time: Option<String>,
    /// Hours between the first and last row.
    pub span_hours: Option<f64>,
    /// Number of distinct calendar days with data.
    pub unique_days: i64,
    /// Bucket width suited to the span.
    pub suggested_interval: Option<String>,
}

/// Suggest a bucket width for data spanning `hours`.
pub fn suggested_interval(hours: f64) -> &'static str {
    if hours <= 24.0 {
        "5 minutes"
    } else if hours <= 168.0 {
        "1 hour"
    } else if hours <= 720.0 {
        "6 hours"
    } else if hours <= 2160.0 {
        "1 day"
    } else {
        "1 week"
    }
}

impl TimeSeriesAnalysis {
    fn from_row(row: &GenericRow) -> Self {
        let row_count = row.int("row_count").unwrap_or(0);
        let span_hours = row.get("span_hours").and_then(Value::as_f64);
        let suggested = span_hours
            .filter(|h| row_count > 0 && *h > 0.0)
            .map(|h| suggested_interval(h).to_string());
        Self {
            row_count,
            min_time: render::text(row, "min_time"),
            max_time: render::text(row, "max_time"),
            span_hours,
            unique_days: row.int("unique_days").unwrap_or(0),
            suggested_interval: suggested,
        }
    }
}

impl TimescaleDb {
    /// Run a bucketed query.
    pub async fn time_series_query(
        &self,
        ctx: &CallContext,
        options: &TimeSeriesQueryOptions,
    ) -> DbResult<Vec<GenericRow>> {
        const OP: &str = "time_series_query";
        self.ensure_available(OP)?;

        let (sql, args) = options.render()?;
        self.fetch(ctx, OP, &sql, &args).await
    }

    /// Aggregate a source table into a destination table. Returns the
    /// number of rows inserted.
    pub async fn downsample(&self, ctx: &CallContext, options: &DownsampleOptions) -> DbResult<u64> {
        const OP: &str = "downsample";
        self.ensure_available(OP)?;

        let insert = options.insert_sql()?;

        if options.create_table {
            let source_types: Vec<(String, String)> = self
                .table_columns(ctx, &options.source_table)
                .await
                .map_err(|e| e.within(OP))?
                .into_iter()
                .map(|c| (c.name, c.data_type))
                .collect();
            self.run(ctx, OP, &options.create_table_sql(&source_types)?).await?;

            let chunk = options
                .chunk_time_interval
                .clone()
                .unwrap_or_else(|| options.bucket_interval.clone());
            let hypertable = HypertableConfig::new(&options.dest_table, DEFAULT_BUCKET_ALIAS)
                .chunk_time_interval(chunk)
                .if_not_exists(true);
            self.create_hypertable(ctx, &hypertable)
                .await
                .map_err(|e| e.within(OP))?;
        }

        let inserted = match self.run(ctx, OP, &insert).await? {
            SqlOutcome::Affected(result) => result.rows_affected,
            SqlOutcome::Rows(rows) => rows.len() as u64,
        };
        info!(
            connection = %self.connection().name(),
            source = %options.source_table,
            dest = %options.dest_table,
            rows = inserted,
            "Downsampled time series"
        );
        Ok(inserted)
    }

    /// Row count, bounds and span of `table` within `range`, with a
    /// suggested bucket width.
    pub async fn analyze_time_series(
        &self,
        ctx: &CallContext,
        table: &str,
        time_column: &str,
        range: TimeRange,
    ) -> DbResult<TimeSeriesAnalysis> {
        const OP: &str = "analyze_time_series";
        self.ensure_available(OP)?;

        let table = render::table("table", table)?;
        let time = render::column("time_column", time_column)?.sql();
        let sql = format!(
            "SELECT COUNT(*) AS row_count, MIN({t})::text AS min_time, MAX({t})::text AS max_time, \
             EXTRACT(EPOCH FROM (MAX({t}) - MIN({t}))) / 3600.0 AS span_hours, \
             COUNT(DISTINCT date_trunc('day', {t})) AS unique_days \
             FROM {table} WHERE {t} BETWEEN $1 AND $2",
            t = time,
            table = table.sql()
        );
        let args = [Value::Timestamp(range.start), Value::Timestamp(range.end)];

        let rows = self.fetch(ctx, OP, &sql, &args).await?;
        Ok(rows
            .first()
            .map(TimeSeriesAnalysis::from_row)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_metrics_query() {
        let options = TimeSeriesQueryOptions::new("metrics", "time", "1 hour")
            .aggregate(ColumnAggregation::new(AggregateFunction::Avg, "value").alias("avg_value"))
            .time_range(at(2023, 1, 1, 0), at(2023, 1, 2, 0))
            .limit(100);
        let (sql, args) = options.render().unwrap();

        assert_eq!(
            sql,
            "SELECT time_bucket('1 hour', time) AS time_bucket, AVG(value) AS avg_value \
             FROM metrics WHERE time BETWEEN $1 AND $2 GROUP BY time_bucket \
             ORDER BY time_bucket LIMIT 100"
        );
        assert_eq!(
            args,
            vec![
                Value::Timestamp(at(2023, 1, 1, 0)),
                Value::Timestamp(at(2023, 1, 2, 0))
            ]
        );
    }

    #[test]
    fn test_predicate_follows_time_range() {
        let options = TimeSeriesQueryOptions::new("metrics", "time", "5 minutes")
            .bucket_alias("bucket")
            .select(["device_id"])
            .aggregate(ColumnAggregation::new(AggregateFunction::Max, "value"))
            .time_range(at(2023, 1, 1, 0), at(2023, 1, 1, 6))
            .r#where("device_id = $1 AND value > $2", [Value::from("dev-7"), Value::Int(3)])
            .group_by(["device_id"])
            .order_by("bucket desc")
            .offset(20);
        let (sql, args) = options.render().unwrap();

        assert_eq!(
            sql,
            "SELECT time_bucket('5 minutes', time) AS bucket, device_id, MAX(value) AS max_value \
             FROM metrics WHERE time BETWEEN $1 AND $2 AND device_id = $3 AND value > $4 \
             GROUP BY bucket, device_id ORDER BY bucket DESC OFFSET 20"
        );
        assert_eq!(args.len(), 4);
        assert_eq!(args[2], Value::from("dev-7"));
    }

    #[test]
    fn test_or_predicate_is_grouped_under_time_range() {
        let (sql, _) = TimeSeriesQueryOptions::new("metrics", "time", "1 hour")
            .time_range(at(2023, 1, 1, 0), at(2023, 1, 2, 0))
            .r#where("host = $1 OR host = $2", [Value::from("a"), Value::from("b")])
            .render()
            .unwrap();
        assert!(
            sql.contains("WHERE time BETWEEN $1 AND $2 AND (host = $3 OR host = $4)"),
            "{}",
            sql
        );
    }

    #[test]
    fn test_window_functions_are_injected() {
        let options = TimeSeriesQueryOptions::new("metrics", "time", "1 hour")
            .aggregate(ColumnAggregation::new(AggregateFunction::Avg, "value"))
            .window(
                WindowFunction::new("LAG", "AVG(value)")
                    .order_by("time_bucket")
                    .alias("prev_avg"),
            );
        let (sql, _) = options.render().unwrap();
        assert_eq!(
            sql,
            "SELECT time_bucket('1 hour', time) AS time_bucket, AVG(value) AS avg_value, \
             LAG(AVG(value)) OVER (ORDER BY time_bucket) AS prev_avg \
             FROM metrics GROUP BY time_bucket ORDER BY time_bucket"
        );
    }

    #[test]
    fn test_render_rejects_bad_identifiers() {
        assert!(TimeSeriesQueryOptions::new("metrics; DROP TABLE x", "time", "1 hour")
            .render()
            .is_err());
        assert!(TimeSeriesQueryOptions::new("metrics", "time", "1 fortnight")
            .render()
            .is_err());
        assert!(TimeSeriesQueryOptions::new("metrics", "time", "1 hour")
            .order_by("time; --")
            .render()
            .is_err());
    }

    #[test]
    fn test_downsample_statements() {
        let options = DownsampleOptions::new("metrics", "metrics_daily", "time", "1 day")
            .aggregate(ColumnAggregation::new(AggregateFunction::Avg, "value"))
            .aggregate(ColumnAggregation::new(AggregateFunction::Max, "value"))
            .aggregate(ColumnAggregation::new(AggregateFunction::Count, "*"));

        assert_eq!(
            options.insert_sql().unwrap(),
            "INSERT INTO metrics_daily (time_bucket, avg_value, max_value, count_all) \
             SELECT time_bucket('1 day', time) AS time_bucket, AVG(value) AS avg_value, \
             MAX(value) AS max_value, COUNT(*) AS count_all FROM metrics \
             GROUP BY time_bucket ORDER BY time_bucket"
        );

        let types = vec![("value".to_string(), "real".to_string())];
        assert_eq!(
            options.create_table_sql(&types).unwrap(),
            "CREATE TABLE IF NOT EXISTS metrics_daily (time_bucket timestamptz NOT NULL, \
             avg_value double precision, max_value real, count_all bigint, \
             PRIMARY KEY (time_bucket))"
        );
    }

    #[test]
    fn test_downsample_needs_aggregations() {
        let options = DownsampleOptions::new("metrics", "metrics_daily", "time", "1 day");
        assert!(matches!(
            options.insert_sql(),
            Err(DbError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_suggested_interval() {
        assert_eq!(suggested_interval(12.0), "5 minutes");
        assert_eq!(suggested_interval(100.0), "1 hour");
        assert_eq!(suggested_interval(500.0), "6 hours");
        assert_eq!(suggested_interval(2000.0), "1 day");
        assert_eq!(suggested_interval(9000.0), "1 week");
    }

    #[test]
    fn test_predefined_ranges() {
        // Wednesday.
        let now = at(2024, 3, 13, 15);

        let today = TimeRange::predefined("today", now).unwrap();
        assert_eq!(today, TimeRange::new(at(2024, 3, 13, 0), now));

        let yesterday = TimeRange::predefined("Yesterday", now).unwrap();
        assert_eq!(yesterday, TimeRange::new(at(2024, 3, 12, 0), at(2024, 3, 13, 0)));

        let this_week = TimeRange::predefined("this_week", now).unwrap();
        assert_eq!(this_week.start, at(2024, 3, 10, 0));

        let last_week = TimeRange::predefined("lastweek", now).unwrap();
        assert_eq!(last_week, TimeRange::new(at(2024, 3, 3, 0), at(2024, 3, 10, 0)));

        let last_month = TimeRange::predefined("last_month", now).unwrap();
        assert_eq!(last_month, TimeRange::new(at(2024, 2, 1, 0), at(2024, 3, 1, 0)));

        let last_year = TimeRange::predefined("last_year", now).unwrap();
        assert_eq!(last_year, TimeRange::new(at(2023, 1, 1, 0), at(2024, 1, 1, 0)));

        let last_day = TimeRange::predefined("last_24_hours", now).unwrap();
        assert_eq!(last_day.start, at(2024, 3, 12, 15));

        assert!(TimeRange::predefined("next_week", now).is_err());
    }

    #[test]
    fn test_last_month_in_january() {
        let now = at(2024, 1, 20, 8);
        let range = TimeRange::predefined("last_month", now).unwrap();
        assert_eq!(range, TimeRange::new(at(2023, 12, 1, 0), at(2024, 1, 1, 0)));
    }

    #[test]
    fn test_analysis_from_row() {
        let row = GenericRow::from_parts(
            ["row_count", "min_time", "max_time", "span_hours", "unique_days"].map(String::from),
            [
                Value::Int(1440),
                Value::from("2023-01-01 00:00:00+00"),
                Value::from("2023-01-02 00:00:00+00"),
                Value::Float(24.0),
                Value::Int(2),
            ],
        );
        let analysis = TimeSeriesAnalysis::from_row(&row);
        assert_eq!(analysis.row_count, 1440);
        assert_eq!(analysis.suggested_interval.as_deref(), Some("5 minutes"));

        let empty = GenericRow::from_parts(
            ["row_count", "span_hours"].map(String::from),
            [Value::Int(0), Value::Null],
        );
        assert_eq!(TimeSeriesAnalysis::from_row(&empty).suggested_interval, None);
    }
}
