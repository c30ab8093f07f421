//! Continuous aggregates and their refresh policies.

use chrono::{DateTime, Utc};
use dbmesh_core::{CallContext, DbError, DbResult, GenericRow, Ident};
use serde::Serialize;
use tracing::info;

use crate::builder::{AggregateFunction, ColumnAggregation, TimeseriesQueryBuilder};
use crate::db::TimescaleDb;
use crate::render;

/// Default refresh policy schedule.
pub const DEFAULT_REFRESH_SCHEDULE: &str = "1 day";
/// Default refresh policy look-back.
pub const DEFAULT_REFRESH_LOOKBACK: &str = "1 week";

const REFRESH_JOB: &str = "policy_refresh_continuous_aggregate";

/// When and over which window a continuous aggregate is refreshed.
///
/// Unset fields fall back to a `1 day` schedule, a `1 week` start offset and
/// an open end offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// How far back each refresh reaches.
    pub start_offset: Option<String>,
    /// How close to now each refresh stops.
    pub end_offset: Option<String>,
    /// How often the policy runs.
    pub schedule_interval: Option<String>,
}

impl RefreshPolicy {
    /// The default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the start offset.
    pub fn start_offset(mut self, interval: impl Into<String>) -> Self {
        self.start_offset = Some(interval.into());
        self
    }

    /// Set the end offset.
    pub fn end_offset(mut self, interval: impl Into<String>) -> Self {
        self.end_offset = Some(interval.into());
        self
    }

    /// Set the schedule.
    pub fn schedule_interval(mut self, interval: impl Into<String>) -> Self {
        self.schedule_interval = Some(interval.into());
        self
    }

    fn render(&self, view: &Ident) -> DbResult<String> {
        let start = render::interval(
            "start_offset",
            self.start_offset.as_deref().unwrap_or(DEFAULT_REFRESH_LOOKBACK),
        )?;
        let end = self
            .end_offset
            .as_deref()
            .map(|e| render::interval("end_offset", e))
            .transpose()?;
        let schedule = render::interval(
            "schedule_interval",
            self.schedule_interval
                .as_deref()
                .unwrap_or(DEFAULT_REFRESH_SCHEDULE),
        )?;

        Ok(format!(
            "SELECT add_continuous_aggregate_policy({}, start_offset => {}, end_offset => {}, schedule_interval => {})",
            view.literal(),
            start.literal(),
            render::interval_or_null(end.as_ref()),
            schedule.literal()
        ))
    }
}

/// Definition of a continuous aggregate view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContinuousAggregateOptions {
    /// View to create.
    pub view: String,
    /// Hypertable read by the view.
    pub source_table: String,
    /// Time column bucketed by the view.
    pub time_column: String,
    /// Bucket width.
    pub bucket_interval: String,
    /// Aggregated columns; `COUNT(*) AS count` when empty.
    pub aggregations: Vec<ColumnAggregation>,
    /// Filter written into the view definition as given.
    pub where_condition: Option<String>,
    /// Materialize existing data on creation.
    pub with_data: bool,
    /// Serve only materialized rows.
    pub materialized_only: bool,
    /// Skip creation if the view exists.
    pub if_not_exists: bool,
    /// Refresh policy added after creation.
    pub refresh_policy: Option<RefreshPolicy>,
}

impl ContinuousAggregateOptions {
    /// Bucket `time_column` of `source_table` by `bucket_interval` into `view`.
    pub fn new(
        view: impl Into<String>,
        source_table: impl Into<String>,
        time_column: impl Into<String>,
        bucket_interval: impl Into<String>,
    ) -> Self {
        Self {
            view: view.into(),
            source_table: source_table.into(),
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

    /// Set `WITH DATA`.
    pub fn with_data(mut self, yes: bool) -> Self {
        self.with_data = yes;
        self
    }

    /// Set `timescaledb.materialized_only`.
    pub fn materialized_only(mut self, yes: bool) -> Self {
        self.materialized_only = yes;
        self
    }

    /// Set `IF NOT EXISTS`.
    pub fn if_not_exists(mut self, yes: bool) -> Self {
        self.if_not_exists = yes;
        self
    }

    /// Add a refresh policy after creation.
    pub fn refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.refresh_policy = Some(policy);
        self
    }

    /// Render the `CREATE MATERIALIZED VIEW` statement.
    pub fn to_sql(&self) -> DbResult<String> {
        let view = render::table("view", &self.view)?;
        let source = render::table("source_table", &self.source_table)?;
        let time_column = render::column("time_column", &self.time_column)?;
        let interval = render::interval("bucket_interval", &self.bucket_interval)?;

        let mut query = TimeseriesQueryBuilder::new(source.sql())
            .time_bucket(interval.as_str(), time_column.sql());
        if self.aggregations.is_empty() {
            query = query
                .aggregation(ColumnAggregation::new(AggregateFunction::Count, "*").alias("count"));
        }
        for aggregation in &self.aggregations {
            query = query.aggregation(render::aggregation(aggregation)?);
        }
        if let Some(condition) = self.where_condition.as_deref().filter(|c| !c.trim().is_empty()) {
            query = query.r#where(condition, std::iter::empty());
        }
        let (select, _) = query.build();

        let mut sql = String::from("CREATE MATERIALIZED VIEW ");
        if self.if_not_exists {
            sql.push_str("IF NOT EXISTS ");
        }
        sql.push_str(&view.sql());
        sql.push_str(" WITH (timescaledb.continuous");
        if self.materialized_only {
            sql.push_str(", timescaledb.materialized_only = true");
        }
        sql.push_str(") AS ");
        sql.push_str(&select);
        sql.push_str(if self.with_data {
            " WITH DATA"
        } else {
            " WITH NO DATA"
        });
        Ok(sql)
    }
}

/// A continuous aggregate as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContinuousAggregateMetadata {
    /// View name.
    pub view_name: String,
    /// View schema.
    pub view_schema: String,
    /// Source hypertable name.
    pub hypertable_name: String,
    /// Source hypertable schema.
    pub hypertable_schema: String,
    /// Whether only materialized rows are served.
    pub materialized_only: bool,
    /// The view's defining query.
    pub view_definition: Option<String>,
    /// Refresh policy schedule.
    pub refresh_schedule: Option<String>,
    /// Refresh policy start offset.
    pub refresh_start_offset: Option<String>,
    /// Refresh policy end offset.
    pub refresh_end_offset: Option<String>,
}

impl ContinuousAggregateMetadata {
    fn from_row(row: &GenericRow) -> Self {
        Self {
            view_name: row.text("view_name").unwrap_or_default(),
            view_schema: row.text("view_schema").unwrap_or_default(),
            hypertable_name: row.text("hypertable_name").unwrap_or_default(),
            hypertable_schema: row.text("hypertable_schema").unwrap_or_default(),
            materialized_only: row.bool("materialized_only").unwrap_or(false),
            view_definition: render::text(row, "view_definition"),
            refresh_schedule: render::text(row, "schedule_interval"),
            refresh_start_offset: render::text(row, "start_offset"),
            refresh_end_offset: render::text(row, "end_offset"),
        }
    }

    /// Whether a refresh policy exists.
    pub fn has_policy(&self) -> bool {
        self.refresh_schedule.is_some()
    }
}

/// Catalog entry plus storage details of one continuous aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContinuousAggregateInfo {
    /// Catalog entry.
    #[serde(flatten)]
    pub metadata: ContinuousAggregateMetadata,
    /// Whether a refresh policy exists.
    pub has_policy: bool,
    /// Size of the materialized data.
    pub view_size: Option<String>,
    /// Start of the earliest materialized chunk.
    pub materialized_from: Option<String>,
    /// End of the latest materialized chunk.
    pub materialized_to: Option<String>,
}

const AGGREGATES_QUERY: &str = "SELECT ca.view_schema, ca.view_name, ca.hypertable_schema, \
     ca.hypertable_name, ca.materialized_only, ca.view_definition, \
     j.schedule_interval::text AS schedule_interval, \
     j.config->>'start_offset' AS start_offset, j.config->>'end_offset' AS end_offset";

fn aggregates_from(extra_columns: &str) -> String {
    format!(
        "{}{} FROM timescaledb_information.continuous_aggregates ca \
         LEFT JOIN timescaledb_information.jobs j \
         ON j.hypertable_schema = ca.materialization_hypertable_schema \
         AND j.hypertable_name = ca.materialization_hypertable_name \
         AND j.proc_name = '{}'",
        AGGREGATES_QUERY, extra_columns, REFRESH_JOB
    )
}

impl TimescaleDb {
    /// Create a continuous aggregate, then its refresh policy if requested.
    ///
    /// The policy is added in a second statement; if it fails the view
    /// remains.
    pub async fn create_continuous_aggregate(
        &self,
        ctx: &CallContext,
        options: &ContinuousAggregateOptions,
    ) -> DbResult<()> {
        const OP: &str = "create_continuous_aggregate";
        self.ensure_available(OP)?;

        let sql = options.to_sql()?;
        let policy = match &options.refresh_policy {
            Some(policy) => Some(policy.render(&render::table("view", &options.view)?)?),
            None => None,
        };

        self.run(ctx, OP, &sql).await?;
        info!(connection = %self.connection().name(), view = %options.view, "Created continuous aggregate");

        if let Some(policy) = policy {
            self.run(ctx, OP, &policy).await?;
        }
        Ok(())
    }

    /// Materialize the window `[start, end)`. Open bounds are unbounded.
    pub async fn refresh_continuous_aggregate(
        &self,
        ctx: &CallContext,
        view: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        const OP: &str = "refresh_continuous_aggregate";
        self.ensure_available(OP)?;

        let view = render::table("view", view)?;
        let sql = format!(
            "CALL refresh_continuous_aggregate({}, {}, {})",
            view.literal(),
            render::timestamp(start),
            render::timestamp(end)
        );
        self.run(ctx, OP, &sql).await?;
        Ok(())
    }

    /// Add a refresh policy to a continuous aggregate.
    pub async fn add_continuous_aggregate_policy(
        &self,
        ctx: &CallContext,
        view: &str,
        policy: &RefreshPolicy,
    ) -> DbResult<()> {
        const OP: &str = "add_continuous_aggregate_policy";
        self.ensure_available(OP)?;

        let view = render::table("view", view)?;
        let sql = policy.render(&view)?;
        self.run(ctx, OP, &sql).await?;
        Ok(())
    }

    /// Remove the refresh policy of a continuous aggregate.
    pub async fn remove_continuous_aggregate_policy(
        &self,
        ctx: &CallContext,
        view: &str,
    ) -> DbResult<()> {
        const OP: &str = "remove_continuous_aggregate_policy";
        self.ensure_available(OP)?;

        let view = render::table("view", view)?;
        let sql = format!("SELECT remove_continuous_aggregate_policy({})", view.literal());
        self.run(ctx, OP, &sql).await?;
        Ok(())
    }

    /// Drop a continuous aggregate.
    pub async fn drop_continuous_aggregate(
        &self,
        ctx: &CallContext,
        view: &str,
        cascade: bool,
    ) -> DbResult<()> {
        const OP: &str = "drop_continuous_aggregate";
        self.ensure_available(OP)?;

        let view = render::table("view", view)?;
        let mut sql = format!("DROP MATERIALIZED VIEW {}", view.sql());
        if cascade {
            sql.push_str(" CASCADE");
        }
        self.run(ctx, OP, &sql).await?;
        Ok(())
    }

    /// Every continuous aggregate in the database.
    pub async fn list_continuous_aggregates(
        &self,
        ctx: &CallContext,
    ) -> DbResult<Vec<ContinuousAggregateMetadata>> {
        const OP: &str = "list_continuous_aggregates";
        self.ensure_available(OP)?;

        let sql = format!("{} ORDER BY ca.view_schema, ca.view_name", aggregates_from(""));
        let rows = self.fetch(ctx, OP, &sql, &[]).await?;
        Ok(rows.iter().map(ContinuousAggregateMetadata::from_row).collect())
    }

    /// Catalog entry, policy and storage details of one continuous
    /// aggregate.
    pub async fn continuous_aggregate_info(
        &self,
        ctx: &CallContext,
        view: &str,
    ) -> DbResult<ContinuousAggregateInfo> {
        const OP: &str = "continuous_aggregate_info";
        self.ensure_available(OP)?;

        let ident = render::table("view", view)?;
        let storage = ", pg_size_pretty(hypertable_size(format('%I.%I', \
             ca.materialization_hypertable_schema, ca.materialization_hypertable_name)::regclass)) AS view_size, \
             (SELECT min(c.range_start) FROM timescaledb_information.chunks c \
             WHERE c.hypertable_schema = ca.materialization_hypertable_schema \
             AND c.hypertable_name = ca.materialization_hypertable_name)::text AS materialized_from, \
             (SELECT max(c.range_end) FROM timescaledb_information.chunks c \
             WHERE c.hypertable_schema = ca.materialization_hypertable_schema \
             AND c.hypertable_name = ca.materialization_hypertable_name)::text AS materialized_to";
        let sql = format!(
            "{} WHERE {}",
            aggregates_from(storage),
            render::relation_filter(&ident, "ca.view_name", "ca.view_schema")
        );

        let row = self
            .fetch_one(ctx, OP, &sql)
            .await?
            .ok_or_else(|| DbError::not_found("continuous aggregate", ident.raw()))?;
        let metadata = ContinuousAggregateMetadata::from_row(&row);
        Ok(ContinuousAggregateInfo {
            has_policy: metadata.has_policy(),
            view_size: render::text(&row, "view_size"),
            materialized_from: render::text(&row, "materialized_from"),
            materialized_to: render::text(&row, "materialized_to"),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbmesh_core::Value;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_definition() {
        let options = ContinuousAggregateOptions::new("metrics_hourly", "metrics", "time", "1 hour");
        assert_eq!(
            options.to_sql().unwrap(),
            "CREATE MATERIALIZED VIEW metrics_hourly WITH (timescaledb.continuous) AS \
             SELECT time_bucket('1 hour', time) AS time_bucket, COUNT(*) AS count \
             FROM metrics GROUP BY time_bucket WITH NO DATA"
        );
    }

    #[test]
    fn test_full_definition() {
        let options = ContinuousAggregateOptions::new("metrics_daily", "metrics", "time", "1 day")
            .aggregate(ColumnAggregation::new(AggregateFunction::Avg, "value"))
            .aggregate(ColumnAggregation::new(AggregateFunction::Max, "value").alias("peak"))
            .where_condition("device_id IS NOT NULL")
            .materialized_only(true)
            .if_not_exists(true)
            .with_data(true);
        assert_eq!(
            options.to_sql().unwrap(),
            "CREATE MATERIALIZED VIEW IF NOT EXISTS metrics_daily \
             WITH (timescaledb.continuous, timescaledb.materialized_only = true) AS \
             SELECT time_bucket('1 day', time) AS time_bucket, AVG(value) AS avg_value, \
             MAX(value) AS peak FROM metrics WHERE device_id IS NOT NULL \
             GROUP BY time_bucket WITH DATA"
        );
    }

    #[test]
    fn test_definition_rejects_bad_input() {
        let bad_interval = ContinuousAggregateOptions::new("v", "metrics", "time", "1 hour'); --");
        assert!(bad_interval.to_sql().is_err());

        let bad_view = ContinuousAggregateOptions::new("v; DROP TABLE x", "metrics", "time", "1 hour");
        assert!(bad_view.to_sql().is_err());
    }

    #[test]
    fn test_policy_defaults() {
        let view = render::table("view", "metrics_hourly").unwrap();
        assert_eq!(
            RefreshPolicy::new().render(&view).unwrap(),
            "SELECT add_continuous_aggregate_policy('metrics_hourly', \
             start_offset => INTERVAL '1 week', end_offset => NULL, \
             schedule_interval => INTERVAL '1 day')"
        );
        assert_eq!(
            RefreshPolicy::new()
                .start_offset("3 days")
                .end_offset("1 hour")
                .schedule_interval("30 minutes")
                .render(&view)
                .unwrap(),
            "SELECT add_continuous_aggregate_policy('metrics_hourly', \
             start_offset => INTERVAL '3 days', end_offset => INTERVAL '1 hour', \
             schedule_interval => INTERVAL '30 minutes')"
        );
    }

    #[test]
    fn test_metadata_from_row() {
        let row = GenericRow::from_parts(
            [
                "view_schema",
                "view_name",
                "hypertable_schema",
                "hypertable_name",
                "materialized_only",
                "schedule_interval",
            ]
            .map(String::from),
            [
                Value::from("public"),
                Value::from("metrics_hourly"),
                Value::from("public"),
                Value::from("metrics"),
                Value::Bool(true),
                Value::from("1 day"),
            ],
        );
        let metadata = ContinuousAggregateMetadata::from_row(&row);
        assert_eq!(metadata.view_name, "metrics_hourly");
        assert!(metadata.materialized_only);
        assert!(metadata.has_policy());
        assert_eq!(metadata.view_definition, None);
    }
}
