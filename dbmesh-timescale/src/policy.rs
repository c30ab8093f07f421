//! Compression and retention.
//!
//! Policies are background jobs owned by the extension. Removal looks the
//! job up first so that removing a missing policy reports `false` instead of
//! failing.

use dbmesh_core::sql::quote_literal;
use dbmesh_core::{CallContext, DbError, DbResult, GenericRow, Ident};
use serde::Serialize;
use tracing::info;

use crate::db::TimescaleDb;
use crate::render;

const COMPRESSION_JOB: &str = "policy_compression";
const RETENTION_JOB: &str = "policy_retention";

/// Compression layout and optional policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressionOptions {
    /// Segment-by column list, e.g. `device_id`.
    pub segment_by: Option<String>,
    /// Order-by list, e.g. `time DESC`.
    pub order_by: Option<String>,
    /// Add a policy compressing chunks older than this.
    pub after: Option<String>,
}

impl CompressionOptions {
    /// No segmenting, default ordering, no policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the segment-by columns.
    pub fn segment_by(mut self, columns: impl Into<String>) -> Self {
        self.segment_by = Some(columns.into());
        self
    }

    /// Set the order-by list.
    pub fn order_by(mut self, items: impl Into<String>) -> Self {
        self.order_by = Some(items.into());
        self
    }

    /// Also add a compression policy.
    pub fn after(mut self, interval: impl Into<String>) -> Self {
        self.after = Some(interval.into());
        self
    }
}

/// Compression state of one hypertable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompressionSettings {
    /// Hypertable name.
    pub hypertable_name: String,
    /// Whether compression is enabled.
    pub compression_enabled: bool,
    /// Segment-by columns.
    pub segment_by: Option<String>,
    /// Order-by list.
    pub order_by: Option<String>,
    /// Chunk width of the time dimension.
    pub chunk_time_interval: Option<String>,
    /// Age threshold of the compression policy.
    pub compress_after: Option<String>,
    /// How often the compression policy runs.
    pub schedule_interval: Option<String>,
}

/// Retention state of one hypertable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionSettings {
    /// Hypertable name.
    pub hypertable_name: String,
    /// Whether a retention policy exists.
    pub retention_enabled: bool,
    /// Age after which chunks are dropped.
    pub drop_after: Option<String>,
    /// How often the retention policy runs.
    pub schedule_interval: Option<String>,
}

struct Layout {
    segment_by: Option<String>,
    order_by: Option<String>,
}

impl Layout {
    fn parse(segment_by: Option<&str>, order_by: Option<&str>) -> DbResult<Self> {
        Ok(Self {
            segment_by: segment_by
                .map(|s| render::column_list("segment_by", s))
                .transpose()?,
            order_by: order_by
                .map(|s| render::order_list("order_by", s))
                .transpose()?,
        })
    }

    fn is_empty(&self) -> bool {
        self.segment_by.is_none() && self.order_by.is_none()
    }

    fn alter(&self, table: &Ident, enabled: bool) -> String {
        compression_alter(
            table,
            enabled,
            self.segment_by.as_deref(),
            self.order_by.as_deref(),
        )
    }
}

/// `ALTER TABLE ... SET (timescaledb.compress ...)` with an optional layout.
pub(crate) fn compression_alter(
    table: &Ident,
    enabled: bool,
    segment_by: Option<&str>,
    order_by: Option<&str>,
) -> String {
    let mut sql = format!(
        "ALTER TABLE {} SET (timescaledb.compress = {}",
        table.sql(),
        enabled
    );
    if let Some(segment_by) = segment_by {
        sql.push_str(&format!(
            ", timescaledb.compress_segmentby = {}",
            quote_literal(segment_by)
        ));
    }
    if let Some(order_by) = order_by {
        sql.push_str(&format!(
            ", timescaledb.compress_orderby = {}",
            quote_literal(order_by)
        ));
    }
    sql.push(')');
    sql
}

fn job_lookup(table: &Ident, proc_name: &str) -> String {
    format!(
        "SELECT job_id FROM timescaledb_information.jobs WHERE proc_name = '{}' AND {} ORDER BY job_id LIMIT 1",
        proc_name,
        render::relation_filter(table, "hypertable_name", "hypertable_schema")
    )
}

impl TimescaleDb {
    /// Enable compression on a hypertable, optionally adding a policy.
    pub async fn enable_compression(
        &self,
        ctx: &CallContext,
        table: &str,
        options: &CompressionOptions,
    ) -> DbResult<()> {
        const OP: &str = "enable_compression";
        self.ensure_available(OP)?;

        let table = render::table("table", table)?;
        let layout = Layout::parse(options.segment_by.as_deref(), options.order_by.as_deref())?;
        let after = options
            .after
            .as_deref()
            .map(|a| render::interval("after", a))
            .transpose()?;

        self.run(ctx, OP, &layout.alter(&table, true)).await?;
        if let Some(after) = after {
            let sql = format!(
                "SELECT add_compression_policy({}, {})",
                table.literal(),
                after.literal()
            );
            self.run(ctx, OP, &sql).await?;
        }
        info!(connection = %self.connection().name(), table = %table, "Enabled compression");
        Ok(())
    }

    /// Remove any compression policy, then disable compression.
    pub async fn disable_compression(&self, ctx: &CallContext, table: &str) -> DbResult<()> {
        const OP: &str = "disable_compression";
        self.ensure_available(OP)?;

        let ident = render::table("table", table)?;
        self.remove_policy(ctx, OP, &ident, COMPRESSION_JOB, "remove_compression_policy")
            .await?;
        self.run(
            ctx,
            OP,
            &format!("ALTER TABLE {} SET (timescaledb.compress = false)", ident.sql()),
        )
        .await?;
        Ok(())
    }

    /// Add a compression policy, enabling compression first if needed.
    ///
    /// The status read and the setup statement are separate round trips, so
    /// two callers doing this for one table at once can both run the setup.
    pub async fn add_compression_policy(
        &self,
        ctx: &CallContext,
        table: &str,
        after: &str,
        segment_by: Option<&str>,
        order_by: Option<&str>,
    ) -> DbResult<()> {
        const OP: &str = "add_compression_policy";
        self.ensure_available(OP)?;

        let ident = render::table("table", table)?;
        let after = render::interval("after", after)?;
        let layout = Layout::parse(segment_by, order_by)?;

        let status = format!(
            "SELECT compression_enabled FROM timescaledb_information.hypertables WHERE {}",
            render::relation_filter(&ident, "hypertable_name", "hypertable_schema")
        );
        let row = self
            .fetch_one(ctx, OP, &status)
            .await?
            .ok_or_else(|| DbError::not_found("hypertable", ident.raw()))?;

        if !row.bool("compression_enabled").unwrap_or(false) || !layout.is_empty() {
            self.run(ctx, OP, &layout.alter(&ident, true)).await?;
        }

        let sql = format!(
            "SELECT add_compression_policy({}, {})",
            ident.literal(),
            after.literal()
        );
        self.run(ctx, OP, &sql).await?;
        info!(connection = %self.connection().name(), table = %ident, after = %after, "Added compression policy");
        Ok(())
    }

    /// Remove the compression policy. Returns `false` if there was none.
    pub async fn remove_compression_policy(
        &self,
        ctx: &CallContext,
        table: &str,
    ) -> DbResult<bool> {
        const OP: &str = "remove_compression_policy";
        self.ensure_available(OP)?;

        let ident = render::table("table", table)?;
        self.remove_policy(ctx, OP, &ident, COMPRESSION_JOB, "remove_compression_policy")
            .await
    }

    /// Compression layout and policy of a hypertable.
    pub async fn compression_settings(
        &self,
        ctx: &CallContext,
        table: &str,
    ) -> DbResult<CompressionSettings> {
        const OP: &str = "compression_settings";
        self.ensure_available(OP)?;

        let ident = render::table("table", table)?;
        let sql = format!(
            "SELECT h.hypertable_name, h.compression_enabled, \
             (SELECT string_agg(s.attname, ', ' ORDER BY s.segmentby_column_index) \
             FROM timescaledb_information.compression_settings s \
             WHERE s.hypertable_schema = h.hypertable_schema AND s.hypertable_name = h.hypertable_name \
             AND s.segmentby_column_index IS NOT NULL) AS segment_by, \
             (SELECT string_agg(s.attname || CASE WHEN s.orderby_asc THEN ' ASC' ELSE ' DESC' END, ', ' \
             ORDER BY s.orderby_column_index) \
             FROM timescaledb_information.compression_settings s \
             WHERE s.hypertable_schema = h.hypertable_schema AND s.hypertable_name = h.hypertable_name \
             AND s.orderby_column_index IS NOT NULL) AS order_by, \
             (SELECT d.time_interval::text FROM timescaledb_information.dimensions d \
             WHERE d.hypertable_schema = h.hypertable_schema AND d.hypertable_name = h.hypertable_name \
             AND d.dimension_type = 'Time' ORDER BY d.dimension_number LIMIT 1) AS chunk_time_interval, \
             j.config->>'compress_after' AS compress_after, \
             j.schedule_interval::text AS schedule_interval \
             FROM timescaledb_information.hypertables h \
             LEFT JOIN timescaledb_information.jobs j ON j.hypertable_schema = h.hypertable_schema \
             AND j.hypertable_name = h.hypertable_name AND j.proc_name = '{}' \
             WHERE {}",
            COMPRESSION_JOB,
            render::relation_filter(&ident, "h.hypertable_name", "h.hypertable_schema")
        );
        let row = self
            .fetch_one(ctx, OP, &sql)
            .await?
            .ok_or_else(|| DbError::not_found("hypertable", ident.raw()))?;

        Ok(CompressionSettings {
            hypertable_name: ident.name().to_string(),
            compression_enabled: row.bool("compression_enabled").unwrap_or(false),
            segment_by: render::text(&row, "segment_by"),
            order_by: render::text(&row, "order_by"),
            chunk_time_interval: render::text(&row, "chunk_time_interval"),
            compress_after: render::text(&row, "compress_after"),
            schedule_interval: render::text(&row, "schedule_interval"),
        })
    }

    /// Compress every uncompressed chunk, or only those older than
    /// `older_than`. Returns the number of chunks visited.
    pub async fn compress_chunks(
        &self,
        ctx: &CallContext,
        table: &str,
        older_than: Option<&str>,
    ) -> DbResult<u64> {
        const OP: &str = "compress_chunks";
        self.ensure_available(OP)?;
        let sql = chunk_sweep(table, older_than, "compress_chunk(c, if_not_compressed => true)")?;
        let rows = self.fetch(ctx, OP, &sql, &[]).await?;
        Ok(rows.len() as u64)
    }

    /// Decompress every compressed chunk, or only those older than
    /// `older_than`. Returns the number of chunks visited.
    pub async fn decompress_chunks(
        &self,
        ctx: &CallContext,
        table: &str,
        older_than: Option<&str>,
    ) -> DbResult<u64> {
        const OP: &str = "decompress_chunks";
        self.ensure_available(OP)?;
        let sql = chunk_sweep(table, older_than, "decompress_chunk(c, if_compressed => true)")?;
        let rows = self.fetch(ctx, OP, &sql, &[]).await?;
        Ok(rows.len() as u64)
    }

    /// Per-chunk compression statistics.
    pub async fn chunk_compression_stats(
        &self,
        ctx: &CallContext,
        table: &str,
    ) -> DbResult<Vec<GenericRow>> {
        const OP: &str = "chunk_compression_stats";
        self.ensure_available(OP)?;

        let ident = render::table("table", table)?;
        let sql = format!(
            "SELECT * FROM chunk_compression_stats({}) ORDER BY chunk_name",
            ident.literal()
        );
        self.fetch(ctx, OP, &sql, &[]).await
    }

    /// Drop chunks once they are older than `drop_after`.
    pub async fn add_retention_policy(
        &self,
        ctx: &CallContext,
        table: &str,
        drop_after: &str,
    ) -> DbResult<()> {
        const OP: &str = "add_retention_policy";
        self.ensure_available(OP)?;

        let ident = render::table("table", table)?;
        let drop_after = render::interval("drop_after", drop_after)?;
        let sql = format!(
            "SELECT add_retention_policy({}, {})",
            ident.literal(),
            drop_after.literal()
        );
        self.run(ctx, OP, &sql).await?;
        info!(connection = %self.connection().name(), table = %ident, drop_after = %drop_after, "Added retention policy");
        Ok(())
    }

    /// Remove the retention policy. Returns `false` if there was none.
    pub async fn remove_retention_policy(&self, ctx: &CallContext, table: &str) -> DbResult<bool> {
        const OP: &str = "remove_retention_policy";
        self.ensure_available(OP)?;

        let ident = render::table("table", table)?;
        self.remove_policy(ctx, OP, &ident, RETENTION_JOB, "remove_retention_policy")
            .await
    }

    /// Retention policy of a hypertable.
    pub async fn retention_settings(
        &self,
        ctx: &CallContext,
        table: &str,
    ) -> DbResult<RetentionSettings> {
        const OP: &str = "retention_settings";
        self.ensure_available(OP)?;

        let ident = render::table("table", table)?;
        let sql = format!(
            "SELECT config->>'drop_after' AS drop_after, schedule_interval::text AS schedule_interval \
             FROM timescaledb_information.jobs WHERE proc_name = '{}' AND {} ORDER BY job_id LIMIT 1",
            RETENTION_JOB,
            render::relation_filter(&ident, "hypertable_name", "hypertable_schema")
        );
        let row = self.fetch_one(ctx, OP, &sql).await?;

        let mut settings = RetentionSettings {
            hypertable_name: ident.name().to_string(),
            ..Default::default()
        };
        if let Some(row) = row {
            settings.retention_enabled = true;
            settings.drop_after = render::text(&row, "drop_after");
            settings.schedule_interval = render::text(&row, "schedule_interval");
        }
        Ok(settings)
    }

    /// Apply the connection's configured compression and retention to one
    /// hypertable.
    pub async fn apply_config(&self, ctx: &CallContext, table: &str) -> DbResult<()> {
        const OP: &str = "apply_config";
        self.ensure_available(OP)?;
        render::table("table", table)?;

        let config = self.config().clone();
        if config.compression.enabled {
            let mut options = CompressionOptions::new().after(config.compression.after.as_str());
            options.segment_by = config.compression.segment_by;
            options.order_by = config.compression.order_by;
            self.enable_compression(ctx, table, &options).await?;
        }
        if config.retention.enabled {
            self.add_retention_policy(ctx, table, config.retention.drop_after.as_str())
                .await?;
        }
        Ok(())
    }

    async fn remove_policy(
        &self,
        ctx: &CallContext,
        operation: &str,
        table: &Ident,
        proc_name: &str,
        remove_fn: &str,
    ) -> DbResult<bool> {
        let job = self
            .fetch_one(ctx, operation, &job_lookup(table, proc_name))
            .await?
            .and_then(|row| row.int("job_id"));
        if job.is_none() {
            return Ok(false);
        }

        let sql = format!("SELECT {}({})", remove_fn, table.literal());
        self.run(ctx, operation, &sql).await?;
        info!(connection = %self.connection().name(), table = %table, policy = proc_name, "Removed policy");
        Ok(true)
    }
}

fn chunk_sweep(table: &str, older_than: Option<&str>, call: &str) -> DbResult<String> {
    let ident = render::table("table", table)?;
    let mut chunks = ident.literal();
    if let Some(older_than) = older_than {
        let interval = render::interval("older_than", older_than)?;
        chunks.push_str(&format!(", older_than => {}", interval.literal()));
    }
    Ok(format!("SELECT {} FROM show_chunks({}) c", call, chunks))
}
