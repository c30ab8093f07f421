//! Hypertable creation and inspection.

use dbmesh_core::sql::quote_literal;
use dbmesh_core::{CallContext, DbError, DbResult, GenericRow};
use serde::Serialize;
use tracing::info;

use crate::db::TimescaleDb;
use crate::render;

/// Settings for converting a table into a hypertable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HypertableConfig {
    /// Table to convert.
    pub table: String,
    /// Time partitioning column.
    pub time_column: String,
    /// Chunk width; the connection's configured default when unset.
    pub chunk_time_interval: Option<String>,
    /// Space partitioning column.
    pub partitioning_column: Option<String>,
    /// Number of space partitions.
    pub number_partitions: Option<u32>,
    /// Do nothing if the table is already a hypertable.
    pub if_not_exists: bool,
    /// Move existing rows into chunks.
    pub migrate_data: bool,
}

impl HypertableConfig {
    /// Convert `table`, partitioning on `time_column`.
    pub fn new(table: impl Into<String>, time_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            time_column: time_column.into(),
            ..Default::default()
        }
    }

    /// Set the chunk width.
    pub fn chunk_time_interval(mut self, interval: impl Into<String>) -> Self {
        self.chunk_time_interval = Some(interval.into());
        self
    }

    /// Add a space dimension over `column` with `partitions` partitions.
    pub fn space_partitioning(mut self, column: impl Into<String>, partitions: u32) -> Self {
        self.partitioning_column = Some(column.into());
        self.number_partitions = Some(partitions);
        self
    }

    /// Set `if_not_exists`.
    pub fn if_not_exists(mut self, yes: bool) -> Self {
        self.if_not_exists = yes;
        self
    }

    /// Set `migrate_data`.
    pub fn migrate_data(mut self, yes: bool) -> Self {
        self.migrate_data = yes;
        self
    }
}

/// A hypertable as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hypertable {
    /// Table name.
    pub table_name: String,
    /// Schema name.
    pub schema_name: String,
    /// Time dimension column.
    pub time_column: Option<String>,
    /// First space dimension column.
    pub space_column: Option<String>,
    /// Number of dimensions.
    pub num_dimensions: i64,
    /// Whether compression is enabled.
    pub compression_enabled: bool,
    /// Whether a retention policy job exists.
    pub retention_enabled: bool,
}

impl Hypertable {
    fn from_row(row: &GenericRow) -> Self {
        Self {
            table_name: row.text("hypertable_name").unwrap_or_default(),
            schema_name: row.text("hypertable_schema").unwrap_or_default(),
            time_column: render::text(row, "time_column"),
            space_column: render::text(row, "space_column"),
            num_dimensions: row.int("num_dimensions").unwrap_or(0),
            compression_enabled: row.bool("compression_enabled").unwrap_or(false),
            retention_enabled: row.bool("retention_enabled").unwrap_or(false),
        }
    }
}

const HYPERTABLES_QUERY: &str = "SELECT h.hypertable_schema, h.hypertable_name, h.num_dimensions, \
     h.compression_enabled, \
     (SELECT d.column_name FROM timescaledb_information.dimensions d \
     WHERE d.hypertable_schema = h.hypertable_schema AND d.hypertable_name = h.hypertable_name \
     AND d.dimension_type = 'Time' ORDER BY d.dimension_number LIMIT 1) AS time_column, \
     (SELECT d.column_name FROM timescaledb_information.dimensions d \
     WHERE d.hypertable_schema = h.hypertable_schema AND d.hypertable_name = h.hypertable_name \
     AND d.dimension_type = 'Space' ORDER BY d.dimension_number LIMIT 1) AS space_column, \
     EXISTS (SELECT 1 FROM timescaledb_information.jobs j \
     WHERE j.hypertable_schema = h.hypertable_schema AND j.hypertable_name = h.hypertable_name \
     AND j.proc_name = 'policy_retention') AS retention_enabled \
     FROM timescaledb_information.hypertables h";

impl TimescaleDb {
    /// Convert a table into a hypertable.
    pub async fn create_hypertable(
        &self,
        ctx: &CallContext,
        config: &HypertableConfig,
    ) -> DbResult<()> {
        const OP: &str = "create_hypertable";
        self.ensure_available(OP)?;

        let table = render::table("table", &config.table)?;
        let time_column = render::column("time_column", &config.time_column)?;
        let chunk = match &config.chunk_time_interval {
            Some(interval) => render::interval("chunk_time_interval", interval)?,
            None => self.config().chunk_time_interval.clone(),
        };

        let mut sql = format!(
            "SELECT create_hypertable({}, {}",
            table.literal(),
            quote_literal(time_column.name())
        );
        match (&config.partitioning_column, config.number_partitions) {
            (Some(column), Some(partitions)) if partitions > 0 => {
                let column = render::column("partitioning_column", column)?;
                sql.push_str(&format!(
                    ", partitioning_column => {}, number_partitions => {}",
                    quote_literal(column.name()),
                    partitions
                ));
            }
            (None, None) => {}
            _ => {
                return Err(DbError::invalid(
                    "number_partitions",
                    "space partitioning needs a column and a positive partition count",
                ));
            }
        }
        sql.push_str(&format!(", chunk_time_interval => {}", chunk.literal()));
        if config.if_not_exists {
            sql.push_str(", if_not_exists => TRUE");
        }
        if config.migrate_data {
            sql.push_str(", migrate_data => TRUE");
        }
        sql.push(')');

        self.run(ctx, OP, &sql).await?;
        info!(connection = %self.connection().name(), table = %table, "Created hypertable");
        Ok(())
    }

    /// Add a space dimension to a hypertable.
    pub async fn add_dimension(
        &self,
        ctx: &CallContext,
        table: &str,
        column: &str,
        partitions: u32,
    ) -> DbResult<()> {
        const OP: &str = "add_dimension";
        self.ensure_available(OP)?;

        let table = render::table("table", table)?;
        let column = render::column("column", column)?;
        if partitions == 0 {
            return Err(DbError::invalid("partitions", "must be greater than zero"));
        }

        let sql = format!(
            "SELECT add_dimension({}, {}, number_partitions => {})",
            table.literal(),
            quote_literal(column.name()),
            partitions
        );
        self.run(ctx, OP, &sql).await?;
        Ok(())
    }

    /// Every hypertable in the database.
    pub async fn list_hypertables(&self, ctx: &CallContext) -> DbResult<Vec<Hypertable>> {
        const OP: &str = "list_hypertables";
        self.ensure_available(OP)?;

        let sql = format!(
            "{} ORDER BY h.hypertable_schema, h.hypertable_name",
            HYPERTABLES_QUERY
        );
        let rows = self.fetch(ctx, OP, &sql, &[]).await?;
        Ok(rows.iter().map(Hypertable::from_row).collect())
    }

    /// One hypertable, or [`DbError::NotFound`] if `table` is not one.
    pub async fn get_hypertable(&self, ctx: &CallContext, table: &str) -> DbResult<Hypertable> {
        const OP: &str = "get_hypertable";
        self.ensure_available(OP)?;

        let ident = render::table("table", table)?;
        let sql = format!(
            "{} WHERE {}",
            HYPERTABLES_QUERY,
            render::relation_filter(&ident, "h.hypertable_name", "h.hypertable_schema")
        );
        let row = self.fetch_one(ctx, OP, &sql).await?;
        row.map(|r| Hypertable::from_row(&r))
            .ok_or_else(|| DbError::not_found("hypertable", ident.raw()))
    }

    /// Check whether `table` is a hypertable.
    pub async fn is_hypertable(&self, ctx: &CallContext, table: &str) -> DbResult<bool> {
        const OP: &str = "is_hypertable";
        self.ensure_available(OP)?;

        let ident = render::table("table", table)?;
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM timescaledb_information.hypertables WHERE {}) AS is_hypertable",
            render::relation_filter(&ident, "hypertable_name", "hypertable_schema")
        );
        let row = self.fetch_one(ctx, OP, &sql).await?;
        Ok(row.and_then(|r| r.bool("is_hypertable")).unwrap_or(false))
    }

    /// Drop a hypertable and its chunks.
    pub async fn drop_hypertable(
        &self,
        ctx: &CallContext,
        table: &str,
        cascade: bool,
    ) -> DbResult<()> {
        const OP: &str = "drop_hypertable";
        self.ensure_available(OP)?;

        let table = render::table("table", table)?;
        let mut sql = format!("DROP TABLE {}", table.sql());
        if cascade {
            sql.push_str(" CASCADE");
        }
        self.run(ctx, OP, &sql).await?;
        info!(connection = %self.connection().name(), table = %table, cascade, "Dropped hypertable");
        Ok(())
    }

    /// The newest chunks of a hypertable. A zero `limit` returns all of them.
    pub async fn recent_chunks(
        &self,
        ctx: &CallContext,
        table: &str,
        limit: u32,
    ) -> DbResult<Vec<GenericRow>> {
        const OP: &str = "recent_chunks";
        self.ensure_available(OP)?;

        let ident = render::table("table", table)?;
        let mut sql = format!(
            "SELECT chunk_schema, chunk_name, range_start, range_end, is_compressed \
             FROM timescaledb_information.chunks WHERE {} ORDER BY range_end DESC",
            render::relation_filter(&ident, "hypertable_name", "hypertable_schema")
        );
        if limit > 0 {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        self.fetch(ctx, OP, &sql, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbmesh_core::Value;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_row() {
        let row = GenericRow::from_parts(
            [
                "hypertable_schema",
                "hypertable_name",
                "num_dimensions",
                "compression_enabled",
                "time_column",
                "space_column",
                "retention_enabled",
            ]
            .map(String::from),
            [
                Value::from("public"),
                Value::from("metrics"),
                Value::Int(2),
                Value::Bool(true),
                Value::from("time"),
                Value::Null,
                Value::from("f"),
            ],
        );
        assert_eq!(
            Hypertable::from_row(&row),
            Hypertable {
                table_name: "metrics".into(),
                schema_name: "public".into(),
                time_column: Some("time".into()),
                space_column: None,
                num_dimensions: 2,
                compression_enabled: true,
                retention_enabled: false,
            }
        );
    }

    #[test]
    fn test_config_builder() {
        let config = HypertableConfig::new("metrics", "time")
            .chunk_time_interval("1 day")
            .space_partitioning("device_id", 4)
            .if_not_exists(true);
        assert_eq!(config.number_partitions, Some(4));
        assert!(config.if_not_exists);
        assert!(!config.migrate_data);
    }
}
