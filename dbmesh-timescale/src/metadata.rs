//! Catalog metadata and schema generation.

use dbmesh_core::sql::quote_literal;
use dbmesh_core::{CallContext, DbError, DbResult, GenericRow, Ident};
use serde::Serialize;

use crate::db::TimescaleDb;
use crate::policy::compression_alter;
use crate::render;

/// A space partitioning dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpaceDimension {
    /// Partitioning column.
    pub column: String,
    /// Number of partitions.
    pub partitions: u32,
}

/// Detailed description of one hypertable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HypertableMetadata {
    pub table_name: String,
    pub schema_name: String,
    pub owner: Option<String>,
    pub num_dimensions: i64,
    pub time_dimension: Option<String>,
    pub time_dimension_type: Option<String>,
    pub chunk_time_interval: Option<String>,
    pub space_dimensions: Vec<SpaceDimension>,
    pub compression_enabled: bool,
    pub retention_enabled: bool,
    /// Pretty-printed size of the hypertable and its chunks.
    pub total_size: Option<String>,
    pub total_chunks: i64,
    /// Planner estimate, not an exact count.
    pub approximate_rows: i64,
}

impl HypertableMetadata {
    fn from_row(row: &GenericRow) -> Self {
        Self {
            table_name: row.text("hypertable_name").unwrap_or_default(),
            schema_name: row.text("hypertable_schema").unwrap_or_default(),
            owner: render::text(row, "owner"),
            num_dimensions: row.int("num_dimensions").unwrap_or(0),
            time_dimension: render::text(row, "time_dimension"),
            time_dimension_type: render::text(row, "time_dimension_type"),
            chunk_time_interval: render::text(row, "chunk_time_interval"),
            space_dimensions: render::text(row, "space_dimensions")
                .map(|s| parse_space_dimensions(&s))
                .unwrap_or_default(),
            compression_enabled: row.bool("compression_enabled").unwrap_or(false),
            retention_enabled: row.bool("retention_enabled").unwrap_or(false),
            total_size: render::text(row, "total_size"),
            total_chunks: row.int("total_chunks").unwrap_or(0),
            approximate_rows: row.int("approximate_rows").unwrap_or(0),
        }
    }
}

// `device_id:4,location:2`, as aggregated by the metadata query.
fn parse_space_dimensions(value: &str) -> Vec<SpaceDimension> {
    value
        .split(',')
        .filter_map(|item| {
            let (column, partitions) = item.rsplit_once(':')?;
            Some(SpaceDimension {
                column: column.trim().to_string(),
                partitions: partitions.trim().parse().unwrap_or(0),
            })
        })
        .filter(|d| !d.column.is_empty())
        .collect()
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Type as rendered by `format_type`, e.g. `character varying(64)`.
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_indexed: bool,
    pub description: Option<String>,
}

impl ColumnMetadata {
    fn from_row(row: &GenericRow) -> Self {
        Self {
            name: row.text("column_name").unwrap_or_default(),
            data_type: row.text("data_type").unwrap_or_default(),
            nullable: row.bool("is_nullable").unwrap_or(true),
            is_primary_key: row.bool("is_primary_key").unwrap_or(false),
            is_indexed: row.bool("is_indexed").unwrap_or(false),
            description: render::text(row, "description"),
        }
    }
}

/// Database and hypertable storage totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseSize {
    pub database_name: String,
    pub database_size: Option<String>,
    pub hypertables_size: Option<String>,
    pub hypertables_count: i64,
}

/// Render `CREATE TABLE` from column metadata.
pub fn create_table_statement(table: &Ident, columns: &[ColumnMetadata]) -> String {
    let mut items: Vec<String> = columns
        .iter()
        .map(|c| {
            let mut item = format!("    {} {}", render::catalog_column(&c.name), c.data_type);
            if !c.nullable {
                item.push_str(" NOT NULL");
            }
            item
        })
        .collect();

    let primary_key: Vec<String> = columns
        .iter()
        .filter(|c| c.is_primary_key)
        .map(|c| render::catalog_column(&c.name))
        .collect();
    if !primary_key.is_empty() {
        items.push(format!("    PRIMARY KEY ({})", primary_key.join(", ")));
    }

    format!("CREATE TABLE {} (\n{}\n);", table.sql(), items.join(",\n"))
}

impl TimescaleDb {
    /// Dimensions, policies and storage of one hypertable.
    pub async fn hypertable_metadata(
        &self,
        ctx: &CallContext,
        table: &str,
    ) -> DbResult<HypertableMetadata> {
        const OP: &str = "hypertable_metadata";
        self.ensure_available(OP)?;

        let ident = render::table("table", table)?;
        let sql = format!(
            "SELECT h.hypertable_schema, h.hypertable_name, h.owner, h.num_dimensions, \
             h.compression_enabled, d.column_name AS time_dimension, \
             d.column_type::text AS time_dimension_type, d.time_interval::text AS chunk_time_interval, \
             (SELECT string_agg(s.column_name || ':' || coalesce(s.num_partitions, 0), ',' \
             ORDER BY s.dimension_number) FROM timescaledb_information.dimensions s \
             WHERE s.hypertable_schema = h.hypertable_schema AND s.hypertable_name = h.hypertable_name \
             AND s.dimension_type = 'Space') AS space_dimensions, \
             EXISTS (SELECT 1 FROM timescaledb_information.jobs j \
             WHERE j.hypertable_schema = h.hypertable_schema AND j.hypertable_name = h.hypertable_name \
             AND j.proc_name = 'policy_retention') AS retention_enabled, \
             pg_size_pretty(hypertable_size(format('%I.%I', h.hypertable_schema, h.hypertable_name)::regclass)) \
             AS total_size, \
             (SELECT count(*) FROM timescaledb_information.chunks c \
             WHERE c.hypertable_schema = h.hypertable_schema AND c.hypertable_name = h.hypertable_name) \
             AS total_chunks, \
             approximate_row_count(format('%I.%I', h.hypertable_schema, h.hypertable_name)::regclass) \
             AS approximate_rows \
             FROM timescaledb_information.hypertables h \
             LEFT JOIN timescaledb_information.dimensions d ON d.hypertable_schema = h.hypertable_schema \
             AND d.hypertable_name = h.hypertable_name AND d.dimension_number = 1 \
             WHERE {}",
            render::relation_filter(&ident, "h.hypertable_name", "h.hypertable_schema")
        );

        let row = self
            .fetch_one(ctx, OP, &sql)
            .await?
            .ok_or_else(|| DbError::not_found("hypertable", ident.raw()))?;
        Ok(HypertableMetadata::from_row(&row))
    }

    /// Columns of any table, in definition order.
    ///
    /// This is a plain catalog read and works without the extension.
    pub async fn table_columns(
        &self,
        ctx: &CallContext,
        table: &str,
    ) -> DbResult<Vec<ColumnMetadata>> {
        const OP: &str = "table_columns";
        let ident = render::table("table", table)?;
        let sql = format!(
            "SELECT a.attname AS column_name, format_type(a.atttypid, a.atttypmod) AS data_type, \
             NOT a.attnotnull AS is_nullable, \
             EXISTS (SELECT 1 FROM pg_index i WHERE i.indrelid = a.attrelid AND i.indisprimary \
             AND a.attnum = ANY(i.indkey)) AS is_primary_key, \
             EXISTS (SELECT 1 FROM pg_index i WHERE i.indrelid = a.attrelid AND NOT i.indisprimary \
             AND a.attnum = ANY(i.indkey)) AS is_indexed, \
             col_description(a.attrelid, a.attnum) AS description \
             FROM pg_attribute a WHERE a.attrelid = {}::regclass AND a.attnum > 0 \
             AND NOT a.attisdropped ORDER BY a.attnum",
            ident.literal()
        );
        let rows = self.fetch(ctx, OP, &sql, &[]).await?;
        Ok(rows.iter().map(ColumnMetadata::from_row).collect())
    }

    /// Size of the database and of all hypertables.
    pub async fn database_size(&self, ctx: &CallContext) -> DbResult<DatabaseSize> {
        const OP: &str = "database_size";
        self.ensure_available(OP)?;

        let sql = "SELECT current_database() AS database_name, \
                   pg_size_pretty(pg_database_size(current_database())) AS database_size, \
                   (SELECT pg_size_pretty(sum(hypertable_size(format('%I.%I', hypertable_schema, hypertable_name)::regclass))::bigint) \
                   FROM timescaledb_information.hypertables) AS hypertables_size, \
                   (SELECT count(*) FROM timescaledb_information.hypertables) AS hypertables_count";
        let row = self.fetch_one(ctx, OP, sql).await?.ok_or_else(|| {
            DbError::query_message(OP, self.connection().name(), "size query returned no rows")
        })?;

        Ok(DatabaseSize {
            database_name: row.text("database_name").unwrap_or_default(),
            database_size: render::text(&row, "database_size"),
            hypertables_size: render::text(&row, "hypertables_size"),
            hypertables_count: row.int("hypertables_count").unwrap_or(0),
        })
    }

    /// DDL recreating a table with its hypertable settings and policies.
    ///
    /// A table that is not a hypertable yields only its `CREATE TABLE`.
    pub async fn generate_hypertable_schema(
        &self,
        ctx: &CallContext,
        table: &str,
    ) -> DbResult<String> {
        const OP: &str = "generate_hypertable_schema";
        self.ensure_available(OP)?;

        let ident = render::table("table", table)?;
        let columns = self
            .table_columns(ctx, table)
            .await
            .map_err(|e| e.within(OP))?;
        if columns.is_empty() {
            return Err(DbError::not_found("table", ident.raw()));
        }

        let mut statements = vec![create_table_statement(&ident, &columns)];

        let metadata = match self.hypertable_metadata(ctx, table).await {
            Ok(metadata) => metadata,
            Err(DbError::NotFound { .. }) => return Ok(statements.join("\n\n")),
            Err(e) => return Err(e.within(OP)),
        };

        if let Some(time_column) = &metadata.time_dimension {
            let mut create = format!(
                "SELECT create_hypertable({}, {}",
                ident.literal(),
                quote_literal(time_column)
            );
            if let Some(chunk) = &metadata.chunk_time_interval {
                create.push_str(&format!(", chunk_time_interval => INTERVAL {}", quote_literal(chunk)));
            }
            create.push_str(");");
            statements.push(create);
        }
        for dimension in &metadata.space_dimensions {
            statements.push(format!(
                "SELECT add_dimension({}, {}, number_partitions => {});",
                ident.literal(),
                quote_literal(&dimension.column),
                dimension.partitions
            ));
        }

        if metadata.compression_enabled {
            let settings = self
                .compression_settings(ctx, table)
                .await
                .map_err(|e| e.within(OP))?;
            let mut compression = vec![format!(
                "{};",
                compression_alter(
                    &ident,
                    true,
                    settings.segment_by.as_deref(),
                    settings.order_by.as_deref()
                )
            )];
            if let Some(after) = &settings.compress_after {
                compression.push(format!(
                    "SELECT add_compression_policy({}, INTERVAL {});",
                    ident.literal(),
                    quote_literal(after)
                ));
            }
            statements.push(compression.join("\n"));
        }

        if metadata.retention_enabled {
            let settings = self
                .retention_settings(ctx, table)
                .await
                .map_err(|e| e.within(OP))?;
            if let Some(drop_after) = &settings.drop_after {
                statements.push(format!(
                    "SELECT add_retention_policy({}, INTERVAL {});",
                    ident.literal(),
                    quote_literal(drop_after)
                ));
            }
        }

        Ok(statements.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn column(name: &str, data_type: &str, nullable: bool, pk: bool) -> ColumnMetadata {
        ColumnMetadata {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            is_primary_key: pk,
            is_indexed: pk,
            description: None,
        }
    }

    #[test]
    fn test_create_table_statement() {
        let table = render::table("table", "metrics").unwrap();
        let columns = [
            column("time", "timestamp with time zone", false, true),
            column("device_id", "character varying(64)", false, true),
            column("value", "double precision", true, false),
            column("Order", "integer", true, false),
        ];
        assert_eq!(
            create_table_statement(&table, &columns),
            "CREATE TABLE metrics (\n    time timestamp with time zone NOT NULL,\n    \
             device_id character varying(64) NOT NULL,\n    value double precision,\n    \
             \"Order\" integer,\n    PRIMARY KEY (time, device_id)\n);"
        );
    }

    #[test]
    fn test_parse_space_dimensions() {
        assert_eq!(
            parse_space_dimensions("device_id:4,location:2"),
            vec![
                SpaceDimension { column: "device_id".into(), partitions: 4 },
                SpaceDimension { column: "location".into(), partitions: 2 },
            ]
        );
        assert!(parse_space_dimensions("").is_empty());
    }
}
