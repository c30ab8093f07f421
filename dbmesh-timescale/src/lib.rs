//! # dbmesh-timescale
//!
//! TimescaleDB support for dbmesh connections.
//!
//! ## Features
//!
//! - Extension detection on connect, with every extension operation gated
//!   on the result
//! - Hypertables, space dimensions and chunk inspection
//! - Compression and retention policies
//! - Continuous aggregates and their refresh policies
//! - Bucketed time-series queries with window functions
//! - Downsampling and time-range analysis
//!
//! When the extension is not installed, or the connection is not
//! PostgreSQL, extension operations fail with
//! [`DbError::ExtensionUnavailable`](dbmesh_core::DbError::ExtensionUnavailable)
//! without sending anything to the server. Plain SQL still works through
//! [`TimescaleDb::execute_sql`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use chrono::{Duration, Utc};
//! use dbmesh_core::{CallContext, Connection, ConnectionConfig};
//! use dbmesh_postgres::PgDriver;
//! use dbmesh_timescale::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::postgres("tsdb").database("metrics").build()?;
//!     let conn = Arc::new(Connection::new(config, Arc::new(PgDriver::new()))?);
//!     let tsdb = TimescaleDb::new(conn)?;
//!
//!     let ctx = CallContext::new();
//!     tsdb.connect(&ctx).await?;
//!     tsdb.create_hypertable(&ctx, &HypertableConfig::new("metrics", "time")).await?;
//!
//!     let now = Utc::now();
//!     let query = TimeSeriesQueryOptions::new("metrics", "time", "1 hour")
//!         .aggregate(ColumnAggregation::new(AggregateFunction::Avg, "value"))
//!         .time_range(now - Duration::days(1), now)
//!         .limit(100);
//!     for row in tsdb.time_series_query(&ctx, &query).await? {
//!         println!("{:?} {:?}", row.get("time_bucket"), row.get("avg_value"));
//!     }
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;
pub mod continuous_aggregate;
pub mod db;
pub mod hypertable;
pub mod metadata;
pub mod policy;
pub mod render;
pub mod timeseries;
pub mod window;

pub use builder::{
    AggregateFunction, ColumnAggregation, DEFAULT_BUCKET_ALIAS, TimeBucket, TimeseriesQueryBuilder,
};
pub use config::{CompressionConfig, RetentionConfig, TimescaleConfig};
pub use continuous_aggregate::{
    ContinuousAggregateInfo, ContinuousAggregateMetadata, ContinuousAggregateOptions,
    RefreshPolicy,
};
pub use db::{EXTENSION_PROBE, ExtensionState, SqlOutcome, TimescaleDb};
pub use hypertable::{Hypertable, HypertableConfig};
pub use metadata::{ColumnMetadata, DatabaseSize, HypertableMetadata, SpaceDimension};
pub use policy::{CompressionOptions, CompressionSettings, RetentionSettings};
pub use timeseries::{
    COMMON_TIME_INTERVALS, DownsampleOptions, TimeRange, TimeSeriesAnalysis,
    TimeSeriesQueryOptions,
};
pub use window::{WindowFunction, inject_window_functions};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::builder::{AggregateFunction, ColumnAggregation, TimeseriesQueryBuilder};
    pub use crate::continuous_aggregate::{ContinuousAggregateOptions, RefreshPolicy};
    pub use crate::db::{ExtensionState, TimescaleDb};
    pub use crate::hypertable::HypertableConfig;
    pub use crate::policy::CompressionOptions;
    pub use crate::timeseries::{DownsampleOptions, TimeRange, TimeSeriesQueryOptions};
    pub use crate::window::WindowFunction;
}
