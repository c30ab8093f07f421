//! # dbmesh
//!
//! Unified async access to PostgreSQL and MySQL, with TimescaleDB
//! time-series operations on PostgreSQL connections.
//!
//! dbmesh provides:
//! - Named connections loaded from a JSON document or built in code
//! - A concurrent connection manager
//! - Query, exec and transaction primitives with deadlines and cancellation
//! - Rows decoded into backend-independent values
//! - A capability-aware TimescaleDB wrapper and time-series query builder
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dbmesh::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dbmesh::DbError> {
//!     let manager = dbmesh::manager();
//!     manager
//!         .load_document(r#"{"connections": [
//!             {"id": "tsdb", "type": "postgres", "host": "localhost", "port": 5432,
//!              "user": "postgres", "password": "secret", "name": "metrics"}
//!         ]}"#)
//!         .await?;
//!
//!     let ctx = CallContext::new();
//!     manager.connect_all(&ctx).await?;
//!
//!     let tsdb = TimescaleDb::new(manager.get("tsdb").await?)?;
//!     tsdb.connect(&ctx).await?;
//!
//!     let query = TimeSeriesQueryOptions::new("metrics", "time", "1 hour")
//!         .aggregate(ColumnAggregation::new(AggregateFunction::Avg, "value"))
//!         .limit(100);
//!     let rows = tsdb.time_series_query(&ctx, &query).await?;
//!     println!("{} buckets", rows.len());
//!
//!     manager.close_all().await
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::Arc;

#[cfg(feature = "mysql")]
#[cfg_attr(docsrs, doc(cfg(feature = "mysql")))]
pub use dbmesh_mysql as mysql;
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub use dbmesh_postgres as postgres;
pub use dbmesh_timescale as timescale;

// Re-export key types at the crate root
pub use dbmesh_core::{
    CallContext, Connection, ConnectionConfig, ConnectionManager, DbError, DbResult, Dialect,
    DriverRegistry, GenericRow, Value,
};
pub use dbmesh_timescale::TimescaleDb;

/// Drivers for every dialect enabled at compile time.
pub fn default_drivers() -> DriverRegistry {
    #[allow(unused_mut)]
    let mut drivers = DriverRegistry::new();
    #[cfg(feature = "postgres")]
    {
        drivers = drivers.register(Arc::new(dbmesh_postgres::PgDriver::new()));
    }
    #[cfg(feature = "mysql")]
    {
        drivers = drivers.register(Arc::new(dbmesh_mysql::MysqlDriver::new()));
    }
    drivers
}

/// An empty connection manager over [`default_drivers`].
pub fn manager() -> ConnectionManager {
    ConnectionManager::new(default_drivers())
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use dbmesh_core::prelude::*;
    pub use dbmesh_timescale::prelude::*;
}
