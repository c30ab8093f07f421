//! # dbmesh-core
//!
//! Backend-agnostic connection layer for dbmesh.
//!
//! This crate provides:
//! - [`ConnectionConfig`] and pure JSON document ingestion
//! - [`Connection`]: one pooled backend with query / exec / transaction
//!   primitives and a masked connection string
//! - [`ConnectionManager`]: a concurrent registry of named connections
//! - The result decoder producing [`GenericRow`]s
//! - [`CallContext`] deadlines and cancellation for every blocking call
//! - SQL helpers for identifier / interval validation and placeholder
//!   renumbering
//!
//! Dialect drivers implement the [`Driver`] and [`Backend`] traits and live
//! in their own crates.

pub mod config;
pub mod connection;
pub mod context;
pub mod decode;
pub mod dsn;
pub mod error;
pub mod logging;
pub mod manager;
pub mod row;
pub mod sql;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod traits;
pub mod transaction;
pub mod value;

pub use config::{ConnectionConfig, ConnectionConfigBuilder, Dialect, PoolSettings, SslMode};
pub use connection::Connection;
pub use context::CallContext;
pub use decode::{BufferedRows, decode_rows};
pub use error::{BoxError, DbError, DbResult};
pub use manager::{ConnectReport, ConnectionManager, DriverRegistry};
pub use row::GenericRow;
pub use sql::{Ident, Interval};
pub use traits::{Backend, BoxFuture, Driver, ExecResult, RowSource, Transaction};
pub use transaction::{IsolationLevel, Tx, TxOptions};
pub use value::Value;

/// Re-export of the cancellation token type taken by [`CallContext`].
pub use tokio_util::sync::CancellationToken;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{ConnectionConfig, Dialect, SslMode};
    pub use crate::connection::Connection;
    pub use crate::context::CallContext;
    pub use crate::error::{DbError, DbResult};
    pub use crate::manager::{ConnectionManager, DriverRegistry};
    pub use crate::row::GenericRow;
    pub use crate::transaction::TxOptions;
    pub use crate::value::Value;
}
