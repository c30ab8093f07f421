//! # dbmesh-mysql
//!
//! MySQL backend for dbmesh, built on `mysql_async`.
//!
//! - Pool constraints from the config's idle floor and open ceiling, with
//!   idle-time and lifetime TTLs
//! - Text protocol for parameterless statements, prepared statements
//!   otherwise
//! - Column-type-driven decoding for both protocols
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use dbmesh_core::{CallContext, Connection, ConnectionConfig};
//! use dbmesh_mysql::MysqlDriver;
//!
//! let config = ConnectionConfig::mysql("orders")
//!     .host("localhost")
//!     .user("root")
//!     .database("shop")
//!     .build()?;
//! let conn = Connection::new(config, Arc::new(MysqlDriver::new()))?;
//! conn.connect(&CallContext::new()).await?;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod pool;
pub mod types;

pub use backend::{MysqlBackend, MysqlDriver};
pub use error::{MysqlError, MysqlResult};
pub use pool::MysqlPool;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::backend::MysqlDriver;
    pub use crate::error::{MysqlError, MysqlResult};
}
