//! # dbmesh-postgres
//!
//! PostgreSQL backend for dbmesh, built on `tokio-postgres` with
//! `deadpool-postgres` connection pooling.
//!
//! ## Features
//!
//! - Bounded pools honouring max open, lifetime and idle-time limits
//! - TLS modes from `disable` to `verify-full` over `native-tls`
//! - Server run-time parameters from the config's extra options
//! - Parameter binding that adapts to the server-inferred placeholder type
//! - Streaming result sets decoded into dbmesh values
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use dbmesh_core::{CallContext, Connection, ConnectionConfig};
//! use dbmesh_postgres::PgDriver;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::postgres("tsdb")
//!         .host("localhost")
//!         .user("postgres")
//!         .password("password")
//!         .database("metrics")
//!         .build()?;
//!
//!     let conn = Connection::new(config, Arc::new(PgDriver::new()))?;
//!     let ctx = CallContext::new();
//!     conn.connect(&ctx).await?;
//!
//!     let rows = conn.query(&ctx, "SELECT now() AS ts", &[]).await?;
//!     println!("{:?}", rows[0].get("ts"));
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod pool;
pub mod row;
pub mod types;

pub use backend::{PgBackend, PgDriver};
pub use error::{PgError, PgResult};
pub use pool::{PgPool, PoolStatus};
pub use types::{PgInterval, PgValue};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::backend::PgDriver;
    pub use crate::error::{PgError, PgResult};
    pub use crate::pool::PgPool;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use dbmesh_core::traits::Driver;
    use dbmesh_core::{CallContext, Connection, ConnectionConfig, Dialect};

    use super::*;

    #[test]
    fn test_driver_dialect() {
        assert_eq!(PgDriver::new().dialect(), Dialect::Postgres);
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_connect() {
        let config = ConnectionConfig::postgres("unreachable")
            .host("127.0.0.1")
            .port(1)
            .user("postgres")
            .connect_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let conn = Connection::new(config, Arc::new(PgDriver::new())).unwrap();

        let err = conn
            .connect(&CallContext::with_timeout(Duration::from_secs(10)))
            .await
            .unwrap_err();
        assert!(err.is_connect() || err.is_timeout(), "unexpected error: {}", err);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_bad_session_attrs_fail_before_dialing() {
        let config = ConnectionConfig::postgres("primary")
            .target_session_attrs("prefer-standby")
            .build()
            .unwrap();
        let err = match PgDriver::new().open(&config).await {
            Ok(_) => panic!("open should fail"),
            Err(e) => e,
        };
        assert!(err.is_config());
    }
}
