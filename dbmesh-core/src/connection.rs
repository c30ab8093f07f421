//! A named connection to one backend.
//!
//! A [`Connection`] is created from a validated config, becomes live after
//! a successful open and liveness probe, and is closed at most once. A closed
//! connection is never reopened.
//!
//! ```rust,ignore
//! let conn = Connection::new(config, driver)?;
//! conn.connect(&CallContext::new()).await?;
//!
//! let rows = conn
//!     .query(&ctx, "SELECT * FROM metrics WHERE device = $1", &["d1".into()])
//!     .await?;
//! conn.close().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, Dialect};
use crate::context::CallContext;
use crate::decode::decode_rows;
use crate::dsn;
use crate::error::{DbError, DbResult};
use crate::row::GenericRow;
use crate::traits::{Backend, Driver, ExecResult};
use crate::transaction::{Tx, TxOptions};
use crate::value::Value;

/// Upper bound on the liveness probe run by [`Connection::connect`].
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

enum State {
    Idle,
    Live(Arc<dyn Backend>),
    Closed,
}

/// One named connection. Cheap to share behind an `Arc`.
pub struct Connection {
    config: ConnectionConfig,
    driver: Arc<dyn Driver>,
    masked: String,
    state: RwLock<State>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.config.name)
            .field("dsn", &self.masked)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Connection {
    /// Create an unconnected connection.
    ///
    /// Applies config defaults and fails with [`DbError::Config`] if the
    /// config is invalid or the driver serves another dialect.
    pub fn new(mut config: ConnectionConfig, driver: Arc<dyn Driver>) -> DbResult<Self> {
        config.validate()?;
        config.set_defaults();

        if driver.dialect() != config.dialect {
            return Err(DbError::config(format!(
                "connection '{}' is {} but the driver serves {}",
                config.name,
                config.dialect,
                driver.dialect()
            )));
        }

        let masked = dsn::render_masked(&config);
        Ok(Self {
            config,
            driver,
            masked,
            state: RwLock::new(State::Idle),
        })
    }

    /// Connection name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Dialect of the backend.
    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    /// Driver name (`postgres` or `mysql`).
    pub fn driver_name(&self) -> &'static str {
        self.config.dialect.as_str()
    }

    /// The config this connection was built from, with defaults applied.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The connection string with every credential masked.
    pub fn connection_string(&self) -> &str {
        &self.masked
    }

    /// Check whether the connection is live.
    pub fn is_connected(&self) -> bool {
        matches!(*self.state.read(), State::Live(_))
    }

    /// Open the pool and run the liveness probe.
    ///
    /// Connecting a live connection is a no-op. Probe failure closes the
    /// half-opened pool and fails with [`DbError::Connect`]; the caller's own
    /// deadline or cancellation surfaces as [`DbError::Timeout`] or
    /// [`DbError::Cancelled`].
    pub async fn connect(&self, ctx: &CallContext) -> DbResult<()> {
        match *self.state.read() {
            State::Live(_) => return Ok(()),
            State::Closed => {
                return Err(DbError::connect(
                    self.name(),
                    "connection has been closed and cannot be reopened",
                ));
            }
            State::Idle => {}
        }

        debug!(connection = %self.name(), dsn = %self.masked, "Opening connection");
        let backend = ctx.run("connect", self.driver.open(&self.config)).await?;

        let probe = tokio::time::timeout(PROBE_TIMEOUT, ctx.run("ping", backend.ping())).await;
        let failure = match probe {
            Ok(Ok(())) => None,
            Ok(Err(e)) if e.is_timeout() || e.is_cancelled() => Some(e),
            Ok(Err(e @ DbError::Connect { .. })) => Some(e),
            Ok(Err(e)) => Some(DbError::connect(
                self.name(),
                format!("liveness probe failed: {}", e),
            )),
            Err(_) => Some(DbError::connect(
                self.name(),
                format!("liveness probe timed out after {}s", PROBE_TIMEOUT.as_secs()),
            )),
        };

        if let Some(err) = failure {
            if let Err(close_err) = backend.close().await {
                warn!(connection = %self.name(), error = %close_err, "Failed to release pool after probe failure");
            }
            return Err(err);
        }

        let installed = {
            let mut state = self.state.write();
            if matches!(*state, State::Idle) {
                *state = State::Live(backend.clone());
                true
            } else {
                false
            }
        };

        if installed {
            info!(
                connection = %self.name(),
                dialect = %self.dialect(),
                host = %self.config.host,
                database = %self.config.database,
                max_open = self.config.pool.max_open(),
                "Connection established"
            );
            Ok(())
        } else {
            // Lost a race with another connect or a close.
            backend.close().await?;
            if self.is_connected() {
                Ok(())
            } else {
                Err(DbError::connect(self.name(), "connection was closed while connecting"))
            }
        }
    }

    fn backend(&self, operation: &str) -> DbResult<Arc<dyn Backend>> {
        match &*self.state.read() {
            State::Live(backend) => Ok(backend.clone()),
            _ => Err(DbError::not_connected(operation, self.name())),
        }
    }

    /// Run a liveness check against the live pool.
    pub async fn ping(&self, ctx: &CallContext) -> DbResult<()> {
        let backend = self.backend("ping")?;
        ctx.run("ping", backend.ping()).await
    }

    /// Run a row-returning statement and decode every row.
    pub async fn query(
        &self,
        ctx: &CallContext,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Vec<GenericRow>> {
        let backend = self.backend("query")?;
        debug!(connection = %self.name(), sql = %sql, params = params.len(), "Executing query");
        ctx.run("query", async {
            let source = backend.query(sql, params).await?;
            decode_rows(source).await
        })
        .await
    }

    /// Run a row-returning statement and return its first row, if any.
    pub async fn query_row(
        &self,
        ctx: &CallContext,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Option<GenericRow>> {
        let backend = self.backend("query_row")?;
        debug!(connection = %self.name(), sql = %sql, params = params.len(), "Executing query_row");
        ctx.run("query_row", async {
            let mut source = backend.query(sql, params).await?;
            let columns = source.columns().to_vec();
            match source.next_row().await? {
                Some(values) => Ok(Some(GenericRow::from_parts(
                    columns,
                    values.into_iter().map(crate::decode::normalize),
                ))),
                None => Ok(None),
            }
        })
        .await
    }

    /// Run a statement that does not return rows.
    pub async fn exec(
        &self,
        ctx: &CallContext,
        sql: &str,
        params: &[Value],
    ) -> DbResult<ExecResult> {
        let backend = self.backend("exec")?;
        debug!(connection = %self.name(), sql = %sql, params = params.len(), "Executing statement");
        ctx.run("exec", backend.execute(sql, params)).await
    }

    /// Start a transaction.
    pub async fn begin_transaction(&self, ctx: &CallContext, options: TxOptions) -> DbResult<Tx> {
        let backend = self.backend("begin_transaction")?;
        debug!(connection = %self.name(), ?options, "Beginning transaction");
        let inner = ctx
            .run("begin_transaction", async { backend.begin(&options).await })
            .await?;
        Ok(Tx::new(inner, self.name()))
    }

    /// Close the pool. Closing twice, or closing a never-opened connection,
    /// succeeds silently.
    pub async fn close(&self) -> DbResult<()> {
        let previous = std::mem::replace(&mut *self.state.write(), State::Closed);
        match previous {
            State::Live(backend) => {
                backend.close().await?;
                info!(connection = %self.name(), "Connection closed");
                Ok(())
            }
            State::Idle | State::Closed => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDriver, MockReply};

    fn config(name: &str) -> ConnectionConfig {
        ConnectionConfig::builder(name, Dialect::Postgres)
            .user("app")
            .password("topsecret-pw")
            .database("db")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_operations_before_connect_fail() {
        let driver = MockDriver::new(Dialect::Postgres);
        let conn = Connection::new(config("a"), Arc::new(driver.clone())).unwrap();
        let ctx = CallContext::new();

        assert!(conn.query(&ctx, "SELECT 1", &[]).await.unwrap_err().is_not_connected());
        assert!(conn.query_row(&ctx, "SELECT 1", &[]).await.unwrap_err().is_not_connected());
        assert!(conn.exec(&ctx, "DELETE FROM t", &[]).await.unwrap_err().is_not_connected());
        assert!(
            conn.begin_transaction(&ctx, TxOptions::new())
                .await
                .unwrap_err()
                .is_not_connected()
        );
        assert!(driver.statements().is_empty());
    }

    #[tokio::test]
    async fn test_connect_query_close() {
        let driver = MockDriver::new(Dialect::Postgres).with_handler(|sql, _| {
            if sql.starts_with("SELECT") {
                Ok(MockReply::rows(
                    &["n", "label"],
                    vec![vec![Value::Int(1), Value::Bytes(b"one".to_vec())]],
                ))
            } else {
                Ok(MockReply::affected(3))
            }
        });
        let conn = Connection::new(config("a"), Arc::new(driver.clone())).unwrap();
        let ctx = CallContext::new();

        conn.connect(&ctx).await.unwrap();
        assert!(conn.is_connected());

        let rows = conn.query(&ctx, "SELECT n, label FROM t", &[]).await.unwrap();
        assert_eq!(rows[0].get("label"), Some(&Value::Text("one".into())));

        let row = conn.query_row(&ctx, "SELECT n FROM t", &[]).await.unwrap();
        assert_eq!(row.and_then(|r| r.int("n")), Some(1));

        let result = conn.exec(&ctx, "UPDATE t SET n = 2", &[]).await.unwrap();
        assert_eq!(result.rows_affected, 3);

        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.query(&ctx, "SELECT 1", &[]).await.unwrap_err().is_not_connected());
        assert!(conn.connect(&ctx).await.unwrap_err().is_connect());
        assert!(driver.closed_count() >= 1);
    }

    #[tokio::test]
    async fn test_close_never_opened() {
        let conn = Connection::new(config("a"), Arc::new(MockDriver::new(Dialect::Postgres))).unwrap();
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_failure_releases_pool() {
        let driver = MockDriver::new(Dialect::Postgres).failing_ping();
        let conn = Connection::new(config("a"), Arc::new(driver.clone())).unwrap();

        let err = conn.connect(&CallContext::new()).await.unwrap_err();
        assert!(err.is_connect());
        assert!(!conn.is_connected());
        assert_eq!(driver.closed_count(), 1);
    }

    #[tokio::test]
    async fn test_dialect_mismatch() {
        let err = Connection::new(config("a"), Arc::new(MockDriver::new(Dialect::Mysql))).unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_connection_string_is_masked() {
        let conn = Connection::new(config("a"), Arc::new(MockDriver::new(Dialect::Postgres))).unwrap();
        assert!(!conn.connection_string().contains("topsecret-pw"));
        assert!(conn.connection_string().contains("password=***"));
        assert_eq!(conn.driver_name(), "postgres");
    }

    #[tokio::test]
    async fn test_transaction_passthrough() {
        let driver = MockDriver::new(Dialect::Postgres);
        let conn = Connection::new(config("a"), Arc::new(driver.clone())).unwrap();
        let ctx = CallContext::new();
        conn.connect(&ctx).await.unwrap();

        let mut tx = conn.begin_transaction(&ctx, TxOptions::new()).await.unwrap();
        tx.exec(&ctx, "INSERT INTO t VALUES ($1)", &[Value::Int(1)])
            .await
            .unwrap();
        tx.commit(&ctx).await.unwrap();

        assert_eq!(
            driver.statements(),
            vec!["BEGIN", "INSERT INTO t VALUES ($1)", "COMMIT"]
        );
    }
}
