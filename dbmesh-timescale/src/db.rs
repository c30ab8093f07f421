//! The capability-aware TimescaleDB wrapper.
//!
//! [`TimescaleDb`] wraps one [`Connection`]. `connect` probes the catalog
//! for the extension once; every extension operation then checks the
//! resulting [`ExtensionState`] and fails with
//! [`DbError::ExtensionUnavailable`] before rendering any SQL when the
//! extension is not present.

use std::sync::Arc;

use dbmesh_core::sql::is_select_query;
use dbmesh_core::{
    CallContext, Connection, DbError, DbResult, Dialect, ExecResult, GenericRow, Value,
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::TimescaleConfig;

/// Catalog lookup used to detect the extension.
pub const EXTENSION_PROBE: &str =
    "SELECT extversion FROM pg_extension WHERE extname = 'timescaledb'";

/// What is known about the extension on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionState {
    /// `connect` has not run yet.
    Unprobed,
    /// The extension cannot be used.
    Absent {
        /// Why, for error messages.
        reason: String,
    },
    /// The extension is installed.
    Present {
        /// Installed extension version.
        version: String,
    },
}

impl ExtensionState {
    /// Check if extension operations may run.
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    /// The installed version, if present.
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::Present { version } => Some(version),
            _ => None,
        }
    }
}

/// The outcome of [`TimescaleDb::execute_sql`].
#[derive(Debug, Clone, PartialEq)]
pub enum SqlOutcome {
    /// Rows of a row-returning statement.
    Rows(Vec<GenericRow>),
    /// Outcome of any other statement.
    Affected(ExecResult),
}

impl SqlOutcome {
    /// The rows, or an empty slice for non-row-returning statements.
    pub fn rows(&self) -> &[GenericRow] {
        match self {
            Self::Rows(rows) => rows,
            Self::Affected(_) => &[],
        }
    }
}

/// A connection with TimescaleDB operations.
pub struct TimescaleDb {
    conn: Arc<Connection>,
    config: TimescaleConfig,
    state: RwLock<ExtensionState>,
}

impl std::fmt::Debug for TimescaleDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimescaleDb")
            .field("connection", &self.conn.name())
            .field("state", &*self.state.read())
            .finish()
    }
}

impl TimescaleDb {
    /// Wrap a connection, reading extension settings from its options.
    pub fn new(conn: Arc<Connection>) -> DbResult<Self> {
        let config = TimescaleConfig::from_connection_config(conn.config())?;
        Ok(Self::with_config(conn, config))
    }

    /// Wrap a connection with explicit extension settings.
    pub fn with_config(conn: Arc<Connection>, config: TimescaleConfig) -> Self {
        Self {
            conn,
            config,
            state: RwLock::new(ExtensionState::Unprobed),
        }
    }

    /// Force the extension state, skipping the probe.
    pub fn with_extension_state(self, state: ExtensionState) -> Self {
        *self.state.write() = state;
        self
    }

    /// The wrapped connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Extension settings.
    pub fn config(&self) -> &TimescaleConfig {
        &self.config
    }

    /// Current extension state.
    pub fn state(&self) -> ExtensionState {
        self.state.read().clone()
    }

    /// Check if extension operations may run.
    pub fn is_available(&self) -> bool {
        self.state.read().is_present()
    }

    /// Installed extension version, once probed and present.
    pub fn extension_version(&self) -> Option<String> {
        self.state.read().version().map(str::to_string)
    }

    /// Connect the underlying connection and probe for the extension.
    ///
    /// A missing extension is not an error: the wrapper stays usable for
    /// plain SQL and every extension operation reports
    /// [`DbError::ExtensionUnavailable`]. Any other probe failure is
    /// returned. The probe runs once per wrapper.
    pub async fn connect(&self, ctx: &CallContext) -> DbResult<()> {
        self.conn.connect(ctx).await?;

        if *self.state.read() != ExtensionState::Unprobed {
            return Ok(());
        }

        let state = if self.conn.dialect() != Dialect::Postgres {
            ExtensionState::Absent {
                reason: format!("TimescaleDB is not available on {} connections", self.conn.dialect()),
            }
        } else if !self.config.enabled {
            ExtensionState::Absent {
                reason: "TimescaleDB support is disabled by the use_timescaledb option".to_string(),
            }
        } else {
            match self.detect_extension_version(ctx).await? {
                Some(version) => {
                    info!(connection = %self.conn.name(), version = %version, "TimescaleDB extension detected");
                    ExtensionState::Present { version }
                }
                None => {
                    warn!(connection = %self.conn.name(), "TimescaleDB extension not installed, extension features disabled");
                    ExtensionState::Absent {
                        reason: "TimescaleDB extension is not installed".to_string(),
                    }
                }
            }
        };

        let mut current = self.state.write();
        if *current == ExtensionState::Unprobed {
            *current = state;
        }
        Ok(())
    }

    /// Look up the installed extension version without touching the
    /// wrapper state.
    pub async fn detect_extension_version(&self, ctx: &CallContext) -> DbResult<Option<String>> {
        let row = self
            .conn
            .query_row(ctx, EXTENSION_PROBE, &[])
            .await
            .map_err(|e| e.within("extension probe"))?;
        Ok(row.map(|r| r.text("extversion").unwrap_or_default()))
    }

    /// Close the underlying connection.
    pub async fn close(&self) -> DbResult<()> {
        self.conn.close().await
    }

    /// Fail unless the extension is present.
    pub(crate) fn ensure_available(&self, operation: &str) -> DbResult<()> {
        match &*self.state.read() {
            ExtensionState::Present { .. } => Ok(()),
            ExtensionState::Absent { reason } => Err(DbError::extension_unavailable(
                operation,
                self.conn.name(),
                reason.clone(),
            )),
            ExtensionState::Unprobed => Err(DbError::extension_unavailable(
                operation,
                self.conn.name(),
                "TimescaleDB support has not been probed; connect first",
            )),
        }
    }

    /// Run any statement, choosing the row-returning or exec path from
    /// its leading keyword.
    pub async fn execute_sql(
        &self,
        ctx: &CallContext,
        sql: &str,
        params: &[Value],
    ) -> DbResult<SqlOutcome> {
        if is_select_query(sql) {
            Ok(SqlOutcome::Rows(self.conn.query(ctx, sql, params).await?))
        } else {
            Ok(SqlOutcome::Affected(self.conn.exec(ctx, sql, params).await?))
        }
    }

    /// Run a row-returning extension statement.
    pub(crate) async fn fetch(
        &self,
        ctx: &CallContext,
        operation: &str,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Vec<GenericRow>> {
        debug!(connection = %self.conn.name(), operation, "Running extension query");
        self.conn
            .query(ctx, sql, params)
            .await
            .map_err(|e| e.within(operation))
    }

    /// Run a row-returning extension statement and keep its first row.
    pub(crate) async fn fetch_one(
        &self,
        ctx: &CallContext,
        operation: &str,
        sql: &str,
    ) -> DbResult<Option<GenericRow>> {
        self.conn
            .query_row(ctx, sql, &[])
            .await
            .map_err(|e| e.within(operation))
    }

    /// Run an extension statement through the path its keyword selects.
    pub(crate) async fn run(
        &self,
        ctx: &CallContext,
        operation: &str,
        sql: &str,
    ) -> DbResult<SqlOutcome> {
        debug!(connection = %self.conn.name(), operation, "Running extension statement");
        self.execute_sql(ctx, sql, &[])
            .await
            .map_err(|e| e.within(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbmesh_core::ConnectionConfig;
    use dbmesh_core::testing::{MockDriver, MockReply};

    fn wrapper(driver: &MockDriver, config: ConnectionConfig) -> TimescaleDb {
        let conn = Connection::new(config, Arc::new(driver.clone())).unwrap();
        TimescaleDb::new(Arc::new(conn)).unwrap()
    }

    fn installed(version: &'static str) -> MockDriver {
        MockDriver::new(Dialect::Postgres).with_handler(move |sql, _| {
            if sql == EXTENSION_PROBE {
                Ok(MockReply::rows(&["extversion"], vec![vec![version.into()]]))
            } else {
                Ok(MockReply::affected(0))
            }
        })
    }

    #[tokio::test]
    async fn test_probe_detects_extension() {
        let driver = installed("2.14.2");
        let db = wrapper(&driver, ConnectionConfig::postgres("tsdb").build().unwrap());
        assert_eq!(db.state(), ExtensionState::Unprobed);

        db.connect(&CallContext::new()).await.unwrap();
        assert!(db.is_available());
        assert_eq!(db.extension_version().as_deref(), Some("2.14.2"));

        // Reconnecting never probes again.
        db.connect(&CallContext::new()).await.unwrap();
        assert_eq!(driver.statements(), vec![EXTENSION_PROBE]);
    }

    #[tokio::test]
    async fn test_missing_extension_is_not_an_error() {
        let driver = MockDriver::new(Dialect::Postgres)
            .with_handler(|_, _| Ok(MockReply::empty(&["extversion"])));
        let db = wrapper(&driver, ConnectionConfig::postgres("tsdb").build().unwrap());

        db.connect(&CallContext::new()).await.unwrap();
        assert!(!db.is_available());
        assert!(matches!(db.state(), ExtensionState::Absent { .. }));
        assert!(db.connection().is_connected());
    }

    #[tokio::test]
    async fn test_probe_failure_is_fatal() {
        let driver = MockDriver::new(Dialect::Postgres).with_handler(|sql, _| {
            Err(DbError::query_message("query", "tsdb", format!("permission denied: {}", sql)))
        });
        let db = wrapper(&driver, ConnectionConfig::postgres("tsdb").build().unwrap());

        let err = db.connect(&CallContext::new()).await.unwrap_err();
        assert!(err.is_query());
        assert_eq!(err.operation(), Some("extension probe"));
        assert_eq!(db.state(), ExtensionState::Unprobed);
    }

    #[tokio::test]
    async fn test_disabled_skips_probe() {
        let driver = installed("2.14.2");
        let db = wrapper(
            &driver,
            ConnectionConfig::postgres("tsdb")
                .option("use_timescaledb", "false")
                .build()
                .unwrap(),
        );

        db.connect(&CallContext::new()).await.unwrap();
        assert!(!db.is_available());
        assert!(driver.statements().is_empty());
    }

    #[tokio::test]
    async fn test_mysql_skips_probe() {
        let driver = MockDriver::new(Dialect::Mysql);
        let db = wrapper(&driver, ConnectionConfig::mysql("orders").build().unwrap());

        db.connect(&CallContext::new()).await.unwrap();
        assert!(!db.is_available());
        assert!(driver.statements().is_empty());
    }

    #[tokio::test]
    async fn test_unprobed_gate() {
        let driver = installed("2.14.2");
        let db = wrapper(&driver, ConnectionConfig::postgres("tsdb").build().unwrap());
        let err = db.ensure_available("create_hypertable").unwrap_err();
        assert!(err.is_extension_unavailable());
        assert!(err.to_string().contains("create_hypertable on 'tsdb'"));
    }

    #[tokio::test]
    async fn test_execute_sql_routes_by_keyword() {
        let driver = MockDriver::new(Dialect::Postgres).with_handler(|sql, _| {
            if is_select_query(sql) {
                Ok(MockReply::rows(&["n"], vec![vec![Value::Int(1)]]))
            } else {
                Ok(MockReply::affected(4))
            }
        });
        let db = wrapper(&driver, ConnectionConfig::postgres("tsdb").build().unwrap())
            .with_extension_state(ExtensionState::Present { version: "2.14.2".into() });
        let ctx = CallContext::new();
        db.connect(&ctx).await.unwrap();

        let rows = db.execute_sql(&ctx, "WITH x AS (SELECT 1) SELECT * FROM x", &[]).await.unwrap();
        assert_eq!(rows.rows().len(), 1);

        match db.execute_sql(&ctx, "UPDATE t SET n = 1", &[]).await.unwrap() {
            SqlOutcome::Affected(result) => assert_eq!(result.rows_affected, 4),
            other => panic!("expected affected rows, got {:?}", other),
        }
    }
}
