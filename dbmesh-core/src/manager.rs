//! Registry of named connections.
//!
//! The manager stores declarative configs, connects them in batches and
//! hands out shared [`Connection`]s by name. Lookups take a read lock and run
//! concurrently; loading, connecting, closing and removing take the write
//! lock and exclude each other and every lookup.
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new(drivers);
//! manager.load_document(&std::fs::read_to_string("connections.json")?).await?;
//!
//! let report = manager.connect_all(&CallContext::new()).await?;
//! for (name, err) in &report.failures {
//!     tracing::warn!(connection = %name, error = %err, "not connected");
//! }
//!
//! let tsdb = manager.get("tsdb").await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{self, ConnectionConfig, Dialect};
use crate::connection::Connection;
use crate::context::CallContext;
use crate::error::{DbError, DbResult};
use crate::traits::Driver;

/// Drivers available to a manager, one per dialect.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<Dialect, Arc<dyn Driver>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("dialects", &self.dialects())
            .finish()
    }
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver, replacing any driver for the same dialect.
    pub fn register(mut self, driver: Arc<dyn Driver>) -> Self {
        let dialect = driver.dialect();
        self.drivers.insert(dialect, driver);
        debug!(dialect = %dialect, "Registered driver");
        self
    }

    /// Get the driver for a dialect.
    pub fn get(&self, dialect: Dialect) -> Option<Arc<dyn Driver>> {
        self.drivers.get(&dialect).cloned()
    }

    /// Registered dialects.
    pub fn dialects(&self) -> Vec<Dialect> {
        let mut dialects: Vec<_> = self.drivers.keys().copied().collect();
        dialects.sort_by_key(|d| d.as_str());
        dialects
    }
}

/// Outcome of [`ConnectionManager::connect_all`].
#[derive(Debug, Default)]
pub struct ConnectReport {
    /// Names connected by this call.
    pub connected: Vec<String>,
    /// Names that were already live and were skipped.
    pub already_connected: Vec<String>,
    /// Names that failed, with their errors.
    pub failures: Vec<(String, DbError)>,
}

impl ConnectReport {
    /// Whether every configured connection is now live.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of live connections after the call.
    pub fn live_count(&self) -> usize {
        self.connected.len() + self.already_connected.len()
    }
}

#[derive(Default)]
struct Registry {
    configs: IndexMap<String, ConnectionConfig>,
    live: HashMap<String, Arc<Connection>>,
}

/// Thread-safe owner of named connections.
pub struct ConnectionManager {
    drivers: DriverRegistry,
    registry: RwLock<Registry>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("drivers", &self.drivers)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create an empty manager over the given drivers.
    pub fn new(drivers: DriverRegistry) -> Self {
        Self {
            drivers,
            registry: RwLock::new(Registry::default()),
        }
    }

    /// Validate and store configs without connecting.
    ///
    /// The batch is stored all-or-nothing: a blank or repeated name, a name
    /// that is already configured, or a dialect with no registered driver
    /// rejects the whole batch with [`DbError::Config`].
    pub async fn load_config(&self, configs: Vec<ConnectionConfig>) -> DbResult<usize> {
        let mut registry = self.registry.write().await;

        let mut batch: IndexMap<String, ConnectionConfig> = IndexMap::new();
        for mut config in configs {
            config.validate()?;
            if self.drivers.get(config.dialect).is_none() {
                return Err(DbError::config(format!(
                    "connection '{}': no driver registered for {}",
                    config.name, config.dialect
                )));
            }
            if registry.configs.contains_key(&config.name) || batch.contains_key(&config.name) {
                return Err(DbError::config(format!(
                    "connection '{}' is configured more than once",
                    config.name
                )));
            }
            config.set_defaults();
            batch.insert(config.name.clone(), config);
        }

        let count = batch.len();
        registry.configs.extend(batch);
        info!(loaded = count, total = registry.configs.len(), "Loaded connection configs");
        Ok(count)
    }

    /// Parse a `{ "connections": [...] }` document and load it.
    pub async fn load_document(&self, json: &str) -> DbResult<usize> {
        let configs = config::parse_document(json)?;
        self.load_config(configs).await
    }

    /// Connect every stored config that is not already live.
    ///
    /// New connections are attempted concurrently. Failures are collected
    /// per name instead of aborting the batch; the call fails with
    /// [`DbError::ConnectAll`] only if no connection is live afterwards.
    pub async fn connect_all(&self, ctx: &CallContext) -> DbResult<ConnectReport> {
        let mut registry = self.registry.write().await;
        let mut report = ConnectReport::default();

        let mut pending = Vec::new();
        for (name, config) in &registry.configs {
            if registry.live.contains_key(name) {
                report.already_connected.push(name.clone());
                continue;
            }
            let driver = match self.drivers.get(config.dialect) {
                Some(driver) => driver,
                None => {
                    report.failures.push((
                        name.clone(),
                        DbError::config(format!("no driver registered for {}", config.dialect)),
                    ));
                    continue;
                }
            };
            match Connection::new(config.clone(), driver) {
                Ok(conn) => pending.push(Arc::new(conn)),
                Err(e) => report.failures.push((name.clone(), e)),
            }
        }

        let attempts = join_all(pending.into_iter().map(|conn| async move {
            let result = conn.connect(ctx).await;
            (conn, result)
        }))
        .await;

        for (conn, result) in attempts {
            let name = conn.name().to_string();
            match result {
                Ok(()) => {
                    registry.live.insert(name.clone(), conn);
                    report.connected.push(name);
                }
                Err(e) => {
                    warn!(connection = %name, error = %e, "Failed to connect");
                    report.failures.push((name, e));
                }
            }
        }

        info!(
            connected = report.connected.len(),
            skipped = report.already_connected.len(),
            failed = report.failures.len(),
            "Connect batch finished"
        );

        if report.live_count() == 0 && !report.failures.is_empty() {
            return Err(DbError::ConnectAll {
                failures: report.failures,
            });
        }
        Ok(report)
    }

    /// Resolve a name to its live connection.
    ///
    /// Fails with [`DbError::NotConnected`] for a configured but unconnected
    /// name, and [`DbError::NotFound`] for an unknown one.
    pub async fn get(&self, name: &str) -> DbResult<Arc<Connection>> {
        let registry = self.registry.read().await;
        if let Some(conn) = registry.live.get(name) {
            return Ok(conn.clone());
        }
        if registry.configs.contains_key(name) {
            Err(DbError::not_connected("get", name))
        } else {
            Err(DbError::not_found("connection", name))
        }
    }

    /// Names of live connections, sorted.
    pub async fn list(&self) -> Vec<String> {
        let registry = self.registry.read().await;
        let mut names: Vec<String> = registry.live.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stored configs in load order.
    pub async fn configs(&self) -> Vec<ConnectionConfig> {
        self.registry.read().await.configs.values().cloned().collect()
    }

    /// The stored config for a name.
    pub async fn config(&self, name: &str) -> Option<ConnectionConfig> {
        self.registry.read().await.configs.get(name).cloned()
    }

    /// Close a live connection but keep its config, so a later
    /// [`connect_all`](Self::connect_all) reconnects it.
    pub async fn close(&self, name: &str) -> DbResult<()> {
        let mut registry = self.registry.write().await;
        if !registry.configs.contains_key(name) {
            return Err(DbError::not_found("connection", name));
        }
        match registry.live.remove(name) {
            Some(conn) => conn.close().await,
            None => Ok(()),
        }
    }

    /// Close a connection and forget its config.
    pub async fn remove(&self, name: &str) -> DbResult<()> {
        let mut registry = self.registry.write().await;
        if registry.configs.shift_remove(name).is_none() {
            return Err(DbError::not_found("connection", name));
        }
        let conn = registry.live.remove(name);
        info!(connection = %name, "Removed connection");
        match conn {
            Some(conn) => conn.close().await,
            None => Ok(()),
        }
    }

    /// Close every live connection and empty the registry.
    ///
    /// Every connection is closed even if an earlier one fails; the first
    /// error is returned.
    pub async fn close_all(&self) -> DbResult<()> {
        let mut registry = self.registry.write().await;
        let live: Vec<_> = registry.live.drain().collect();
        registry.configs.clear();

        let mut first_error = None;
        for (name, conn) in live {
            if let Err(e) = conn.close().await {
                warn!(connection = %name, error = %e, "Failed to close connection");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Ping every live connection concurrently.
    pub async fn ping_all(&self, ctx: &CallContext) -> Vec<(String, DbResult<()>)> {
        let live: Vec<Arc<Connection>> = {
            let registry = self.registry.read().await;
            registry.live.values().cloned().collect()
        };

        let mut results = join_all(live.into_iter().map(|conn| async move {
            let result = conn.ping(ctx).await;
            (conn.name().to_string(), result)
        }))
        .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;

    fn manager(driver: MockDriver) -> ConnectionManager {
        ConnectionManager::new(DriverRegistry::new().register(Arc::new(driver)))
    }

    fn pg(name: &str, host: &str) -> ConnectionConfig {
        ConnectionConfig {
            name: name.to_string(),
            dialect: Dialect::Postgres,
            host: host.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_partial_connect() {
        let driver = MockDriver::new(Dialect::Postgres).failing_open_when(|c| c.host == "down");
        let manager = manager(driver);
        manager
            .load_config(vec![pg("a", "up"), pg("b", "down"), pg("c", "up")])
            .await
            .unwrap();

        let report = manager.connect_all(&CallContext::new()).await.unwrap();
        assert_eq!(report.connected.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "b");

        assert!(manager.get("a").await.is_ok());
        assert!(manager.get("c").await.is_ok());
        assert!(manager.get("b").await.unwrap_err().is_not_connected());
        assert_eq!(manager.list().await, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_connect_all_is_idempotent() {
        let driver = MockDriver::new(Dialect::Postgres);
        let manager = manager(driver.clone());
        manager.load_config(vec![pg("a", "h")]).await.unwrap();

        let ctx = CallContext::new();
        manager.connect_all(&ctx).await.unwrap();
        let report = manager.connect_all(&ctx).await.unwrap();

        assert!(report.connected.is_empty());
        assert_eq!(report.already_connected, vec!["a"]);
        assert_eq!(driver.opened_count(), 1);
    }

    #[tokio::test]
    async fn test_all_failed() {
        let driver = MockDriver::new(Dialect::Postgres).failing_open_when(|_| true);
        let manager = manager(driver);
        manager
            .load_config(vec![pg("a", "x"), pg("b", "y")])
            .await
            .unwrap();

        let err = manager.connect_all(&CallContext::new()).await.unwrap_err();
        match err {
            DbError::ConnectAll { failures } => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_load_rejects_duplicates_atomically() {
        let manager = manager(MockDriver::new(Dialect::Postgres));
        let err = manager
            .load_config(vec![pg("a", "x"), pg("a", "y")])
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(manager.configs().await.is_empty());

        manager.load_config(vec![pg("a", "x")]).await.unwrap();
        assert!(manager.load_config(vec![pg("a", "z")]).await.is_err());
    }

    #[tokio::test]
    async fn test_load_rejects_unregistered_dialect() {
        let manager = manager(MockDriver::new(Dialect::Postgres));
        let mut config = pg("m", "x");
        config.dialect = Dialect::Mysql;
        assert!(manager.load_config(vec![config]).await.unwrap_err().is_config());
    }

    #[tokio::test]
    async fn test_get_unknown() {
        let manager = manager(MockDriver::new(Dialect::Postgres));
        assert!(manager.get("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_close_and_remove() {
        let driver = MockDriver::new(Dialect::Postgres);
        let manager = manager(driver.clone());
        manager
            .load_config(vec![pg("a", "x"), pg("b", "y")])
            .await
            .unwrap();
        let ctx = CallContext::new();
        manager.connect_all(&ctx).await.unwrap();

        let a = manager.get("a").await.unwrap();
        manager.close("a").await.unwrap();
        assert!(!a.is_connected());
        assert!(manager.config("a").await.is_some());

        manager.remove("b").await.unwrap();
        assert!(manager.config("b").await.is_none());
        assert!(manager.remove("b").await.unwrap_err().is_not_found());

        // "a" reconnects with a fresh connection.
        let report = manager.connect_all(&ctx).await.unwrap();
        assert_eq!(report.connected, vec!["a"]);
    }

    #[tokio::test]
    async fn test_close_all_resets_registry() {
        let driver = MockDriver::new(Dialect::Postgres);
        let manager = manager(driver.clone());
        manager
            .load_config(vec![pg("a", "x"), pg("b", "y")])
            .await
            .unwrap();
        manager.connect_all(&CallContext::new()).await.unwrap();

        manager.close_all().await.unwrap();
        assert!(manager.list().await.is_empty());
        assert!(manager.configs().await.is_empty());
        assert_eq!(driver.closed_count(), 2);
    }

    #[tokio::test]
    async fn test_ping_all() {
        let manager = manager(MockDriver::new(Dialect::Postgres));
        manager
            .load_config(vec![pg("b", "x"), pg("a", "y")])
            .await
            .unwrap();
        let ctx = CallContext::new();
        manager.connect_all(&ctx).await.unwrap();

        let results = manager.ping_all(&ctx).await;
        let names: Vec<_> = results.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }
}
