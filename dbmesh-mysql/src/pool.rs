//! Connection pool for MySQL.

use std::time::Duration;

use dbmesh_core::ConnectionConfig;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Pool, Transaction, TxOpts};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::opts;
use crate::error::{MysqlError, MysqlResult};

/// Time allowed to hand out a connection when the config sets no connect
/// timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A bounded pool of MySQL connections.
pub struct MysqlPool {
    inner: Mutex<Option<Pool>>,
    connect_timeout: Duration,
}

impl MysqlPool {
    /// Create a pool for the config. No connection is opened yet.
    pub fn new(config: &ConnectionConfig) -> MysqlResult<Self> {
        let pool = Pool::new(opts(config)?);

        info!(
            connection = %config.name,
            host = %config.host,
            port = config.effective_port(),
            database = %config.database,
            max_open = config.pool.max_open(),
            "MySQL connection pool created"
        );

        Ok(Self {
            inner: Mutex::new(Some(pool)),
            connect_timeout: config.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        })
    }

    fn pool(&self) -> MysqlResult<Pool> {
        self.inner.lock().clone().ok_or(MysqlError::Closed)
    }

    /// Check a connection out of the pool.
    pub async fn get(&self) -> MysqlResult<Conn> {
        let pool = self.pool()?;
        debug!("Acquiring connection from pool");
        match tokio::time::timeout(self.connect_timeout, pool.get_conn()).await {
            Ok(conn) => Ok(conn?),
            Err(_) => Err(MysqlError::Timeout(self.connect_timeout)),
        }
    }

    /// Start a transaction on a dedicated connection.
    pub async fn start_transaction(&self, options: TxOpts) -> MysqlResult<Transaction<'static>> {
        let pool = self.pool()?;
        match tokio::time::timeout(self.connect_timeout, pool.start_transaction(options)).await {
            Ok(tx) => Ok(tx?),
            Err(_) => Err(MysqlError::Timeout(self.connect_timeout)),
        }
    }

    /// Check that a connection can be opened and answers a ping.
    pub async fn ping(&self) -> MysqlResult<()> {
        let mut conn = self.get().await?;
        conn.ping().await?;
        Ok(())
    }

    /// Disconnect every pooled connection.
    ///
    /// Returns `false` when the pool was already closed.
    pub async fn disconnect(&self) -> MysqlResult<bool> {
        let pool = self.inner.lock().take();
        match pool {
            Some(pool) => {
                pool.disconnect().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Check if the pool has been disconnected.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_pool_refuses_checkout() {
        let config = ConnectionConfig::mysql("orders").build().unwrap();
        let pool = MysqlPool::new(&config).unwrap();
        assert!(!pool.is_closed());

        assert!(pool.disconnect().await.unwrap());
        assert!(pool.is_closed());
        assert!(matches!(pool.get().await, Err(MysqlError::Closed)));

        assert!(!pool.disconnect().await.unwrap());
    }
}
