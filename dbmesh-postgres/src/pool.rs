//! Connection pool for PostgreSQL.

use std::time::Duration;

use dbmesh_core::ConnectionConfig;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::config::{pg_config, tls_connector};
use crate::error::PgResult;

/// Time allowed to hand back or create a pooled connection when the config
/// sets no connect timeout.
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// A bounded pool of PostgreSQL connections.
///
/// `max_open` caps the pool size. Lifetime and idle-time limits are enforced
/// on checkout: a connection past either limit is discarded and replaced.
#[derive(Clone)]
pub struct PgPool {
    inner: Pool,
    max_lifetime: Duration,
    max_idle_time: Duration,
}

impl PgPool {
    /// Create a pool for the config. No connection is opened yet.
    pub async fn new(config: &ConnectionConfig) -> PgResult<Self> {
        let pg = pg_config(config)?;
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = match tls_connector(config).await? {
            Some(tls) => Manager::from_config(pg, tls, mgr_config),
            None => Manager::from_config(pg, NoTls, mgr_config),
        };

        let wait = config.connect_timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT);
        let inner = Pool::builder(mgr)
            .max_size(config.pool.max_open() as usize)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(wait))
            .create_timeout(Some(wait))
            .recycle_timeout(Some(wait))
            .build()?;

        info!(
            connection = %config.name,
            host = %config.host,
            port = config.effective_port(),
            database = %config.database,
            ssl_mode = %config.effective_ssl_mode().as_str(),
            max_open = config.pool.max_open(),
            "PostgreSQL connection pool created"
        );

        Ok(Self {
            inner,
            max_lifetime: config.pool.max_lifetime(),
            max_idle_time: config.pool.max_idle_time(),
        })
    }

    /// Check a connection out of the pool.
    pub async fn get(&self) -> PgResult<Object> {
        loop {
            let client = self.inner.get().await?;
            let metrics = Object::metrics(&client);
            if metrics.age() < self.max_lifetime && metrics.last_used() < self.max_idle_time {
                return Ok(client);
            }
            debug!(
                age_ms = metrics.age().as_millis() as u64,
                idle_ms = metrics.last_used().as_millis() as u64,
                "Discarding expired pooled connection"
            );
            drop(Object::take(client));
        }
    }

    /// Get the current pool status.
    pub fn status(&self) -> PoolStatus {
        let status = self.inner.status();
        PoolStatus {
            available: status.available,
            size: status.size,
            max_size: status.max_size,
            waiting: status.waiting,
        }
    }

    /// Close the pool and all idle connections.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Check if the pool has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Pool status information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections.
    pub available: usize,
    /// Current total size of the pool.
    pub size: usize,
    /// Maximum size of the pool.
    pub max_size: usize,
    /// Number of tasks waiting for a connection.
    pub waiting: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_is_lazy_and_bounded() {
        let config = ConnectionConfig::postgres("tsdb")
            .host("127.0.0.1")
            .port(1)
            .max_open(3)
            .max_idle(1)
            .build()
            .unwrap();

        let pool = PgPool::new(&config).await.unwrap();
        let status = pool.status();
        assert_eq!(status.size, 0);
        assert_eq!(status.max_size, 3);

        pool.close();
        assert!(pool.is_closed());
    }
}
