//! Translation of a [`ConnectionConfig`] into `mysql_async` options.

use dbmesh_core::ConnectionConfig;
use mysql_async::{Opts, OptsBuilder, PoolConstraints, PoolOpts};

use crate::error::{MysqlError, MysqlResult};

/// Build the pool options for a connection.
///
/// `max_idle` is the number of connections the pool keeps, `max_open` its
/// ceiling. Idle time and lifetime become the inactive and absolute TTLs.
pub fn pool_opts(config: &ConnectionConfig) -> MysqlResult<PoolOpts> {
    let pool = &config.pool;
    let constraints =
        PoolConstraints::new(pool.max_idle() as usize, pool.max_open() as usize).ok_or_else(|| {
            MysqlError::config(format!(
                "max_idle_conns ({}) exceeds max_open_conns ({})",
                pool.max_idle(),
                pool.max_open()
            ))
        })?;

    Ok(PoolOpts::default()
        .with_constraints(constraints)
        .with_inactive_connection_ttl(pool.max_idle_time())
        .with_abs_conn_ttl(Some(pool.max_lifetime())))
}

/// Build the driver options for a connection.
pub fn opts(config: &ConnectionConfig) -> MysqlResult<Opts> {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(config.host.clone())
        .tcp_port(config.effective_port())
        .prefer_socket(false)
        .pool_opts(pool_opts(config)?);

    if !config.user.is_empty() {
        builder = builder.user(Some(config.user.clone()));
    }
    if !config.password.is_empty() {
        builder = builder.pass(Some(config.password.clone()));
    }
    if !config.database.is_empty() {
        builder = builder.db_name(Some(config.database.clone()));
    }

    Ok(Opts::from(builder))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_opts_fields() {
        let config = ConnectionConfig::mysql("orders")
            .host("mysql.internal")
            .user("app")
            .password("pw")
            .database("shop")
            .build()
            .unwrap();
        let opts = opts(&config).unwrap();

        assert_eq!(opts.ip_or_hostname(), "mysql.internal");
        assert_eq!(opts.tcp_port(), 3306);
        assert_eq!(opts.user(), Some("app"));
        assert_eq!(opts.pass(), Some("pw"));
        assert_eq!(opts.db_name(), Some("shop"));
    }

    #[test]
    fn test_pool_bounds() {
        let config = ConnectionConfig::mysql("orders")
            .max_open(40)
            .max_idle(8)
            .max_lifetime(Duration::from_secs(600))
            .max_idle_time(Duration::from_secs(120))
            .build()
            .unwrap();
        let pool = pool_opts(&config).unwrap();

        assert_eq!(pool.constraints().min(), 8);
        assert_eq!(pool.constraints().max(), 40);
        assert_eq!(pool.inactive_connection_ttl(), Duration::from_secs(120));
        assert_eq!(pool.abs_conn_ttl(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_default_pool_bounds() {
        let config = ConnectionConfig::mysql("orders").build().unwrap();
        let pool = pool_opts(&config).unwrap();

        assert_eq!(pool.constraints().min(), 5);
        assert_eq!(pool.constraints().max(), 25);
    }
}
