//! The MySQL [`Driver`] and its backend.

use std::sync::Arc;

use dbmesh_core::traits::{Backend, BoxFuture, Driver, ExecResult, RowSource, Transaction};
use dbmesh_core::transaction::IsolationLevel;
use dbmesh_core::{BufferedRows, ConnectionConfig, DbError, DbResult, Dialect, TxOptions, Value};
use mysql_async::prelude::*;
use mysql_async::{Params, QueryResult, Row, TxOpts};
use tracing::info;

use crate::error::MysqlResult;
use crate::pool::MysqlPool;
use crate::types::{from_mysql, to_mysql};

/// Opens MySQL pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDriver;

impl MysqlDriver {
    /// Create the driver.
    pub fn new() -> Self {
        Self
    }
}

impl Driver for MysqlDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn open<'a>(&'a self, config: &'a ConnectionConfig) -> BoxFuture<'a, DbResult<Arc<dyn Backend>>> {
        Box::pin(async move {
            let pool = MysqlPool::new(config).map_err(|e| e.into_connect(&config.name))?;
            let backend: Arc<dyn Backend> = Arc::new(MysqlBackend {
                pool,
                target: config.name.clone(),
            });
            Ok(backend)
        })
    }
}

/// A pooled MySQL backend.
pub struct MysqlBackend {
    pool: MysqlPool,
    target: String,
}

fn params(values: &[Value]) -> Params {
    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values.iter().map(to_mysql).collect())
    }
}

// The whole first result set is read before the connection goes back to
// the pool.
async fn drain<P: Protocol>(result: QueryResult<'_, '_, P>) -> MysqlResult<BufferedRows> {
    let columns: Vec<_> = result
        .columns_ref()
        .iter()
        .map(|c| (c.name_str().into_owned(), c.column_type()))
        .collect();
    let rows: Vec<Row> = result.collect_and_drop().await?;

    let values: Vec<Vec<Value>> = rows
        .into_iter()
        .map(|mut row| {
            columns
                .iter()
                .enumerate()
                .map(|(idx, (_, column_type))| {
                    let value = row
                        .take::<mysql_async::Value, _>(idx)
                        .unwrap_or(mysql_async::Value::NULL);
                    from_mysql(value, *column_type)
                })
                .collect::<Vec<Value>>()
        })
        .collect();

    Ok(BufferedRows::new(
        columns.into_iter().map(|(name, _)| name).collect(),
        values,
    ))
}

async fn finish_exec<P: Protocol>(result: QueryResult<'_, '_, P>) -> MysqlResult<ExecResult> {
    let outcome = ExecResult {
        rows_affected: result.affected_rows(),
        last_insert_id: result.last_insert_id(),
    };
    result.drop_result().await?;
    Ok(outcome)
}

// Statements without parameters go over the text protocol, so statements
// that cannot be prepared still run.
async fn run_query<Q: Queryable>(conn: &mut Q, sql: &str, values: &[Value]) -> MysqlResult<BufferedRows> {
    if values.is_empty() {
        drain(conn.query_iter(sql).await?).await
    } else {
        drain(conn.exec_iter(sql, params(values)).await?).await
    }
}

async fn run_execute<Q: Queryable>(conn: &mut Q, sql: &str, values: &[Value]) -> MysqlResult<ExecResult> {
    if values.is_empty() {
        finish_exec(conn.query_iter(sql).await?).await
    } else {
        finish_exec(conn.exec_iter(sql, params(values)).await?).await
    }
}

fn tx_opts(options: &TxOptions) -> TxOpts {
    let mut opts = TxOpts::default();
    if let Some(level) = options.isolation {
        opts.with_isolation_level(match level {
            IsolationLevel::ReadUncommitted => mysql_async::IsolationLevel::ReadUncommitted,
            IsolationLevel::ReadCommitted => mysql_async::IsolationLevel::ReadCommitted,
            IsolationLevel::RepeatableRead => mysql_async::IsolationLevel::RepeatableRead,
            IsolationLevel::Serializable => mysql_async::IsolationLevel::Serializable,
        });
    }
    if options.read_only {
        opts.with_readonly(true);
    }
    opts
}

impl Backend for MysqlBackend {
    fn ping(&self) -> BoxFuture<'_, DbResult<()>> {
        Box::pin(async move { self.pool.ping().await.map_err(|e| e.into_connect(&self.target)) })
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, DbResult<Box<dyn RowSource>>> {
        Box::pin(async move {
            let run = async {
                let mut conn = self.pool.get().await?;
                run_query(&mut conn, sql, params).await
            };
            let rows: Box<dyn RowSource> =
                Box::new(run.await.map_err(|e| e.into_query("query", &self.target))?);
            Ok(rows)
        })
    }

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, DbResult<ExecResult>> {
        Box::pin(async move {
            let run = async {
                let mut conn = self.pool.get().await?;
                run_execute(&mut conn, sql, params).await
            };
            run.await.map_err(|e| e.into_query("execute", &self.target))
        })
    }

    fn begin<'a>(
        &'a self,
        options: &'a TxOptions,
    ) -> BoxFuture<'a, DbResult<Box<dyn Transaction>>> {
        Box::pin(async move {
            let tx = self
                .pool
                .start_transaction(tx_opts(options))
                .await
                .map_err(|e| e.into_query("begin", &self.target))?;
            let tx: Box<dyn Transaction> = Box::new(MysqlTransaction {
                tx: Some(tx),
                target: self.target.clone(),
            });
            Ok(tx)
        })
    }

    fn close(&self) -> BoxFuture<'_, DbResult<()>> {
        Box::pin(async move {
            let closed = self
                .pool
                .disconnect()
                .await
                .map_err(|e| e.into_query("close", &self.target))?;
            if closed {
                info!(connection = %self.target, "MySQL pool closed");
            }
            Ok(())
        })
    }
}

/// A transaction pinned to one pooled connection.
///
/// The driver rolls back a transaction dropped before commit or rollback
/// when its connection is next used or returned to the pool.
struct MysqlTransaction {
    tx: Option<mysql_async::Transaction<'static>>,
    target: String,
}

impl MysqlTransaction {
    fn tx(&mut self, operation: &str) -> DbResult<&mut mysql_async::Transaction<'static>> {
        self.tx
            .as_mut()
            .ok_or_else(|| DbError::not_connected(operation, &self.target))
    }
}

impl Transaction for MysqlTransaction {
    fn query<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, DbResult<Box<dyn RowSource>>> {
        Box::pin(async move {
            let target = self.target.clone();
            let tx = self.tx("query")?;
            let rows = run_query(tx, sql, params)
                .await
                .map_err(|e| e.into_query("query", &target))?;
            let rows: Box<dyn RowSource> = Box::new(rows);
            Ok(rows)
        })
    }

    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, DbResult<ExecResult>> {
        Box::pin(async move {
            let target = self.target.clone();
            let tx = self.tx("execute")?;
            run_execute(tx, sql, params)
                .await
                .map_err(|e| e.into_query("execute", &target))
        })
    }

    fn commit(mut self: Box<Self>) -> BoxFuture<'static, DbResult<()>> {
        Box::pin(async move {
            let tx = self.tx.take().ok_or_else(|| DbError::not_connected("COMMIT", &self.target))?;
            tx.commit()
                .await
                .map_err(|e| crate::error::MysqlError::from(e).into_query("COMMIT", &self.target))
        })
    }

    fn rollback(mut self: Box<Self>) -> BoxFuture<'static, DbResult<()>> {
        Box::pin(async move {
            let tx = self
                .tx
                .take()
                .ok_or_else(|| DbError::not_connected("ROLLBACK", &self.target))?;
            tx.rollback()
                .await
                .map_err(|e| crate::error::MysqlError::from(e).into_query("ROLLBACK", &self.target))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_shape() {
        assert!(matches!(params(&[]), Params::Empty));
        match params(&[Value::Int(1), Value::Null]) {
            Params::Positional(values) => assert_eq!(values.len(), 2),
            _ => panic!("expected positional params"),
        }
    }

    #[test]
    fn test_tx_opts() {
        let opts = tx_opts(
            &TxOptions::new()
                .isolation(IsolationLevel::Serializable)
                .read_only(),
        );
        assert_eq!(opts.isolation_level(), Some(mysql_async::IsolationLevel::Serializable));
        assert_eq!(opts.readonly(), Some(true));

        let opts = tx_opts(&TxOptions::new());
        assert_eq!(opts.isolation_level(), None);
        assert_eq!(opts.readonly(), None);
    }
}
