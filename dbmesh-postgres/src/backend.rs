//! The PostgreSQL [`Driver`] and its backend.

use std::pin::Pin;
use std::sync::Arc;

use dbmesh_core::traits::{Backend, BoxFuture, Driver, ExecResult, RowSource, Transaction};
use dbmesh_core::{ConnectionConfig, DbError, DbResult, Dialect, TxOptions, Value};
use deadpool_postgres::Object;
use futures::TryStreamExt;
use tokio_postgres::{RowStream, SimpleQueryMessage};
use tracing::{debug, warn};

use crate::error::{PgError, PgResult};
use crate::pool::PgPool;
use crate::row::{column_names, row_values};
use crate::types::PgValue;

/// Opens PostgreSQL pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgDriver;

impl PgDriver {
    /// Create the driver.
    pub fn new() -> Self {
        Self
    }
}

impl Driver for PgDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn open<'a>(&'a self, config: &'a ConnectionConfig) -> BoxFuture<'a, DbResult<Arc<dyn Backend>>> {
        Box::pin(async move {
            let pool = PgPool::new(config)
                .await
                .map_err(|e| e.into_connect(&config.name))?;
            let backend: Arc<dyn Backend> = Arc::new(PgBackend {
                pool,
                target: config.name.clone(),
            });
            Ok(backend)
        })
    }
}

/// A pooled PostgreSQL backend.
pub struct PgBackend {
    pool: PgPool,
    target: String,
}

impl PgBackend {
    /// Current pool status.
    pub fn status(&self) -> crate::pool::PoolStatus {
        self.pool.status()
    }
}

async fn open_rows(client: &Object, sql: &str, params: &[Value]) -> PgResult<(Vec<String>, RowStream)> {
    let statement = client.prepare_cached(sql).await?;
    let columns = column_names(statement.columns());
    let stream = client.query_raw(&statement, params.iter().map(PgValue)).await?;
    Ok((columns, stream))
}

async fn run_execute(client: &Object, sql: &str, params: &[Value]) -> PgResult<ExecResult> {
    // Without parameters the simple protocol is used, so multi-statement
    // scripts work; the affected count is summed over all statements.
    if params.is_empty() {
        let messages = client.simple_query(sql).await?;
        let rows_affected = messages
            .iter()
            .map(|m| match m {
                SimpleQueryMessage::CommandComplete(n) => *n,
                _ => 0,
            })
            .sum();
        return Ok(ExecResult {
            rows_affected,
            last_insert_id: None,
        });
    }

    let statement = client.prepare_cached(sql).await?;
    let rows_affected = client
        .execute_raw(&statement, params.iter().map(PgValue))
        .await?;
    Ok(ExecResult {
        rows_affected,
        last_insert_id: None,
    })
}

impl Backend for PgBackend {
    fn ping(&self) -> BoxFuture<'_, DbResult<()>> {
        Box::pin(async move {
            let client = self
                .pool
                .get()
                .await
                .map_err(|e| e.into_connect(&self.target))?;
            client
                .simple_query("SELECT 1")
                .await
                .map_err(|e| PgError::from(e).into_connect(&self.target))?;
            Ok(())
        })
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, DbResult<Box<dyn RowSource>>> {
        Box::pin(async move {
            let client = self
                .pool
                .get()
                .await
                .map_err(|e| e.into_query("query", &self.target))?;
            let (columns, stream) = open_rows(&client, sql, params)
                .await
                .map_err(|e| e.into_query("query", &self.target))?;
            let rows: Box<dyn RowSource> = Box::new(PgRows {
                _client: Some(client),
                columns,
                stream: Box::pin(stream),
                target: self.target.clone(),
            });
            Ok(rows)
        })
    }

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, DbResult<ExecResult>> {
        Box::pin(async move {
            let client = self
                .pool
                .get()
                .await
                .map_err(|e| e.into_query("execute", &self.target))?;
            run_execute(&client, sql, params)
                .await
                .map_err(|e| e.into_query("execute", &self.target))
        })
    }

    fn begin<'a>(
        &'a self,
        options: &'a TxOptions,
    ) -> BoxFuture<'a, DbResult<Box<dyn Transaction>>> {
        Box::pin(async move {
            let client = self
                .pool
                .get()
                .await
                .map_err(|e| e.into_query("begin", &self.target))?;
            client
                .batch_execute(&options.begin_statement())
                .await
                .map_err(|e| PgError::from(e).into_query("begin", &self.target))?;
            let tx: Box<dyn Transaction> = Box::new(PgTransaction {
                client: Some(client),
                target: self.target.clone(),
            });
            Ok(tx)
        })
    }

    fn close(&self) -> BoxFuture<'_, DbResult<()>> {
        Box::pin(async move {
            self.pool.close();
            debug!(connection = %self.target, "PostgreSQL pool closed");
            Ok(())
        })
    }
}

/// A streaming PostgreSQL result set.
///
/// Holds its pooled connection, if it checked one out, until dropped.
struct PgRows {
    _client: Option<Object>,
    columns: Vec<String>,
    stream: Pin<Box<RowStream>>,
    target: String,
}

impl RowSource for PgRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> BoxFuture<'_, DbResult<Option<Vec<Value>>>> {
        Box::pin(async move {
            let row = self
                .stream
                .try_next()
                .await
                .map_err(|e| PgError::from(e).into_query("query", &self.target))?;
            match row {
                Some(row) => row_values(&row)
                    .map(Some)
                    .map_err(|e| e.into_query("query", &self.target)),
                None => Ok(None),
            }
        })
    }
}

/// A transaction pinned to one pooled connection.
struct PgTransaction {
    client: Option<Object>,
    target: String,
}

impl PgTransaction {
    fn client(&self, operation: &str) -> DbResult<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| DbError::not_connected(operation, &self.target))
    }

    async fn finish(mut self: Box<Self>, statement: &'static str) -> DbResult<()> {
        let Some(client) = self.client.take() else {
            return Err(DbError::not_connected(statement, &self.target));
        };
        match client.batch_execute(statement).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // The session state is unknown; keep it out of the pool.
                drop(Object::take(client));
                Err(PgError::from(e).into_query(statement, &self.target))
            }
        }
    }
}

impl Transaction for PgTransaction {
    fn query<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, DbResult<Box<dyn RowSource>>> {
        Box::pin(async move {
            let client = self.client("query")?;
            let (columns, stream) = open_rows(client, sql, params)
                .await
                .map_err(|e| e.into_query("query", &self.target))?;
            let rows: Box<dyn RowSource> = Box::new(PgRows {
                _client: None,
                columns,
                stream: Box::pin(stream),
                target: self.target.clone(),
            });
            Ok(rows)
        })
    }

    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, DbResult<ExecResult>> {
        Box::pin(async move {
            let client = self.client("execute")?;
            run_execute(client, sql, params)
                .await
                .map_err(|e| e.into_query("execute", &self.target))
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, DbResult<()>> {
        Box::pin(self.finish("COMMIT"))
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, DbResult<()>> {
        Box::pin(self.finish("ROLLBACK"))
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let target = self.target.clone();
                handle.spawn(async move {
                    if let Err(e) = client.batch_execute("ROLLBACK").await {
                        warn!(connection = %target, error = %e, "Rollback of abandoned transaction failed");
                        drop(Object::take(client));
                    }
                });
            }
            Err(_) => {
                drop(Object::take(client));
            }
        }
    }
}
