//! Scripted in-memory driver for tests.
//!
//! [`MockDriver`] records every statement its backends receive (pings
//! excluded) and answers through a handler closure, so tests can assert both
//! the SQL that was emitted and that none was.
//!
//! ```rust
//! use dbmesh_core::config::Dialect;
//! use dbmesh_core::testing::{MockDriver, MockReply};
//!
//! let driver = MockDriver::new(Dialect::Postgres)
//!     .with_handler(|_sql, _params| Ok(MockReply::rows(&["one"], vec![vec![1.into()]])));
//! assert!(driver.statements().is_empty());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::config::{ConnectionConfig, Dialect};
use crate::decode::BufferedRows;
use crate::error::{DbError, DbResult};
use crate::traits::{Backend, BoxFuture, Driver, ExecResult, RowSource, Transaction};
use crate::transaction::TxOptions;
use crate::value::Value;

/// What a mock backend answers for one statement.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// A result set.
    Rows {
        /// Column names.
        columns: Vec<String>,
        /// Row values.
        rows: Vec<Vec<Value>>,
    },
    /// A non-row-returning outcome.
    Affected(u64),
}

impl MockReply {
    /// A result set with the given columns.
    pub fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        Self::Rows {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    /// An empty result set with the given columns.
    pub fn empty(columns: &[&str]) -> Self {
        Self::rows(columns, Vec::new())
    }

    /// A rows-affected outcome.
    pub fn affected(n: u64) -> Self {
        Self::Affected(n)
    }
}

type Handler = dyn Fn(&str, &[Value]) -> DbResult<MockReply> + Send + Sync;
type OpenHook = dyn Fn(&ConnectionConfig) -> DbResult<()> + Send + Sync;

#[derive(Default)]
struct Shared {
    statements: Mutex<Vec<(String, Vec<Value>)>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// A driver whose backends answer from a closure.
#[derive(Clone)]
pub struct MockDriver {
    dialect: Dialect,
    handler: Arc<Handler>,
    open_hook: Arc<OpenHook>,
    fail_ping: bool,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDriver")
            .field("dialect", &self.dialect)
            .field("fail_ping", &self.fail_ping)
            .finish_non_exhaustive()
    }
}

impl MockDriver {
    /// A driver that answers every statement with an empty result.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            handler: Arc::new(|sql: &str, _: &[Value]| {
                if crate::sql::is_select_query(sql) {
                    Ok(MockReply::empty(&[]))
                } else {
                    Ok(MockReply::affected(0))
                }
            }),
            open_hook: Arc::new(|_: &ConnectionConfig| Ok(())),
            fail_ping: false,
            shared: Arc::default(),
        }
    }

    /// Answer statements with `handler`.
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &[Value]) -> DbResult<MockReply> + Send + Sync + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    /// Fail `open` for every config the predicate matches.
    pub fn failing_open_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ConnectionConfig) -> bool + Send + Sync + 'static,
    {
        self.open_hook = Arc::new(move |config: &ConnectionConfig| {
            if predicate(config) {
                Err(DbError::connect(&config.name, "connection refused"))
            } else {
                Ok(())
            }
        });
        self
    }

    /// Make every liveness probe fail.
    pub fn failing_ping(mut self) -> Self {
        self.fail_ping = true;
        self
    }

    /// Every statement received so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.shared
            .statements
            .lock()
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    /// Every statement received so far with its bound parameters.
    pub fn statements_with_params(&self) -> Vec<(String, Vec<Value>)> {
        self.shared.statements.lock().clone()
    }

    /// Forget recorded statements.
    pub fn clear(&self) {
        self.shared.statements.lock().clear();
    }

    /// Number of backends opened.
    pub fn opened_count(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Number of backends closed.
    pub fn closed_count(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Driver for MockDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn open<'a>(&'a self, config: &'a ConnectionConfig) -> BoxFuture<'a, DbResult<Arc<dyn Backend>>> {
        Box::pin(async move {
            (self.open_hook)(config)?;
            self.shared.opened.fetch_add(1, Ordering::SeqCst);
            let backend: Arc<dyn Backend> = Arc::new(MockBackend {
                target: config.name.clone(),
                handler: self.handler.clone(),
                fail_ping: self.fail_ping,
                shared: self.shared.clone(),
            });
            Ok(backend)
        })
    }
}

struct MockBackend {
    target: String,
    handler: Arc<Handler>,
    fail_ping: bool,
    shared: Arc<Shared>,
}

fn answer(
    shared: &Shared,
    handler: &Handler,
    sql: &str,
    params: &[Value],
) -> DbResult<MockReply> {
    shared
        .statements
        .lock()
        .push((sql.to_string(), params.to_vec()));
    handler(sql, params)
}

fn into_rows(reply: MockReply) -> Box<dyn RowSource> {
    match reply {
        MockReply::Rows { columns, rows } => Box::new(BufferedRows::new(columns, rows)),
        MockReply::Affected(_) => Box::new(BufferedRows::default()),
    }
}

fn into_exec(reply: MockReply) -> ExecResult {
    match reply {
        MockReply::Affected(n) => ExecResult {
            rows_affected: n,
            last_insert_id: None,
        },
        MockReply::Rows { rows, .. } => ExecResult {
            rows_affected: rows.len() as u64,
            last_insert_id: None,
        },
    }
}

impl Backend for MockBackend {
    fn ping(&self) -> BoxFuture<'_, DbResult<()>> {
        Box::pin(async move {
            if self.fail_ping {
                Err(DbError::query_message("ping", &self.target, "server closed the connection"))
            } else {
                Ok(())
            }
        })
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, DbResult<Box<dyn RowSource>>> {
        Box::pin(async move { answer(&self.shared, &*self.handler, sql, params).map(into_rows) })
    }

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, DbResult<ExecResult>> {
        Box::pin(async move { answer(&self.shared, &*self.handler, sql, params).map(into_exec) })
    }

    fn begin<'a>(
        &'a self,
        options: &'a TxOptions,
    ) -> BoxFuture<'a, DbResult<Box<dyn Transaction>>> {
        Box::pin(async move {
            answer(&self.shared, &*self.handler, &options.begin_statement(), &[])?;
            let tx: Box<dyn Transaction> = Box::new(MockTransaction {
                handler: self.handler.clone(),
                shared: self.shared.clone(),
            });
            Ok(tx)
        })
    }

    fn close(&self) -> BoxFuture<'_, DbResult<()>> {
        Box::pin(async move {
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

struct MockTransaction {
    handler: Arc<Handler>,
    shared: Arc<Shared>,
}

impl Transaction for MockTransaction {
    fn query<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, DbResult<Box<dyn RowSource>>> {
        Box::pin(async move { answer(&self.shared, &*self.handler, sql, params).map(into_rows) })
    }

    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, DbResult<ExecResult>> {
        Box::pin(async move { answer(&self.shared, &*self.handler, sql, params).map(into_exec) })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, DbResult<()>> {
        Box::pin(async move { answer(&self.shared, &*self.handler, "COMMIT", &[]).map(|_| ()) })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, DbResult<()>> {
        Box::pin(async move { answer(&self.shared, &*self.handler, "ROLLBACK", &[]).map(|_| ()) })
    }
}
