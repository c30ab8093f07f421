//! Seams between the connection layer and the dialect drivers.
//!
//! A [`Driver`] opens a pooled [`Backend`] for a config; the backend runs
//! statements and hands back [`RowSource`]s that the decoder drains.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::{ConnectionConfig, Dialect};
use crate::error::DbResult;
use crate::transaction::TxOptions;
use crate::value::Value;

/// Boxed future returned by the driver traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    /// Number of rows the statement touched.
    pub rows_affected: u64,
    /// Last generated id, where the dialect reports one.
    pub last_insert_id: Option<u64>,
}

/// An open result set.
///
/// Values come back in driver-native form; undecodable columns are
/// [`Value::Bytes`]. Dropping the source releases the underlying handle.
pub trait RowSource: Send {
    /// Column names, in select order.
    fn columns(&self) -> &[String];

    /// Fetch the next row, or `None` once the set is exhausted.
    fn next_row(&mut self) -> BoxFuture<'_, DbResult<Option<Vec<Value>>>>;
}

/// A pooled handle to one backend.
pub trait Backend: Send + Sync {
    /// Run a cheap liveness check.
    fn ping(&self) -> BoxFuture<'_, DbResult<()>>;

    /// Run a row-returning statement.
    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, DbResult<Box<dyn RowSource>>>;

    /// Run a statement that does not return rows.
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [Value])
    -> BoxFuture<'a, DbResult<ExecResult>>;

    /// Start a transaction on a dedicated pooled handle.
    fn begin<'a>(&'a self, options: &'a TxOptions)
    -> BoxFuture<'a, DbResult<Box<dyn Transaction>>>;

    /// Release every pooled handle.
    fn close(&self) -> BoxFuture<'_, DbResult<()>>;
}

/// A transaction pinned to one pooled handle.
///
/// Dropping an unfinished transaction rolls it back.
pub trait Transaction: Send {
    /// Run a row-returning statement inside the transaction.
    fn query<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, DbResult<Box<dyn RowSource>>>;

    /// Run a statement that does not return rows inside the transaction.
    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, DbResult<ExecResult>>;

    /// Commit the transaction.
    fn commit(self: Box<Self>) -> BoxFuture<'static, DbResult<()>>;

    /// Roll the transaction back.
    fn rollback(self: Box<Self>) -> BoxFuture<'static, DbResult<()>>;
}

/// Opens backends for one dialect.
pub trait Driver: Send + Sync {
    /// The dialect this driver serves.
    fn dialect(&self) -> Dialect;

    /// Open a pool for the config. The pool may connect lazily; liveness is
    /// checked separately through [`Backend::ping`].
    fn open<'a>(&'a self, config: &'a ConnectionConfig) -> BoxFuture<'a, DbResult<Arc<dyn Backend>>>;
}
