//! Pass-through transactions.
//!
//! A [`Tx`] pins one pooled handle until it is committed, rolled back or
//! dropped. Dropping it without finishing rolls the work back.
//!
//! ```rust
//! use dbmesh_core::transaction::{IsolationLevel, TxOptions};
//!
//! let options = TxOptions::new()
//!     .isolation(IsolationLevel::Serializable)
//!     .read_only();
//! assert_eq!(
//!     options.begin_statement(),
//!     "BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY"
//! );
//! ```

use tracing::debug;

use crate::context::CallContext;
use crate::decode::decode_rows;
use crate::error::DbResult;
use crate::row::GenericRow;
use crate::traits::{ExecResult, Transaction};
use crate::value::Value;

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Read uncommitted - allows dirty reads.
    ReadUncommitted,
    /// Read committed - prevents dirty reads.
    ReadCommitted,
    /// Repeatable read - prevents non-repeatable reads.
    RepeatableRead,
    /// Serializable - highest isolation level.
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL clause for this isolation level.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for starting a transaction. The default leaves both the
/// isolation level and the access mode to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxOptions {
    /// Requested isolation level.
    pub isolation: Option<IsolationLevel>,
    /// Start the transaction read-only.
    pub read_only: bool,
}

impl TxOptions {
    /// Server-default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an isolation level.
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    /// Make the transaction read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// The PostgreSQL `BEGIN` statement for these options.
    pub fn begin_statement(&self) -> String {
        let mut sql = String::from("BEGIN");
        if let Some(level) = self.isolation {
            sql.push_str(" ISOLATION LEVEL ");
            sql.push_str(level.as_sql());
        }
        if self.read_only {
            sql.push_str(" READ ONLY");
        }
        sql
    }
}

/// An open transaction on a named connection.
pub struct Tx {
    inner: Box<dyn Transaction>,
    target: String,
}

impl std::fmt::Debug for Tx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx").field("target", &self.target).finish()
    }
}

impl Tx {
    pub(crate) fn new(inner: Box<dyn Transaction>, target: impl Into<String>) -> Self {
        Self {
            inner,
            target: target.into(),
        }
    }

    /// Name of the connection this transaction runs on.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Run a row-returning statement and decode every row.
    pub async fn query(
        &mut self,
        ctx: &CallContext,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Vec<GenericRow>> {
        debug!(connection = %self.target, sql = %sql, "Executing query in transaction");
        let inner = &mut self.inner;
        ctx.run("query", async move {
            let source = inner.query(sql, params).await?;
            decode_rows(source).await
        })
        .await
    }

    /// Run a row-returning statement and return its first row.
    pub async fn query_row(
        &mut self,
        ctx: &CallContext,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Option<GenericRow>> {
        Ok(self.query(ctx, sql, params).await?.into_iter().next())
    }

    /// Run a statement that does not return rows.
    pub async fn exec(
        &mut self,
        ctx: &CallContext,
        sql: &str,
        params: &[Value],
    ) -> DbResult<ExecResult> {
        debug!(connection = %self.target, sql = %sql, "Executing statement in transaction");
        ctx.run("exec", self.inner.execute(sql, params)).await
    }

    /// Commit the transaction.
    pub async fn commit(self, ctx: &CallContext) -> DbResult<()> {
        debug!(connection = %self.target, "Committing transaction");
        ctx.run("commit", self.inner.commit()).await
    }

    /// Roll the transaction back.
    pub async fn rollback(self, ctx: &CallContext) -> DbResult<()> {
        debug!(connection = %self.target, "Rolling back transaction");
        ctx.run("rollback", self.inner.rollback()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_statement() {
        assert_eq!(TxOptions::new().begin_statement(), "BEGIN");
        assert_eq!(
            TxOptions::new()
                .isolation(IsolationLevel::RepeatableRead)
                .begin_statement(),
            "BEGIN ISOLATION LEVEL REPEATABLE READ"
        );
        assert_eq!(TxOptions::new().read_only().begin_statement(), "BEGIN READ ONLY");
    }
}
