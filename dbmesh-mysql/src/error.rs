//! Error types for MySQL operations.

use std::time::Duration;

use dbmesh_core::DbError;
use thiserror::Error;

/// Result type for MySQL operations.
pub type MysqlResult<T> = Result<T, MysqlError>;

/// Errors raised inside the MySQL backend.
#[derive(Error, Debug)]
pub enum MysqlError {
    /// MySQL driver error.
    #[error("mysql error: {0}")]
    Mysql(#[from] mysql_async::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A connection could not be handed out in time.
    #[error("no connection available within {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The pool has been disconnected.
    #[error("pool is closed")]
    Closed,
}

impl MysqlError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if the server reported the error (as opposed to I/O or driver
    /// failures).
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Mysql(mysql_async::Error::Server(_)))
    }

    /// Get the server error code, if any.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Mysql(mysql_async::Error::Server(e)) => Some(e.code),
            _ => None,
        }
    }

    /// Convert into a [`DbError`] raised while connecting.
    pub fn into_connect(self, target: &str) -> DbError {
        match self {
            Self::Config(msg) => DbError::config(format!("connection '{}': {}", target, msg)),
            other => DbError::connect_with(target, other),
        }
    }

    /// Convert into a [`DbError`] raised while running `operation`.
    pub fn into_query(self, operation: &str, target: &str) -> DbError {
        match self {
            Self::Config(msg) => DbError::config(format!("connection '{}': {}", target, msg)),
            Self::Closed => DbError::not_connected(operation, target),
            other => DbError::query(operation, target, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_pool_is_not_connected() {
        let err = MysqlError::Closed.into_query("query", "orders");
        assert!(err.is_not_connected());
    }

    #[test]
    fn test_timeout_message() {
        let err = MysqlError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "no connection available within 1500ms");
        assert!(err.into_connect("orders").is_connect());
        assert_eq!(MysqlError::config("x").code(), None);
    }
}
