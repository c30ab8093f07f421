//! Error types for PostgreSQL operations.

use dbmesh_core::DbError;
use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors raised inside the PostgreSQL backend.
///
/// They never leave the crate as-is: the backend converts them into
/// [`DbError`] with the failing operation and connection name attached.
#[derive(Error, Debug)]
pub enum PgError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Pool construction error.
    #[error("failed to create pool: {0}")]
    Build(#[from] deadpool_postgres::BuildError),

    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// TLS setup error.
    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),

    /// Certificate file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Row deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Check if this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Check if the pool could not hand out a connection because the
    /// server was unreachable or the handshake failed.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Pool(deadpool_postgres::PoolError::Backend(e)) | Self::Postgres(e) => {
                e.is_closed() || e.as_db_error().is_none()
            }
            Self::Pool(_) | Self::Tls(_) | Self::Io { .. } => true,
            _ => false,
        }
    }

    /// Get the SQLSTATE code, if the server reported one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Pool(deadpool_postgres::PoolError::Backend(e)) | Self::Postgres(e) => {
                e.code().map(|c| c.code())
            }
            _ => None,
        }
    }

    /// Convert into a [`DbError`] raised while opening the pool.
    pub fn into_connect(self, target: &str) -> DbError {
        match self {
            Self::Config(message) => DbError::config(format!("connection '{}': {}", target, message)),
            other => DbError::connect_with(target, other),
        }
    }

    /// Convert into a [`DbError`] raised while running `operation`.
    pub fn into_query(self, operation: &str, target: &str) -> DbError {
        match self {
            Self::Config(message) => DbError::config(format!("connection '{}': {}", target, message)),
            other => DbError::query(operation, target, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_stays_config() {
        let err = PgError::config("bad target_session_attrs").into_query("query", "tsdb");
        assert!(err.is_config());
        assert!(err.to_string().contains("'tsdb'"));
    }

    #[test]
    fn test_deserialization_becomes_query_error() {
        let err = PgError::deserialization("column 2").into_query("row iteration", "tsdb");
        assert!(err.is_query());
        assert_eq!(err.operation(), Some("row iteration"));
    }

    #[test]
    fn test_io_error_is_connection_error() {
        let err = PgError::Io {
            path: "/missing/root.crt".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.is_connection_error());
        assert!(err.into_connect("tsdb").is_connect());
    }
}
