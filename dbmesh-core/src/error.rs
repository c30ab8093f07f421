//! Error types for dbmesh operations.
//!
//! Every variant carries the operation that failed and the connection or
//! object it targeted, so an error can be acted on without inspecting
//! internal state.
//!
//! ```rust
//! use dbmesh_core::DbError;
//!
//! let err = DbError::not_connected("query", "analytics");
//! assert!(err.is_not_connected());
//! assert_eq!(err.to_string(), "query on 'analytics': connection is not open");
//! ```

use std::fmt;

use thiserror::Error;

/// Boxed error used as the source of driver failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for dbmesh operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur while configuring, connecting or querying.
#[derive(Error, Debug)]
pub enum DbError {
    /// Malformed or invalid connection configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A caller-supplied identifier, interval or option was rejected before
    /// any SQL was rendered.
    #[error("invalid {field}: {message}")]
    InvalidArgument {
        /// The argument that was rejected.
        field: String,
        /// Why it was rejected.
        message: String,
    },

    /// Handshake or liveness-probe failure.
    #[error("failed to connect '{target}': {message}")]
    Connect {
        /// Connection name.
        target: String,
        /// Description of the failure.
        message: String,
        /// Underlying driver error.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation attempted before connect or after close.
    #[error("{operation} on '{target}': connection is not open")]
    NotConnected {
        /// Operation that was attempted.
        operation: String,
        /// Connection name.
        target: String,
    },

    /// Extension-specific operation attempted without the capability.
    #[error("{operation} on '{target}': {reason}")]
    ExtensionUnavailable {
        /// Operation that was attempted.
        operation: String,
        /// Connection name.
        target: String,
        /// Why the extension cannot be used.
        reason: String,
    },

    /// Underlying execution failure.
    #[error("{operation} on '{target}' failed: {message}")]
    Query {
        /// Operation that was attempted.
        operation: String,
        /// Connection name.
        target: String,
        /// Description of the failure.
        message: String,
        /// Underlying driver error.
        #[source]
        source: Option<BoxError>,
    },

    /// A named connection, table, policy or view does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// What kind of object was looked up.
        kind: &'static str,
        /// The name that was looked up.
        name: String,
    },

    /// The call's deadline elapsed.
    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout {
        /// Operation that was attempted.
        operation: String,
        /// Milliseconds allowed before the deadline.
        elapsed_ms: u64,
    },

    /// The call was cancelled through its cancellation token.
    #[error("{operation} was cancelled")]
    Cancelled {
        /// Operation that was attempted.
        operation: String,
    },

    /// Every connection attempt in a batch failed.
    #[error("no connection could be established: {}", Failures(.failures))]
    ConnectAll {
        /// Per-name failures in attempt order.
        failures: Vec<(String, DbError)>,
    },
}

struct Failures<'a>(&'a [(String, DbError)]);

impl fmt::Display for Failures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, err)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", name, err)?;
        }
        Ok(())
    }
}

impl DbError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an invalid argument error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a connect error without an underlying cause.
    pub fn connect(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            target: target.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a connect error wrapping a driver error.
    pub fn connect_with<E>(target: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connect {
            target: target.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a not-connected error.
    pub fn not_connected(operation: impl Into<String>, target: impl Into<String>) -> Self {
        Self::NotConnected {
            operation: operation.into(),
            target: target.into(),
        }
    }

    /// Create an extension-unavailable error.
    pub fn extension_unavailable(
        operation: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ExtensionUnavailable {
            operation: operation.into(),
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a query error wrapping a driver error.
    pub fn query<E>(operation: impl Into<String>, target: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Query {
            operation: operation.into(),
            target: target.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error from a message only.
    pub fn query_message(
        operation: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Query {
            operation: operation.into(),
            target: target.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a not-found error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Re-label a driver-level error with the operation that issued it.
    ///
    /// Backends report failures with the primitive they ran (`query`,
    /// `execute`); extension operations use this to name themselves instead.
    pub fn within(self, operation: &str) -> Self {
        match self {
            Self::Query {
                target,
                message,
                source,
                ..
            } => Self::Query {
                operation: operation.to_string(),
                target,
                message,
                source,
            },
            other => other,
        }
    }

    /// Check if this is a configuration or argument error.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::InvalidArgument { .. })
    }

    /// Check if this is a connect error.
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::ConnectAll { .. })
    }

    /// Check if this is a not-connected error.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected { .. })
    }

    /// Check if this is an extension-unavailable error.
    pub fn is_extension_unavailable(&self) -> bool {
        matches!(self, Self::ExtensionUnavailable { .. })
    }

    /// Check if this is a query error.
    pub fn is_query(&self) -> bool {
        matches!(self, Self::Query { .. })
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this is a cancellation error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The operation name carried by this error, if any.
    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::NotConnected { operation, .. }
            | Self::ExtensionUnavailable { operation, .. }
            | Self::Query { operation, .. }
            | Self::Timeout { operation, .. }
            | Self::Cancelled { operation } => Some(operation),
            _ => None,
        }
    }
}
