//! Connection configuration.
//!
//! A [`ConnectionConfig`] describes one named backend. Configs are built in
//! code with [`ConnectionConfig::builder`] or ingested from a JSON document
//! with [`parse_document`]; neither path touches files or the process
//! environment.
//!
//! ```rust
//! use dbmesh_core::config::{ConnectionConfig, Dialect};
//!
//! let config = ConnectionConfig::builder("tsdb", Dialect::Postgres)
//!     .host("db.internal")
//!     .user("ingest")
//!     .password("s3cret")
//!     .database("metrics")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.pool.max_open(), 25);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{DbError, DbResult};

/// Default maximum number of open connections per pool.
pub const DEFAULT_MAX_OPEN: u32 = 25;
/// Default number of idle connections kept per pool.
pub const DEFAULT_MAX_IDLE: u32 = 5;
/// Default maximum lifetime of a pooled connection.
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);
/// Default maximum idle time of a pooled connection.
pub const DEFAULT_MAX_IDLE_TIME: Duration = Duration::from_secs(5 * 60);

/// Option keys read by dbmesh itself and never sent to the server.
pub const CLIENT_OPTION_KEYS: &[&str] = &[
    "use_timescaledb",
    "chunk_time_interval",
    "retention_duration",
    "compression_after",
    "segment_by",
    "order_by",
];

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    /// PostgreSQL (and TimescaleDB).
    #[default]
    Postgres,
    /// MySQL.
    Mysql,
}

impl Dialect {
    /// Canonical lowercase tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        }
    }

    /// Default TCP port for the dialect.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Mysql => 3306,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::Mysql),
            other => Err(DbError::config(format!(
                "unsupported database type '{}' (expected 'postgres' or 'mysql')",
                other
            ))),
        }
    }
}

/// TLS mode for PostgreSQL connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Never use TLS.
    #[default]
    Disable,
    /// Plaintext first, TLS if the server insists.
    Allow,
    /// TLS if the server offers it.
    Prefer,
    /// TLS without certificate verification.
    Require,
    /// TLS with certificate chain verification.
    VerifyCa,
    /// TLS with chain and host name verification.
    VerifyFull,
}

impl SslMode {
    /// The libpq spelling of this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Allow => "allow",
            Self::Prefer => "prefer",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        }
    }

    /// Whether the mode requires an encrypted transport.
    pub fn requires_tls(&self) -> bool {
        matches!(self, Self::Require | Self::VerifyCa | Self::VerifyFull)
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SslMode {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            "allow" => Ok(Self::Allow),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            other => Err(DbError::config(format!("invalid ssl_mode '{}'", other))),
        }
    }
}

/// Pool bounds. Unset fields fall back to the crate defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolSettings {
    /// Maximum number of open connections.
    pub max_open: Option<u32>,
    /// Maximum number of idle connections.
    pub max_idle: Option<u32>,
    /// Maximum lifetime of a connection.
    pub max_lifetime: Option<Duration>,
    /// Maximum time a connection may sit idle.
    pub max_idle_time: Option<Duration>,
}

impl PoolSettings {
    /// Fill every unset bound with its default.
    pub fn set_defaults(&mut self) {
        self.max_open.get_or_insert(DEFAULT_MAX_OPEN);
        self.max_idle.get_or_insert(DEFAULT_MAX_IDLE);
        self.max_lifetime.get_or_insert(DEFAULT_MAX_LIFETIME);
        self.max_idle_time.get_or_insert(DEFAULT_MAX_IDLE_TIME);
    }

    /// Effective maximum number of open connections.
    pub fn max_open(&self) -> u32 {
        self.max_open.unwrap_or(DEFAULT_MAX_OPEN)
    }

    /// Effective number of idle connections, never above `max_open`.
    pub fn max_idle(&self) -> u32 {
        self.max_idle.unwrap_or(DEFAULT_MAX_IDLE).min(self.max_open())
    }

    /// Effective maximum connection lifetime.
    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime.unwrap_or(DEFAULT_MAX_LIFETIME)
    }

    /// Effective maximum idle time.
    pub fn max_idle_time(&self) -> Duration {
        self.max_idle_time.unwrap_or(DEFAULT_MAX_IDLE_TIME)
    }
}

/// Configuration of one named backend.
#[derive(Clone, PartialEq, Default)]
pub struct ConnectionConfig {
    /// Unique name used by every downstream caller.
    pub name: String,
    /// SQL dialect.
    pub dialect: Dialect,
    /// Server host.
    pub host: String,
    /// Server port. Zero means the dialect default.
    pub port: u16,
    /// User name.
    pub user: String,
    /// Password. Never rendered by `Debug` or by masked connection strings.
    pub password: String,
    /// Database name.
    pub database: String,
    /// Pool bounds.
    pub pool: PoolSettings,
    /// TLS mode (PostgreSQL).
    pub ssl_mode: Option<SslMode>,
    /// Client certificate path (PostgreSQL).
    pub ssl_cert: Option<String>,
    /// Client key path (PostgreSQL).
    pub ssl_key: Option<String>,
    /// Root certificate path (PostgreSQL).
    pub ssl_root_cert: Option<String>,
    /// Application name reported to the server (PostgreSQL).
    pub application_name: Option<String>,
    /// Connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Session targeting hint such as `read-write` (PostgreSQL).
    pub target_session_attrs: Option<String>,
    /// Extra driver options, ordered by key.
    pub options: BTreeMap<String, String>,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("database", &self.database)
            .field("pool", &self.pool)
            .field("ssl_mode", &self.ssl_mode)
            .field("application_name", &self.application_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("target_session_attrs", &self.target_session_attrs)
            .field("options", &self.options.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ConnectionConfig {
    /// Start building a config for the given name and dialect.
    pub fn builder(name: impl Into<String>, dialect: Dialect) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new(name, dialect)
    }

    /// Start building a PostgreSQL config.
    pub fn postgres(name: impl Into<String>) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new(name, Dialect::Postgres)
    }

    /// Start building a MySQL config.
    pub fn mysql(name: impl Into<String>) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new(name, Dialect::Mysql)
    }

    /// Apply pool defaults, the dialect's default port and, for PostgreSQL,
    /// the `disable` TLS mode when none is set.
    pub fn set_defaults(&mut self) {
        self.pool.set_defaults();
        if self.port == 0 {
            self.port = self.dialect.default_port();
        }
        if self.dialect == Dialect::Postgres && self.ssl_mode.is_none() {
            self.ssl_mode = Some(SslMode::Disable);
        }
    }

    /// Check the invariants every stored config must satisfy.
    pub fn validate(&self) -> DbResult<()> {
        if self.name.trim().is_empty() {
            return Err(DbError::config("connection name must not be empty"));
        }
        if self.ssl_key.is_some() != self.ssl_cert.is_some() {
            return Err(DbError::config(format!(
                "connection '{}': ssl_cert and ssl_key must be given together",
                self.name
            )));
        }
        if let (Some(open), Some(idle)) = (self.pool.max_open, self.pool.max_idle) {
            if idle > open {
                return Err(DbError::config(format!(
                    "connection '{}': max_idle_conns ({}) exceeds max_open_conns ({})",
                    self.name, idle, open
                )));
            }
        }
        Ok(())
    }

    /// Effective port.
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            self.dialect.default_port()
        } else {
            self.port
        }
    }

    /// Effective TLS mode.
    pub fn effective_ssl_mode(&self) -> SslMode {
        self.ssl_mode.unwrap_or_default()
    }

    /// Look up a boolean extra option (`true`, `1`, `yes`, `on`).
    pub fn option_flag(&self, key: &str) -> Option<bool> {
        self.options.get(key).map(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            )
        })
    }

    /// Extra options meant for the server, in key order.
    pub fn server_options(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options
            .iter()
            .filter(|(k, _)| !CLIENT_OPTION_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Create a builder with defaults for the dialect.
    pub fn new(name: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            config: ConnectionConfig {
                name: name.into(),
                dialect,
                host: "localhost".to_string(),
                ..Default::default()
            },
        }
    }

    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the user.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = password.into();
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = database.into();
        self
    }

    /// Set the maximum number of open connections.
    pub fn max_open(mut self, n: u32) -> Self {
        self.config.pool.max_open = Some(n);
        self
    }

    /// Set the number of idle connections.
    pub fn max_idle(mut self, n: u32) -> Self {
        self.config.pool.max_idle = Some(n);
        self
    }

    /// Set the maximum connection lifetime.
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.pool.max_lifetime = Some(lifetime);
        self
    }

    /// Set the maximum idle time.
    pub fn max_idle_time(mut self, idle: Duration) -> Self {
        self.config.pool.max_idle_time = Some(idle);
        self
    }

    /// Set the TLS mode.
    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.config.ssl_mode = Some(mode);
        self
    }

    /// Set the root certificate path.
    pub fn ssl_root_cert(mut self, path: impl Into<String>) -> Self {
        self.config.ssl_root_cert = Some(path.into());
        self
    }

    /// Set the client certificate and key paths.
    pub fn ssl_client_cert(mut self, cert: impl Into<String>, key: impl Into<String>) -> Self {
        self.config.ssl_cert = Some(cert.into());
        self.config.ssl_key = Some(key.into());
        self
    }

    /// Set the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.application_name = Some(name.into());
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Set the session targeting hint.
    pub fn target_session_attrs(mut self, attrs: impl Into<String>) -> Self {
        self.config.target_session_attrs = Some(attrs.into());
        self
    }

    /// Add an extra driver option.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.options.insert(key.into(), value.into());
        self
    }

    /// Validate and return the config with defaults applied.
    pub fn build(self) -> DbResult<ConnectionConfig> {
        let mut config = self.config;
        config.validate()?;
        config.set_defaults();
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    connections: Vec<RawConnection>,
}

#[derive(Debug, Deserialize)]
struct RawConnection {
    #[serde(default)]
    id: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    user: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    name: String,
    ssl_mode: Option<String>,
    ssl_cert: Option<String>,
    ssl_key: Option<String>,
    ssl_root_cert: Option<String>,
    application_name: Option<String>,
    connect_timeout: Option<u64>,
    target_session_attrs: Option<String>,
    #[serde(default)]
    options: BTreeMap<String, String>,
    max_open_conns: Option<u32>,
    max_idle_conns: Option<u32>,
    conn_max_lifetime_seconds: Option<u64>,
    conn_max_idle_time_seconds: Option<u64>,
}

fn non_zero_secs(secs: Option<u64>) -> Option<Duration> {
    secs.filter(|s| *s > 0).map(Duration::from_secs)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TryFrom<RawConnection> for ConnectionConfig {
    type Error = DbError;

    fn try_from(raw: RawConnection) -> DbResult<Self> {
        let dialect = raw.kind.parse::<Dialect>().map_err(|e| match e {
            DbError::Config(msg) => DbError::config(format!("connection '{}': {}", raw.id, msg)),
            other => other,
        })?;
        let ssl_mode = non_blank(raw.ssl_mode)
            .map(|m| m.parse::<SslMode>())
            .transpose()
            .map_err(|e| DbError::config(format!("connection '{}': {}", raw.id, e)))?;

        let config = ConnectionConfig {
            name: raw.id,
            dialect,
            host: raw.host,
            port: raw.port,
            user: raw.user,
            password: raw.password,
            database: raw.name,
            pool: PoolSettings {
                max_open: raw.max_open_conns.filter(|n| *n > 0),
                max_idle: raw.max_idle_conns.filter(|n| *n > 0),
                max_lifetime: non_zero_secs(raw.conn_max_lifetime_seconds),
                max_idle_time: non_zero_secs(raw.conn_max_idle_time_seconds),
            },
            ssl_mode,
            ssl_cert: non_blank(raw.ssl_cert),
            ssl_key: non_blank(raw.ssl_key),
            ssl_root_cert: non_blank(raw.ssl_root_cert),
            application_name: non_blank(raw.application_name),
            connect_timeout: non_zero_secs(raw.connect_timeout),
            target_session_attrs: non_blank(raw.target_session_attrs),
            options: raw.options,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Parse a `{ "connections": [...] }` document into validated configs.
///
/// Defaults are not applied here; that happens when a config is stored or
/// turned into a connection.
pub fn parse_document(json: &str) -> DbResult<Vec<ConnectionConfig>> {
    let doc: RawDocument = serde_json::from_str(json)
        .map_err(|e| DbError::config(format!("invalid connection document: {}", e)))?;

    let mut configs = Vec::with_capacity(doc.connections.len());
    for (index, raw) in doc.connections.into_iter().enumerate() {
        if raw.id.trim().is_empty() {
            return Err(DbError::config(format!(
                "connection at index {} has an empty id",
                index
            )));
        }
        configs.push(ConnectionConfig::try_from(raw)?);
    }
    Ok(configs)
}
