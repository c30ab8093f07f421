//! Translation of a [`ConnectionConfig`] into `tokio-postgres` settings.

use dbmesh_core::config::{ConnectionConfig, SslMode};
use native_tls::{Certificate, Identity, TlsConnector};
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::config::{SslMode as PgSslMode, TargetSessionAttrs};

use crate::error::{PgError, PgResult};

/// Build the `tokio-postgres` config for a connection.
///
/// Caller-supplied extra options are sent as server run-time parameters
/// (`-c key=value`); options dbmesh reads itself are skipped.
pub fn pg_config(config: &ConnectionConfig) -> PgResult<tokio_postgres::Config> {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&config.host);
    pg.port(config.effective_port());
    pg.user(&config.user);

    if !config.password.is_empty() {
        pg.password(&config.password);
    }
    if !config.database.is_empty() {
        pg.dbname(&config.database);
    }
    if let Some(ref name) = config.application_name {
        pg.application_name(name);
    }
    if let Some(timeout) = config.connect_timeout {
        pg.connect_timeout(timeout);
    }

    pg.ssl_mode(match config.effective_ssl_mode() {
        SslMode::Disable | SslMode::Allow => PgSslMode::Disable,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => PgSslMode::Require,
    });

    if let Some(ref attrs) = config.target_session_attrs {
        pg.target_session_attrs(parse_session_attrs(attrs)?);
    }

    let options = server_options(config);
    if !options.is_empty() {
        pg.options(&options);
    }

    Ok(pg)
}

fn parse_session_attrs(value: &str) -> PgResult<TargetSessionAttrs> {
    match value.trim().to_ascii_lowercase().as_str() {
        "any" => Ok(TargetSessionAttrs::Any),
        "read-write" => Ok(TargetSessionAttrs::ReadWrite),
        other => Err(PgError::config(format!(
            "unsupported target_session_attrs '{}' (expected any or read-write)",
            other
        ))),
    }
}

/// Render extra options as a startup `options` string.
pub fn server_options(config: &ConnectionConfig) -> String {
    config
        .server_options()
        .map(|(key, value)| format!("-c {}={}", key, escape_option(value)))
        .collect::<Vec<_>>()
        .join(" ")
}

// Backslash-escape spaces and backslashes, as the server splits the
// options string on unescaped whitespace.
fn escape_option(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || c.is_whitespace() {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Build the TLS connector for the configured mode, or `None` for a
/// plaintext connection.
///
/// `require` encrypts without checking the server certificate, `verify-ca`
/// checks the chain but not the host name, `verify-full` checks both.
/// `sslrootcert` and the `sslcert`/`sslkey` pair (PEM, PKCS#8 key) are read
/// from disk.
pub async fn tls_connector(config: &ConnectionConfig) -> PgResult<Option<MakeTlsConnector>> {
    let mode = config.effective_ssl_mode();
    if !mode.requires_tls() {
        return Ok(None);
    }

    let mut builder = TlsConnector::builder();
    match mode {
        SslMode::Require => {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        SslMode::VerifyCa => {
            builder.danger_accept_invalid_hostnames(true);
        }
        _ => {}
    }

    if let Some(ref path) = config.ssl_root_cert {
        let pem = read_file(path).await?;
        builder.add_root_certificate(Certificate::from_pem(&pem)?);
    }

    if let (Some(cert), Some(key)) = (&config.ssl_cert, &config.ssl_key) {
        let cert = read_file(cert).await?;
        let key = read_file(key).await?;
        builder.identity(Identity::from_pkcs8(&cert, &key)?);
    }

    Ok(Some(MakeTlsConnector::new(builder.build()?)))
}

async fn read_file(path: &str) -> PgResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|source| PgError::Io {
        path: path.to_string(),
        source,
    })
}
