//! Connection string rendering.
//!
//! Both the real and the masked connection strings come out of one renderer,
//! so they differ only in the password token. Values that may contain
//! reserved characters are form-urlencoded the same way in both forms.

use url::form_urlencoded;

use crate::config::{ConnectionConfig, Dialect};

/// Token that replaces the password in masked connection strings.
pub const PASSWORD_MASK: &str = "***";

/// Extra option keys whose values are treated as credentials.
const SECRET_OPTION_KEYS: &[&str] = &["password", "passfile", "sslpassword"];

#[derive(Clone, Copy)]
enum Secrets {
    Reveal,
    Mask,
}

/// Form-urlencode a connection string value.
pub fn escape(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Render the connection string including the password.
pub fn render(config: &ConnectionConfig) -> String {
    render_with(config, Secrets::Reveal)
}

/// Render the connection string with every credential replaced by
/// [`PASSWORD_MASK`].
pub fn render_masked(config: &ConnectionConfig) -> String {
    render_with(config, Secrets::Mask)
}

fn render_with(config: &ConnectionConfig, secrets: Secrets) -> String {
    match config.dialect {
        Dialect::Postgres => render_postgres(config, secrets),
        Dialect::Mysql => render_mysql(config, secrets),
    }
}

fn secret(value: &str, secrets: Secrets) -> String {
    match secrets {
        Secrets::Reveal => escape(value),
        Secrets::Mask => PASSWORD_MASK.to_string(),
    }
}

fn is_secret_option(key: &str) -> bool {
    SECRET_OPTION_KEYS
        .iter()
        .any(|k| k.eq_ignore_ascii_case(key))
}

fn render_postgres(config: &ConnectionConfig, secrets: Secrets) -> String {
    let mut parts = vec![
        format!("host={}", config.host),
        format!("port={}", config.effective_port()),
        format!("user={}", config.user),
    ];

    if !config.password.is_empty() {
        parts.push(format!("password={}", secret(&config.password, secrets)));
    }
    if !config.database.is_empty() {
        parts.push(format!("dbname={}", config.database));
    }

    parts.push(format!("sslmode={}", config.effective_ssl_mode()));

    if let Some(cert) = &config.ssl_cert {
        parts.push(format!("sslcert={}", cert));
    }
    if let Some(key) = &config.ssl_key {
        parts.push(format!("sslkey={}", key));
    }
    if let Some(root) = &config.ssl_root_cert {
        parts.push(format!("sslrootcert={}", root));
    }
    if let Some(timeout) = config.connect_timeout {
        parts.push(format!("connect_timeout={}", timeout.as_secs()));
    }
    if let Some(name) = &config.application_name {
        parts.push(format!("application_name={}", escape(name)));
    }
    if let Some(attrs) = &config.target_session_attrs {
        parts.push(format!("target_session_attrs={}", attrs));
    }

    for (key, value) in &config.options {
        let value = if is_secret_option(key) {
            secret(value, secrets)
        } else {
            escape(value)
        };
        parts.push(format!("{}={}", key, value));
    }

    parts.join(" ")
}

fn render_mysql(config: &ConnectionConfig, secrets: Secrets) -> String {
    let credentials = if config.password.is_empty() {
        config.user.clone()
    } else {
        format!("{}:{}", config.user, secret(&config.password, secrets))
    };

    let mut dsn = format!(
        "{}@tcp({}:{})/{}?parseTime=true",
        credentials,
        config.host,
        config.effective_port(),
        config.database
    );

    for (key, value) in &config.options {
        let value = if is_secret_option(key) {
            secret(value, secrets)
        } else {
            escape(value)
        };
        dsn.push('&');
        dsn.push_str(&escape(key));
        dsn.push('=');
        dsn.push_str(&value);
    }

    dsn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SslMode;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn postgres() -> ConnectionConfig {
        ConnectionConfig::builder("tsdb", Dialect::Postgres)
            .host("db.internal")
            .user("ingest")
            .password("p@ss word&more")
            .database("metrics")
            .build()
            .unwrap()
    }

    #[test]
    fn test_postgres_minimal() {
        assert_eq!(
            render_masked(&postgres()),
            "host=db.internal port=5432 user=ingest password=*** dbname=metrics sslmode=disable"
        );
    }

    #[test]
    fn test_postgres_full() {
        let mut config = postgres();
        config.ssl_mode = Some(SslMode::VerifyFull);
        config.ssl_root_cert = Some("/etc/ssl/root.pem".into());
        config.connect_timeout = Some(Duration::from_secs(10));
        config.application_name = Some("ingest worker".into());
        config.target_session_attrs = Some("read-write".into());
        config
            .options
            .insert("search_path".into(), "public,metrics".into());

        assert_eq!(
            render_masked(&config),
            "host=db.internal port=5432 user=ingest password=*** dbname=metrics \
             sslmode=verify-full sslrootcert=/etc/ssl/root.pem connect_timeout=10 \
             application_name=ingest+worker target_session_attrs=read-write \
             search_path=public%2Cmetrics"
        );
    }

    #[test]
    fn test_postgres_without_password_or_database() {
        let config = ConnectionConfig::builder("a", Dialect::Postgres)
            .user("postgres")
            .build()
            .unwrap();
        assert_eq!(
            render(&config),
            "host=localhost port=5432 user=postgres sslmode=disable"
        );
    }

    #[test]
    fn test_real_and_masked_differ_only_in_password() {
        let mut config = postgres();
        config.application_name = Some("a&b".into());
        config.options.insert("timezone".into(), "UTC+1".into());

        let real = render(&config);
        let masked = render_masked(&config);
        assert_eq!(real.replace(&escape(&config.password), PASSWORD_MASK), masked);

        let mut mysql = config.clone();
        mysql.dialect = Dialect::Mysql;
        mysql.port = 3306;
        let real = render(&mysql);
        let masked = render_masked(&mysql);
        assert_eq!(real.replace(&escape(&mysql.password), PASSWORD_MASK), masked);
    }

    #[test]
    fn test_mysql_dsn() {
        let config = ConnectionConfig::builder("orders", Dialect::Mysql)
            .host("mysql.internal")
            .user("app")
            .password("secret")
            .database("shop")
            .build()
            .unwrap();

        assert_eq!(
            render_masked(&config),
            "app:***@tcp(mysql.internal:3306)/shop?parseTime=true"
        );
        assert_eq!(
            render(&config),
            "app:secret@tcp(mysql.internal:3306)/shop?parseTime=true"
        );
    }

    #[test]
    fn test_secret_options_are_masked() {
        let mut config = postgres();
        config
            .options
            .insert("sslpassword".into(), "key-passphrase-123".into());

        let masked = render_masked(&config);
        assert!(!masked.contains("key-passphrase-123"));
        assert!(masked.ends_with("sslpassword=***"));
    }
}
