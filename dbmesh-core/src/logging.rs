//! Logging setup for dbmesh.
//!
//! All crates log through `tracing`. Installing a subscriber is left to the
//! application, or to [`init`] when the `tracing-subscriber` feature is on.
//!
//! # Environment Variables
//!
//! - `DBMESH_DEBUG=true|1|yes` - Enable debug logging
//! - `DBMESH_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific level
//! - `DBMESH_LOG_FORMAT=json|pretty|compact` - Output format (default: json)
//!
//! ```rust,no_run
//! use dbmesh_core::logging;
//!
//! logging::init();
//! ```
//!
//! Inside the workspace, log with structured fields:
//!
//! ```rust,ignore
//! debug!(connection = %name, sql = %sql, "Executing query");
//! info!(connection = %name, version = %version, "TimescaleDB detected");
//! warn!(connection = %name, error = %e, "Failed to connect");
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

const DEBUG_VAR: &str = "DBMESH_DEBUG";
const LEVEL_VAR: &str = "DBMESH_LOG_LEVEL";
const FORMAT_VAR: &str = "DBMESH_LOG_FORMAT";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line human-readable output.
    Compact,
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Level directive applied to the dbmesh crates.
    pub level: &'static str,
    /// Output format.
    pub format: LogFormat,
    /// Whether logging was requested at all.
    pub enabled: bool,
}

fn flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

impl LogSettings {
    /// Resolve settings from raw variable values.
    ///
    /// The level defaults to `debug` when debugging is on and `warn`
    /// otherwise; unknown levels fall back the same way.
    pub fn resolve(debug: Option<&str>, level: Option<&str>, format: Option<&str>) -> Self {
        let debug = flag(debug);
        let fallback = if debug { "debug" } else { "warn" };
        let resolved_level = match level.map(str::to_lowercase).as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => fallback,
        };
        let format = match format.map(str::to_lowercase).as_deref() {
            Some("pretty") => LogFormat::Pretty,
            Some("compact") => LogFormat::Compact,
            _ => LogFormat::Json,
        };

        Self {
            level: resolved_level,
            format,
            enabled: debug || level.is_some(),
        }
    }

    /// Resolve settings from the `DBMESH_*` environment variables.
    pub fn from_env() -> Self {
        let debug = env::var(DEBUG_VAR).ok();
        let level = env::var(LEVEL_VAR).ok();
        let format = env::var(FORMAT_VAR).ok();
        Self::resolve(debug.as_deref(), level.as_deref(), format.as_deref())
    }
}

/// Check if debug logging is enabled via `DBMESH_DEBUG`.
#[inline]
pub fn is_debug_enabled() -> bool {
    flag(env::var(DEBUG_VAR).ok().as_deref())
}

/// Initialize logging from the environment.
///
/// Does nothing unless `DBMESH_DEBUG` or `DBMESH_LOG_LEVEL` is set.
/// Subsequent calls are no-ops.
pub fn init() {
    let settings = LogSettings::from_env();
    if settings.enabled {
        install(settings);
    }
}

/// Initialize logging at a specific level, ignoring `DBMESH_LOG_LEVEL`.
pub fn init_with_level(level: &str) {
    let format = env::var(FORMAT_VAR).ok();
    install(LogSettings::resolve(Some("true"), Some(level), format.as_deref()));
}

/// Initialize debug-level logging.
pub fn init_debug() {
    init_with_level("debug");
}

fn install(settings: LogSettings) {
    INIT.call_once(|| {
        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = settings.level;
            let filter = EnvFilter::try_new(format!(
                "dbmesh={level},dbmesh_core={level},dbmesh_postgres={level},\
                 dbmesh_mysql={level},dbmesh_timescale={level}"
            ))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

            let registry = tracing_subscriber::registry().with(filter);
            let installed = match settings.format {
                LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
                LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
                LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
            };

            if installed.is_ok() {
                tracing::info!(level = level, format = ?settings.format, "dbmesh logging initialized");
            }
        }

        #[cfg(not(feature = "tracing-subscriber"))]
        {
            let _ = settings;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = LogSettings::resolve(None, None, None);
        assert_eq!(settings.level, "warn");
        assert_eq!(settings.format, LogFormat::Json);
        assert!(!settings.enabled);
    }

    #[test]
    fn test_debug_flag() {
        let settings = LogSettings::resolve(Some("YES"), None, Some("compact"));
        assert_eq!(settings.level, "debug");
        assert_eq!(settings.format, LogFormat::Compact);
        assert!(settings.enabled);
    }

    #[test]
    fn test_explicit_level_wins() {
        let settings = LogSettings::resolve(Some("true"), Some("TRACE"), None);
        assert_eq!(settings.level, "trace");

        let settings = LogSettings::resolve(None, Some("loud"), None);
        assert_eq!(settings.level, "warn");
        assert!(settings.enabled);
    }
}
