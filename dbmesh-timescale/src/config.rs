//! TimescaleDB settings read from a connection's extra options.
//!
//! | Option                | Default   | Effect                                  |
//! |-----------------------|-----------|-----------------------------------------|
//! | `use_timescaledb`     | `true`    | `false` skips the extension probe       |
//! | `chunk_time_interval` | `7 days`  | chunk width for new hypertables         |
//! | `retention_duration`  | `90 days` | setting it enables the retention policy |
//! | `compression_after`   | `30 days` | setting it enables compression          |
//! | `segment_by`          | none      | compression segment-by columns          |
//! | `order_by`            | none      | compression order-by columns            |

use dbmesh_core::{ConnectionConfig, DbResult, Dialect, Interval};

/// Default chunk width for new hypertables.
pub const DEFAULT_CHUNK_TIME_INTERVAL: &str = "7 days";
/// Default age after which chunks are dropped.
pub const DEFAULT_RETENTION: &str = "90 days";
/// Default age after which chunks are compressed.
pub const DEFAULT_COMPRESSION_AFTER: &str = "30 days";

/// Retention settings applied by [`TimescaleDb::apply_config`](crate::TimescaleDb::apply_config).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Whether a retention policy is applied.
    pub enabled: bool,
    /// Age after which chunks are dropped.
    pub drop_after: Interval,
}

/// Compression settings applied by [`TimescaleDb::apply_config`](crate::TimescaleDb::apply_config).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Whether compression and its policy are applied.
    pub enabled: bool,
    /// Age after which chunks are compressed.
    pub after: Interval,
    /// Segment-by column list.
    pub segment_by: Option<String>,
    /// Order-by column list.
    pub order_by: Option<String>,
}

/// Extension settings for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimescaleConfig {
    /// Whether the extension should be probed for at all.
    pub enabled: bool,
    /// Chunk width used when creating hypertables.
    pub chunk_time_interval: Interval,
    /// Retention policy.
    pub retention: RetentionConfig,
    /// Compression policy.
    pub compression: CompressionConfig,
}

impl TimescaleConfig {
    /// Read the extension settings from a connection config.
    ///
    /// MySQL connections are always disabled. Interval options are validated
    /// here so a bad value fails before anything is connected.
    pub fn from_connection_config(config: &ConnectionConfig) -> DbResult<Self> {
        let options = &config.options;
        let interval = |key: &str, default: &str| {
            Interval::parse(key, options.get(key).map_or(default, String::as_str))
        };

        Ok(Self {
            enabled: config.dialect == Dialect::Postgres
                && config.option_flag("use_timescaledb").unwrap_or(true),
            chunk_time_interval: interval("chunk_time_interval", DEFAULT_CHUNK_TIME_INTERVAL)?,
            retention: RetentionConfig {
                enabled: options.contains_key("retention_duration"),
                drop_after: interval("retention_duration", DEFAULT_RETENTION)?,
            },
            compression: CompressionConfig {
                enabled: options.contains_key("compression_after"),
                after: interval("compression_after", DEFAULT_COMPRESSION_AFTER)?,
                segment_by: non_empty(options.get("segment_by")),
                order_by: non_empty(options.get("order_by")),
            },
        })
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
