//! Node configuration from environment variables with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use snafu::Snafu;

/// Configuration errors.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// An environment variable holds an unusable value.
    #[snafu(display("invalid value for {key}: {value:?} ({reason})"))]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Node configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address.
    pub http_addr: String,
    /// Directory holding the node's database.
    pub data_dir: PathBuf,
    /// Maximum accepted blob size in bytes.
    pub max_blob_size: usize,
    /// Replicas per pinned blob.
    pub replicas: usize,
    /// Per-peer placement capacity in blobs.
    pub peer_capacity: u64,
    /// Crawler tick period.
    pub crawl_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            http_addr: "127.0.0.1:6860".to_string(),
            data_dir: PathBuf::from("./data"),
            max_blob_size: hoard_blobs::MAX_BLOB_SIZE,
            replicas: 2,
            peer_capacity: 1_000,
            crawl_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Loads configuration from `HOARD_*` environment variables, falling
    /// back to defaults for unset keys.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        Ok(Config {
            http_addr: std::env::var("HOARD_HTTP_ADDR").unwrap_or(defaults.http_addr),
            data_dir: std::env::var("HOARD_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            max_blob_size: parse_env("HOARD_MAX_BLOB_SIZE", defaults.max_blob_size)?,
            replicas: parse_env("HOARD_REPLICAS", defaults.replicas)?,
            peer_capacity: parse_env("HOARD_PEER_CAPACITY", defaults.peer_capacity)?,
            crawl_interval: Duration::from_secs(parse_env(
                "HOARD_CRAWL_INTERVAL_SECS",
                defaults.crawl_interval.as_secs(),
            )?),
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.max_blob_size, 1 << 16);
        assert_eq!(config.replicas, 2);
        assert_eq!(config.peer_capacity, 1_000);
    }
}
