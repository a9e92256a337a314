//! Log Service Configuration
//!
//! Defines the configuration for the log server and the stream reader:
//! - Public host URL used to render log URLs
//! - Live resolution timeout and retry interval
//! - Backoff policy of the client-side reader
//!
//! Values come from defaults, a TOML file, or `HEADLESS_LOG_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default bound on live resolution before falling back to the archive (30s)
pub const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 30;

/// Default fixed interval between harness retries (2s)
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 2000;

/// Default lifetime of a retired-instance entry (1 hour)
pub const DEFAULT_RETIRED_TTL_SECS: u64 = 3600;

/// Default reader backoff: 1s initial, x1.2 per retry, 5s cap
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.2;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Server-side configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogServiceConfig {
    /// Public base URL of this server, used in rendered log URLs
    pub host_url: String,
    pub listen_host: String,
    pub listen_port: u16,
    /// Bound on live resolution before falling back to the archive
    pub resolve_timeout_secs: u64,
    /// Fixed sleep between retries of a supervisor operation
    pub retry_interval_ms: u64,
    /// How long an instance stays on the archived path without a store lookup
    pub retired_ttl_secs: u64,
    /// SQLite database holding instance records
    pub database_path: String,
    /// Base URL of the archived log store
    pub content_service_url: String,
    /// Timeout for non-streaming supervisor requests
    pub supervisor_request_timeout_secs: u64,
}

impl Default for LogServiceConfig {
    fn default() -> Self {
        Self {
            host_url: "http://localhost:8080".to_string(),
            listen_host: "0.0.0.0".to_string(),
            listen_port: 8080,
            resolve_timeout_secs: DEFAULT_RESOLVE_TIMEOUT_SECS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            retired_ttl_secs: DEFAULT_RETIRED_TTL_SECS,
            database_path: "/data/instances.db".to_string(),
            content_service_url: "http://content-service:8080".to_string(),
            supervisor_request_timeout_secs: 10,
        }
    }
}

impl LogServiceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host_url: std::env::var("HEADLESS_LOG_HOST_URL").unwrap_or(defaults.host_url),
            listen_host: std::env::var("HEADLESS_LOG_LISTEN_HOST")
                .unwrap_or(defaults.listen_host),
            listen_port: env_or("HEADLESS_LOG_LISTEN_PORT", defaults.listen_port),
            resolve_timeout_secs: env_or(
                "HEADLESS_LOG_RESOLVE_TIMEOUT_SECS",
                defaults.resolve_timeout_secs,
            ),
            retry_interval_ms: env_or("HEADLESS_LOG_RETRY_INTERVAL_MS", defaults.retry_interval_ms),
            retired_ttl_secs: env_or("HEADLESS_LOG_RETIRED_TTL_SECS", defaults.retired_ttl_secs),
            database_path: std::env::var("HEADLESS_LOG_DATABASE")
                .unwrap_or(defaults.database_path),
            content_service_url: std::env::var("HEADLESS_LOG_CONTENT_SERVICE_URL")
                .unwrap_or(defaults.content_service_url),
            supervisor_request_timeout_secs: env_or(
                "HEADLESS_LOG_SUPERVISOR_TIMEOUT_SECS",
                defaults.supervisor_request_timeout_secs,
            ),
        }
    }

    /// Load from a TOML file; missing keys take their defaults
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn retired_ttl(&self) -> Duration {
        Duration::from_secs(self.retired_ttl_secs)
    }

    pub fn host_url(&self) -> &str {
        self.host_url.trim_end_matches('/')
    }
}

/// Client-side reader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            connect_timeout_secs: 10,
        }
    }
}

impl ReaderConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            initial_delay_ms: env_or("HEADLESS_LOG_INITIAL_DELAY_MS", defaults.initial_delay_ms),
            backoff_factor: env_or("HEADLESS_LOG_BACKOFF_FACTOR", defaults.backoff_factor),
            max_delay_ms: env_or("HEADLESS_LOG_MAX_DELAY_MS", defaults.max_delay_ms),
            connect_timeout_secs: env_or(
                "HEADLESS_LOG_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            ),
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LogServiceConfig::default();
        assert_eq!(config.resolve_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry_interval(), Duration::from_secs(2));

        let reader = ReaderConfig::default();
        assert_eq!(reader.initial_delay(), Duration::from_secs(1));
        assert_eq!(reader.max_delay(), Duration::from_secs(5));
        assert!((reader.backoff_factor - 1.2).abs() < f64::EPSILON);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("HEADLESS_LOG_RESOLVE_TIMEOUT_SECS", "5");
        std::env::set_var("HEADLESS_LOG_HOST_URL", "https://logs.example.com/");
        std::env::set_var("HEADLESS_LOG_MAX_DELAY_MS", "not-a-number");

        let config = LogServiceConfig::from_env();
        assert_eq!(config.resolve_timeout_secs, 5);
        assert_eq!(config.host_url(), "https://logs.example.com");

        let reader = ReaderConfig::from_env();
        assert_eq!(reader.max_delay_ms, DEFAULT_MAX_DELAY_MS);

        std::env::remove_var("HEADLESS_LOG_RESOLVE_TIMEOUT_SECS");
        std::env::remove_var("HEADLESS_LOG_HOST_URL");
        std::env::remove_var("HEADLESS_LOG_MAX_DELAY_MS");
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host_url = \"https://gitpod.example\"").unwrap();
        writeln!(file, "retry_interval_ms = 500").unwrap();

        let config = LogServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.host_url, "https://gitpod.example");
        assert_eq!(config.retry_interval(), Duration::from_millis(500));
        assert_eq!(config.resolve_timeout_secs, DEFAULT_RESOLVE_TIMEOUT_SECS);
    }
}
