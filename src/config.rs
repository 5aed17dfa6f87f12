//! Configuration Module
//!
//! Handles loading engine and server configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Fraction of the ttl left on the clock when a background refresh fires.
pub const DEFAULT_REFRESH_MARGIN: f64 = 0.1;

/// Engine and server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Logical cache name; instances sharing a namespace share store and bus
    pub namespace: String,
    /// TTL applied when `set` is called without one
    pub default_ttl: Duration,
    /// Refresh fires at `expiry - ttl * refresh_margin`
    pub refresh_margin: f64,
    /// Count bound for eviction, None = unbounded
    pub max_entries: Option<usize>,
    /// Approximate byte bound for eviction, None = unbounded
    pub max_bytes: Option<usize>,
    /// Interval between garbage collection sweeps
    pub gc_interval: Duration,
    /// How long an expired entry is retained before GC removes it
    pub gc_retention: Duration,
    /// HTTP server port
    pub server_port: u16,
    /// Directory holding the JSON file store
    pub data_dir: PathBuf,
}

impl CacheConfig {
    /// Creates a new config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_NAMESPACE` - Namespace (default: "default")
    /// - `DEFAULT_TTL_MS` - Default TTL in milliseconds (default: 300000)
    /// - `REFRESH_MARGIN` - Refresh margin in (0, 1) (default: 0.1)
    /// - `MAX_ENTRIES` - Maximum cache entries (default: unbounded)
    /// - `MAX_BYTES` - Maximum approximate value bytes (default: unbounded)
    /// - `GC_INTERVAL_MS` - GC sweep interval (default: 1000)
    /// - `GC_RETENTION_MS` - Retention after expiry before GC (default: 0)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CACHE_DATA_DIR` - File store directory (default: ./data)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let refresh_margin = parse_var("REFRESH_MARGIN")
            .filter(|m: &f64| *m > 0.0 && *m < 1.0)
            .unwrap_or(defaults.refresh_margin);

        Self {
            namespace: env::var("CACHE_NAMESPACE")
                .ok()
                .filter(|ns| !ns.trim().is_empty())
                .unwrap_or(defaults.namespace),
            default_ttl: parse_var("DEFAULT_TTL_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_ttl),
            refresh_margin,
            max_entries: parse_var("MAX_ENTRIES").or(defaults.max_entries),
            max_bytes: parse_var("MAX_BYTES").or(defaults.max_bytes),
            gc_interval: parse_var("GC_INTERVAL_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.gc_interval),
            gc_retention: parse_var("GC_RETENTION_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.gc_retention),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            data_dir: env::var("CACHE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        }
    }

    /// Returns a copy of this config under another namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            default_ttl: Duration::from_secs(300),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            max_entries: None,
            max_bytes: None,
            gc_interval: Duration::from_secs(1),
            gc_retention: Duration::ZERO,
            server_port: 3000,
            data_dir: PathBuf::from("./data"),
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
