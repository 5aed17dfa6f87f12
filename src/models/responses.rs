//! Response DTOs for the cache HTTP binding
//!
//! Defines the structure of outgoing response bodies.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::cache::CacheStats;
use crate::engine::RefreshOutcome;

/// Response body for `GET /keys/:key`
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub key: String,
    pub value: Value,
}

impl GetResponse {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Response body for `PUT /keys/:key`
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    pub key: String,
}

impl SetResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for `DELETE /keys/:key`
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    pub key: String,
    /// Whether an entry was present
    pub existed: bool,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>, existed: bool) -> Self {
        let key = key.into();
        let message = if existed {
            format!("Key '{}' deleted successfully", key)
        } else {
            format!("Key '{}' was not present", key)
        };
        Self {
            message,
            key,
            existed,
        }
    }
}

/// Response body for `GET /keys`
#[derive(Debug, Clone, Serialize)]
pub struct KeysResponse {
    pub keys: Vec<String>,
    pub count: usize,
}

impl KeysResponse {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            count: keys.len(),
            keys,
        }
    }
}

/// Response body for `DELETE /keys`
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
    /// Entries present before the clear
    pub removed: usize,
}

impl ClearResponse {
    pub fn new(removed: usize) -> Self {
        Self {
            message: format!("Cleared {} entries", removed),
            removed,
        }
    }
}

/// Response body for `GET /snapshot`
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotResponse {
    pub entries: HashMap<String, Value>,
    pub count: usize,
}

impl SnapshotResponse {
    pub fn new(entries: HashMap<String, Value>) -> Self {
        Self {
            count: entries.len(),
            entries,
        }
    }
}

/// Response body for `POST /keys/:key/refresh`
#[derive(Debug, Clone, Serialize)]
pub struct RefreshResponse {
    pub key: String,
    /// One of `refreshed`, `in_flight`, `superseded`, `missing`, `no_refresher`, `failed`
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RefreshResponse {
    pub fn new(key: impl Into<String>, outcome: RefreshOutcome) -> Self {
        let (outcome, error) = match outcome {
            RefreshOutcome::Refreshed => ("refreshed", None),
            RefreshOutcome::InFlight => ("in_flight", None),
            RefreshOutcome::Superseded => ("superseded", None),
            RefreshOutcome::Missing => ("missing", None),
            RefreshOutcome::NoRefresher => ("no_refresher", None),
            RefreshOutcome::Failed(message) => ("failed", Some(message)),
        };
        Self {
            key: key.into(),
            outcome: outcome.to_string(),
            error,
        }
    }
}

/// Response body for `GET /stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl From<CacheStats> for StatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            stats,
        }
    }
}

/// Response body for `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `healthy`, or `destroyed` once the engine is torn down
    pub status: String,
    pub namespace: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn new(namespace: impl Into<String>, destroyed: bool) -> Self {
        let status = if destroyed { "destroyed" } else { "healthy" };
        Self {
            status: status.to_string(),
            namespace: namespace.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
