//! Request DTOs for the cache HTTP binding
//!
//! Defines the structure of incoming request bodies and query strings.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::engine::GetOptions;

/// Request body for `PUT /keys/:key`
///
/// # Fields
/// - `value`: Any JSON value
/// - `ttl_ms`: Optional TTL in milliseconds (engine default if not specified)
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The value to store
    pub value: Value,
    /// Optional TTL in milliseconds
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.ttl_ms == Some(0) {
            return Some("ttl_ms must be greater than zero".to_string());
        }
        None
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

/// Query string for `GET /keys/:key`
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct GetQuery {
    #[serde(default)]
    pub extend: bool,
    /// Serve stale while revalidating
    #[serde(default)]
    pub stale: bool,
}

impl From<GetQuery> for GetOptions {
    fn from(query: GetQuery) -> Self {
        GetOptions {
            extend: query.extend,
            stale_while_revalidate: query.stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_request_deserialize() {
        let req: SetRequest = serde_json::from_str(r#"{"value": {"name": "ada"}}"#).unwrap();
        assert_eq!(req.value, json!({"name": "ada"}));
        assert!(req.ttl_ms.is_none());
        assert!(req.ttl().is_none());
    }

    #[test]
    fn test_set_request_with_ttl() {
        let req: SetRequest = serde_json::from_str(r#"{"value": 1, "ttl_ms": 1500}"#).unwrap();
        assert_eq!(req.ttl(), Some(Duration::from_millis(1500)));
        assert!(req.validate().is_none());
    }

    #[test]
    fn test_validate_zero_ttl() {
        let req = SetRequest {
            value: json!("x"),
            ttl_ms: Some(0),
        };
        assert!(req.validate().is_some());
    }

    #[test]
    fn test_get_query_maps_to_options() {
        let query = GetQuery {
            extend: true,
            stale: false,
        };
        let options = GetOptions::from(query);
        assert!(options.extend);
        assert!(!options.stale_while_revalidate);
    }
}
