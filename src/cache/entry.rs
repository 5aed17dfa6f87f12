//! Cache Entry Module
//!
//! Defines the structure for individual cache entries and the refresher
//! descriptor bound to them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use serde_json::Value;

// == Refresher ==
/// Async producer of a fresh value for a key. Receives the key it refreshes.
pub type RefreshFn = Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Refresher descriptor passed to `set`.
///
/// Only `Identified` refreshers can be rebound after a reload or on a peer
/// instance, because functions themselves are never serialized.
#[derive(Clone)]
pub enum Refresher {
    Anonymous(RefreshFn),
    Identified { id: String, func: RefreshFn },
}

impl Refresher {
    /// Wraps an async closure as an anonymous refresher.
    pub fn anonymous<F, Fut>(f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Refresher::Anonymous(into_refresh_fn(f))
    }

    /// Wraps an async closure as a refresher registered under `id`.
    pub fn identified<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Refresher::Identified {
            id: id.into(),
            func: into_refresh_fn(f),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Refresher::Anonymous(_) => None,
            Refresher::Identified { id, .. } => Some(id.as_str()),
        }
    }

    pub fn func(&self) -> &RefreshFn {
        match self {
            Refresher::Anonymous(func) | Refresher::Identified { func, .. } => func,
        }
    }

    /// Rebuilds a descriptor from an entry's local binding.
    pub(crate) fn from_parts(func: Option<RefreshFn>, id: Option<String>) -> Option<Self> {
        match (func, id) {
            (Some(func), Some(id)) => Some(Refresher::Identified { id, func }),
            (Some(func), None) => Some(Refresher::Anonymous(func)),
            (None, _) => None,
        }
    }
}

impl fmt::Debug for Refresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refresher::Anonymous(_) => f.write_str("Refresher::Anonymous"),
            Refresher::Identified { id, .. } => write!(f, "Refresher::Identified({id})"),
        }
    }
}

/// Boxes an async closure into a [`RefreshFn`].
pub fn into_refresh_fn<F, Fut>(f: F) -> RefreshFn
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |key: String| Box::pin(f(key)) as BoxFuture<'static, anyhow::Result<Value>>)
}

// == Cache Entry ==
/// Represents a single cache entry with value, expiry and refresh binding.
#[derive(Clone)]
pub struct CacheEntry {
    pub key: String,
    /// The stored value
    pub value: Value,
    /// Expiration timestamp (Unix milliseconds); fresh while now < expiry
    pub expiry: u64,
    /// Duration used to recompute `expiry` on renewal
    pub ttl: Duration,
    /// Local-only producer, never serialized
    pub refresher: Option<RefreshFn>,
    /// Stable id of the producer, used for rebinding
    pub refresher_id: Option<String>,
    /// Fencing token, assigned by the entry table
    pub generation: u64,
    /// Approximate serialized size of `value` in bytes
    pub size: usize,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry expiring `ttl` from now.
    pub fn new(key: impl Into<String>, value: Value, ttl: Duration) -> Self {
        let expiry = current_timestamp_ms().saturating_add(duration_ms(ttl));
        Self::with_expiry(key, value, ttl, expiry)
    }

    /// Creates an entry with an explicit absolute expiry (store load, remote sync).
    pub fn with_expiry(key: impl Into<String>, value: Value, ttl: Duration, expiry: u64) -> Self {
        let size = approximate_size(&value);
        Self {
            key: key.into(),
            value,
            expiry,
            ttl,
            refresher: None,
            refresher_id: None,
            generation: 0,
            size,
        }
    }

    /// Attaches a refresher descriptor.
    pub fn bind(mut self, refresher: Option<Refresher>) -> Self {
        match refresher {
            Some(Refresher::Anonymous(func)) => {
                self.refresher = Some(func);
                self.refresher_id = None;
            }
            Some(Refresher::Identified { id, func }) => {
                self.refresher = Some(func);
                self.refresher_id = Some(id);
            }
            None => {
                self.refresher = None;
                self.refresher_id = None;
            }
        }
        self
    }

    // == Is Expired ==
    /// An entry is expired once the current time reaches its expiry.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expiry
    }

    /// Resets the expiry to `now + ttl`.
    pub fn extend(&mut self) {
        self.expiry = current_timestamp_ms().saturating_add(duration_ms(self.ttl));
    }

    /// Remaining lifetime in milliseconds, 0 once expired.
    pub fn ttl_remaining_ms(&self) -> u64 {
        self.expiry.saturating_sub(current_timestamp_ms())
    }

    /// Absolute time at which a background refresh should run.
    pub fn refresh_at(&self, margin: f64) -> u64 {
        let lead = (duration_ms(self.ttl) as f64 * margin) as u64;
        self.expiry.saturating_sub(lead)
    }

    /// Returns the refresher descriptor currently bound, if any.
    pub fn refresher_descriptor(&self) -> Option<Refresher> {
        Refresher::from_parts(self.refresher.clone(), self.refresher_id.clone())
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("expiry", &self.expiry)
            .field("ttl", &self.ttl)
            .field("refresher_bound", &self.refresher.is_some())
            .field("refresher_id", &self.refresher_id)
            .field("generation", &self.generation)
            .finish()
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Approximate size of a value as its compact JSON encoding.
pub fn approximate_size(value: &Value) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}
