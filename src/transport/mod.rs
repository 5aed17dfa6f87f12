//! Broadcast Transport
//!
//! Fire-and-forget delivery of [`SyncMessage`]s to sibling instances of the
//! same logical cache. [`LocalBus`] connects engines living in one process.

mod local;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{duration_ms, CacheEntry};
use crate::error::TransportError;

pub use local::{BusEndpoint, LocalBus};

// == Wire Types ==
/// Replicated part of an entry. No refresher function, no generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEntry {
    pub value: Value,
    pub expiry: u64,
    /// TTL in milliseconds
    pub ttl: u64,
    #[serde(default)]
    pub refresher_id: Option<String>,
}

impl SyncEntry {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl)
    }

    /// Structural equality against a local entry.
    pub fn matches(&self, entry: &CacheEntry) -> bool {
        self.value == entry.value
            && self.expiry == entry.expiry
            && self.ttl == duration_ms(entry.ttl)
            && self.refresher_id == entry.refresher_id
    }
}

impl From<&CacheEntry> for SyncEntry {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            value: entry.value.clone(),
            expiry: entry.expiry,
            ttl: duration_ms(entry.ttl),
            refresher_id: entry.refresher_id.clone(),
        }
    }
}

/// `{ key, entry | null }`; a `None` entry announces a deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub key: String,
    pub entry: Option<SyncEntry>,
}

impl SyncMessage {
    pub fn upsert(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            entry: Some(SyncEntry::from(entry)),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            entry: None,
        }
    }
}

/// Callback invoked for every inbound message.
pub type MessageHandler = Arc<dyn Fn(SyncMessage) + Send + Sync>;

// == Transport Trait ==
/// At-most-once, unordered, best-effort delivery to sibling instances.
///
/// Implementations must not deliver a message back to the instance that sent it.
#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    async fn send(&self, message: SyncMessage) -> Result<(), TransportError>;

    /// Registers the inbound callback. Called once, at engine construction.
    fn on_message(&self, handler: MessageHandler);

    /// Stops inbound delivery; later sends fail with [`TransportError::Closed`].
    /// Called once the engine's outbound queue has drained after destroy.
    fn close(&self) {}
}
