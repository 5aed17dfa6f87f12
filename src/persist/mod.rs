//! Persistent Store Adapters
//!
//! The engine consumes a [`PersistentStore`]; the byte-level format is owned
//! by each adapter. Two adapters ship with the crate: an in-memory map that
//! several engines can share, and a JSON document on disk.

mod file;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{duration_ms, CacheEntry};
use crate::error::StoreError;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

// == Stored Record ==
/// Serializable form of an entry. Refresher functions and generations are
/// process-local and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: String,
    pub value: Value,
    /// Absolute expiry, Unix milliseconds
    pub expiry: u64,
    /// TTL in milliseconds
    pub ttl: u64,
    #[serde(default)]
    pub refresher_id: Option<String>,
}

impl StoredRecord {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl)
    }

    /// Builds an unbound entry from this record.
    pub fn into_entry(self) -> CacheEntry {
        let ttl = self.ttl();
        let mut entry = CacheEntry::with_expiry(self.key, self.value, ttl, self.expiry);
        entry.refresher_id = self.refresher_id;
        entry
    }
}

impl From<&CacheEntry> for StoredRecord {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            value: entry.value.clone(),
            expiry: entry.expiry,
            ttl: duration_ms(entry.ttl),
            refresher_id: entry.refresher_id.clone(),
        }
    }
}

// == Store Trait ==
/// Async key/value record storage.
///
/// Every call may fail; the engine treats failures as lost durability and
/// keeps serving from memory.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredRecord>, StoreError>;

    async fn set(&self, record: StoredRecord) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;

    async fn get_all(&self) -> Result<Vec<StoredRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_entry_drops_local_state() {
        let mut entry = CacheEntry::with_expiry("k", json!({"a": 1}), Duration::from_secs(2), 5_000);
        entry.refresher_id = Some("fetch-k".into());
        entry.generation = 99;

        let record = StoredRecord::from(&entry);
        assert_eq!(record.ttl, 2_000);
        assert_eq!(record.expiry, 5_000);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("generation").is_none());
        assert_eq!(json["refresher_id"], json!("fetch-k"));

        let back = record.into_entry();
        assert_eq!(back.generation, 0);
        assert!(back.refresher.is_none());
        assert_eq!(back.refresher_id.as_deref(), Some("fetch-k"));
    }

    #[test]
    fn test_record_without_refresher_id_deserializes() {
        let record: StoredRecord =
            serde_json::from_str(r#"{"key":"k","value":1,"expiry":10,"ttl":5}"#).unwrap();
        assert_eq!(record.refresher_id, None);
    }
}
