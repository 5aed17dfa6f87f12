//! In-memory store, shareable between engines of the same namespace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{PersistentStore, StoredRecord};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Shared {
    records: RwLock<HashMap<String, StoredRecord>>,
    writes: AtomicU64,
    offline: AtomicBool,
}

/// HashMap-backed store. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set`/`delete`/`clear` calls so far.
    pub fn write_count(&self) -> u64 {
        self.shared.writes.load(Ordering::SeqCst)
    }

    /// Makes every call fail until switched back on.
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    fn record_write(&self) {
        self.shared.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredRecord>, StoreError> {
        self.check()?;
        Ok(self.shared.records.read().await.get(key).cloned())
    }

    async fn set(&self, record: StoredRecord) -> Result<(), StoreError> {
        self.check()?;
        self.shared
            .records
            .write()
            .await
            .insert(record.key.clone(), record);
        self.record_write();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.shared.records.write().await.remove(key);
        self.record_write();
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.check()?;
        self.shared.records.write().await.clear();
        self.record_write();
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
        self.check()?;
        Ok(self.shared.records.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(key: &str) -> StoredRecord {
        StoredRecord {
            key: key.to_string(),
            value: json!(key),
            expiry: 1,
            ttl: 1,
            refresher_id: None,
        }
    }

    #[tokio::test]
    async fn test_crud_and_shared_clones() {
        let store = MemoryStore::new();
        let other = store.clone();

        store.set(record("a")).await.unwrap();
        store.set(record("b")).await.unwrap();
        assert_eq!(other.get("a").await.unwrap(), Some(record("a")));

        other.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get_all().await.unwrap().len(), 1);

        store.clear().await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
        assert_eq!(store.write_count(), 4);
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.set(record("a")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.write_count(), 0);

        store.set_offline(false);
        assert!(store.set(record("a")).await.is_ok());
    }
}
