//! JSON document store: one file per namespace holding every record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{PersistentStore, StoredRecord};
use crate::error::StoreError;

/// Keeps records in memory and rewrites `<dir>/<namespace>.json` on every change.
///
/// The file is loaded lazily on first access. The rewrite goes through a
/// temporary file and a rename, so a crash never leaves a torn document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<Option<HashMap<String, StoredRecord>>>,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{namespace}.json")),
            records: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<HashMap<String, StoredRecord>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let records: Vec<StoredRecord> = serde_json::from_slice(&bytes)?;
                debug!(path = %self.path.display(), count = records.len(), "loaded store file");
                Ok(records.into_iter().map(|r| (r.key.clone(), r)).collect())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_file(&self, records: &HashMap<String, StoredRecord>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut sorted: Vec<&StoredRecord> = records.values().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));
        let bytes = serde_json::to_vec_pretty(&sorted)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Runs `f` against the loaded records, persisting if it reports a change.
    async fn update<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut HashMap<String, StoredRecord>) -> bool,
    {
        let mut guard = self.records.lock().await;
        if guard.is_none() {
            *guard = Some(self.read_file().await?);
        }
        if let Some(records) = guard.as_mut() {
            if f(records) {
                self.write_file(records).await?;
            }
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<HashMap<String, StoredRecord>, StoreError> {
        let mut guard = self.records.lock().await;
        if guard.is_none() {
            *guard = Some(self.read_file().await?);
        }
        Ok(guard.clone().unwrap_or_default())
    }
}

#[async_trait]
impl PersistentStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self.snapshot().await?.remove(key))
    }

    async fn set(&self, record: StoredRecord) -> Result<(), StoreError> {
        self.update(|records| {
            records.insert(record.key.clone(), record);
            true
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.update(|records| records.remove(key).is_some()).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.update(|records| {
            records.clear();
            true
        })
        .await
    }

    async fn get_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(self.snapshot().await?.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "reactive_cache_{}_{}_{}",
            name,
            std::process::id(),
            crate::cache::current_timestamp_ms()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn record(key: &str, value: serde_json::Value) -> StoredRecord {
        StoredRecord {
            key: key.to_string(),
            value,
            expiry: 10,
            ttl: 10,
            refresher_id: Some("fetch".into()),
        }
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = temp_dir("reopen");
        let store = JsonFileStore::new(&dir, "ns");
        store.set(record("x", json!(1))).await.unwrap();
        store.set(record("y", json!(2))).await.unwrap();
        store.delete("x").await.unwrap();

        let reopened = JsonFileStore::new(&dir, "ns");
        let all = reopened.get_all().await.unwrap();
        assert_eq!(all, vec![record("y", json!(2))]);
        assert_eq!(reopened.get("x").await.unwrap(), None);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = temp_dir("missing");
        let store = JsonFileStore::new(&dir, "ns");
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_reports_serialization_error() {
        let dir = temp_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("ns.json"), b"not json").unwrap();

        let store = JsonFileStore::new(&dir, "ns");
        assert!(matches!(
            store.get_all().await,
            Err(StoreError::Serialization(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
