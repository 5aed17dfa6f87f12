//! Persistence Writer Task
//!
//! Applies store writes in the order the engine committed them. The engine
//! only enqueues; it never waits for the store.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::persist::{PersistentStore, StoredRecord};

/// A queued store write.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Put(StoredRecord),
    Delete(String),
    Clear,
}

/// Callback receiving every store failure.
pub(crate) type FailureHook = Arc<dyn Fn(CacheError) + Send + Sync>;

/// Spawns the writer; it exits once every sender is dropped and the queue is drained.
pub(crate) fn spawn_persist_task(
    store: Arc<dyn PersistentStore>,
    mut queue: mpsc::UnboundedReceiver<StoreOp>,
    on_failure: FailureHook,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(op) = queue.recv().await {
            let result = match &op {
                StoreOp::Put(record) => store.set(record.clone()).await,
                StoreOp::Delete(key) => store.delete(key).await,
                StoreOp::Clear => store.clear().await,
            };

            if let Err(err) = result {
                warn!(op = ?op, error = %err, "store write failed, continuing memory-only");
                on_failure(err.into());
            }
        }
        debug!("persist queue closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStore;
    use serde_json::json;
    use std::sync::Mutex;

    fn record(key: &str, value: i64) -> StoredRecord {
        StoredRecord {
            key: key.to_string(),
            value: json!(value),
            expiry: u64::MAX,
            ttl: 1_000,
            refresher_id: None,
        }
    }

    #[tokio::test]
    async fn test_ops_applied_in_order() {
        let store = MemoryStore::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_persist_task(Arc::new(store.clone()), rx, Arc::new(|_| {}));

        tx.send(StoreOp::Put(record("a", 1))).unwrap();
        tx.send(StoreOp::Put(record("a", 2))).unwrap();
        tx.send(StoreOp::Put(record("b", 3))).unwrap();
        tx.send(StoreOp::Delete("b".into())).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(store.get_all().await.unwrap(), vec![record("a", 2)]);
    }

    #[tokio::test]
    async fn test_failures_reported_and_queue_continues() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_persist_task(
            Arc::new(store.clone()),
            rx,
            Arc::new(move |err: CacheError| sink.lock().unwrap().push(err)),
        );

        tx.send(StoreOp::Put(record("a", 1))).unwrap();
        tx.send(StoreOp::Clear).unwrap();
        drop(tx);
        handle.await.unwrap();

        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 2);
        assert!(matches!(failures[0], CacheError::StoreFailure(_)));
    }
}
