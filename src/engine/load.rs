//! Initial load from the persistent store.
//!
//! Runs once per engine. Local writes and removes made while it runs win
//! over loaded records; a `clear` during the load discards all of them.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{EngineState, Inner};
use crate::cache::{current_timestamp_ms, duration_ms, validate_key};
use crate::error::CacheError;
use crate::persist::StoredRecord;
use crate::tasks::StoreOp;

impl Inner {
    pub(super) async fn load_from_store(self: Arc<Self>) {
        let changed = match self.store.get_all().await {
            Ok(records) => self.apply_loaded(records),
            Err(err) => {
                warn!(namespace = %self.config.namespace, error = %err, "initial load failed");
                let err = CacheError::from(err);
                self.state().stats.record_store_failure();
                self.report(&err);
                Vec::new()
            }
        };

        {
            let mut state = self.state();
            state.loading = false;
            state.load_skips.clear();
            state.load_discard = false;
        }

        self.notify(&changed);
        self.ready.send_replace(true);
    }

    fn apply_loaded(self: &Arc<Self>, records: Vec<StoredRecord>) -> Vec<String> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Vec::new();
        }

        let mut state = self.state();
        if state.load_discard {
            debug!(discarded = records.len(), "cleared during load; loaded records dropped");
            return Vec::new();
        }

        let now = current_timestamp_ms();
        let retention = duration_ms(self.config.gc_retention);
        let mut loaded = Vec::with_capacity(records.len());
        let mut dropped = 0usize;

        for record in records {
            if state.load_skips.contains(&record.key) {
                continue;
            }
            if let Err(err) = validate_key(&record.key) {
                warn!(key = %record.key, error = %err, "skipping stored record with invalid key");
                continue;
            }
            if record.expiry.saturating_add(retention) <= now {
                state.persist(StoreOp::Delete(record.key));
                dropped += 1;
                continue;
            }
            loaded.push(self.install_locked(&mut state, record));
        }

        let mut changed = self.evict_locked(&mut state, None);
        // Evicted keys are already gone from the table; subscribers see both sets.
        changed.extend(loaded.iter().cloned());

        self.ensure_gc(&mut state);
        state.refresh_totals();
        info!(
            namespace = %self.config.namespace,
            loaded = loaded.len(),
            dropped,
            "initial load complete"
        );
        changed
    }

    /// Inserts a loaded record, rebinding its refresher from the fetcher registry.
    fn install_locked(self: &Arc<Self>, state: &mut EngineState, record: StoredRecord) -> String {
        let mut entry = record.into_entry();
        entry.refresher = entry
            .refresher_id
            .as_ref()
            .and_then(|id| state.fetchers.get(id).cloned());

        let key = entry.key.clone();
        state.table.insert(entry);
        self.schedule_refresh(state, &key);
        key
    }
}
