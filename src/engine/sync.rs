//! Sync Protocol
//!
//! Inbound reconciliation of messages from sibling instances. Outbound
//! messages are queued by the local write and delete paths.
//!
//! Inbound changes only touch memory and subscribers: the sender already
//! persisted them, and re-broadcasting would echo forever.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

use super::Inner;
use crate::cache::{validate_key, CacheEntry};
use crate::transport::{BroadcastTransport, SyncMessage};

impl Inner {
    /// Registers the inbound handler. Holds only a weak reference to the engine.
    pub(super) fn attach_transport(self: &Arc<Self>, transport: &dyn BroadcastTransport) {
        let engine = Arc::downgrade(self);
        transport.on_message(Arc::new(move |message: SyncMessage| {
            if let Some(inner) = engine.upgrade() {
                inner.apply_remote(message);
            }
        }));
    }

    /// Reconciles one sibling message into the local table.
    pub(crate) fn apply_remote(self: &Arc<Self>, message: SyncMessage) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(err) = validate_key(&message.key) {
            warn!(key = %message.key, error = %err, "ignoring sync message with invalid key");
            return;
        }

        let key = message.key;
        let changed = {
            let mut state = self.state();
            match message.entry {
                None => {
                    if state.detach(&key).is_none() {
                        return;
                    }
                    self.stop_gc_if_empty(&mut state);
                    debug!(key = %key, "removed by sibling");
                }
                Some(remote) => {
                    if state
                        .table
                        .get(&key)
                        .is_some_and(|local| remote.matches(local))
                    {
                        return;
                    }

                    state.cancel_timer(&key);
                    state.note_local_write(&key);

                    let func = remote
                        .refresher_id
                        .as_ref()
                        .and_then(|id| state.fetchers.get(id).cloned());
                    let ttl = remote.ttl();
                    let mut entry = CacheEntry::with_expiry(key.as_str(), remote.value, ttl, remote.expiry);
                    entry.refresher_id = remote.refresher_id;
                    entry.refresher = func;

                    state.table.insert(entry);
                    self.schedule_refresh(&mut state, &key);
                    self.ensure_gc(&mut state);
                    state.refresh_totals();
                    debug!(key = %key, "updated by sibling");
                }
            }
            vec![key]
        };

        self.notify(&changed);
    }
}
