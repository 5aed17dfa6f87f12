//! Subscription Registry
//!
//! Whole-cache listeners receive a key -> value snapshot, per-key listeners
//! receive the key's current value or `None`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;

pub type SnapshotListener = Arc<dyn Fn(&HashMap<String, Value>) + Send + Sync>;
pub type KeyListener = Arc<dyn Fn(Option<&Value>) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    global: BTreeMap<u64, SnapshotListener>,
    keyed: HashMap<String, BTreeMap<u64, KeyListener>>,
}

impl Listeners {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Listeners due for one notification round.
#[derive(Default)]
pub(crate) struct Pending {
    pub global: Vec<SnapshotListener>,
    pub keyed: Vec<(String, Vec<KeyListener>)>,
}

impl Pending {
    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.keyed.is_empty()
    }
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    listeners: Arc<Mutex<Listeners>>,
}

impl SubscriptionRegistry {
    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_global(&self, listener: SnapshotListener) -> Subscription {
        let mut listeners = self.lock();
        let id = listeners.next_id();
        listeners.global.insert(id, listener);
        Subscription::new(&self.listeners, id, None)
    }

    pub fn add_keyed(&self, key: &str, listener: KeyListener) -> Subscription {
        let mut listeners = self.lock();
        let id = listeners.next_id();
        listeners
            .keyed
            .entry(key.to_string())
            .or_default()
            .insert(id, listener);
        Subscription::new(&self.listeners, id, Some(key.to_string()))
    }

    /// Collects the listeners interested in a change to `changed`.
    pub fn pending_for(&self, changed: &[String]) -> Pending {
        let listeners = self.lock();
        let keyed = changed
            .iter()
            .filter_map(|key| {
                listeners
                    .keyed
                    .get(key)
                    .map(|subs| (key.clone(), subs.values().cloned().collect()))
            })
            .collect();
        Pending {
            global: listeners.global.values().cloned().collect(),
            keyed,
        }
    }

    pub fn clear(&self) {
        let mut listeners = self.lock();
        listeners.global.clear();
        listeners.keyed.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        let listeners = self.lock();
        listeners.global.len() + listeners.keyed.values().map(BTreeMap::len).sum::<usize>()
    }
}

// == Subscription Handle ==
/// Handle returned by `subscribe`/`subscribe_key`.
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it. Unsubscribing twice is a no-op.
#[derive(Debug, Clone)]
pub struct Subscription {
    registry: Weak<Mutex<Listeners>>,
    id: u64,
    key: Option<String>,
}

impl Subscription {
    fn new(registry: &Arc<Mutex<Listeners>>, id: u64, key: Option<String>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            id,
            key,
        }
    }

    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut listeners = registry.lock().unwrap_or_else(PoisonError::into_inner);
        match &self.key {
            None => {
                listeners.global.remove(&self.id);
            }
            Some(key) => {
                if let Some(subs) = listeners.keyed.get_mut(key) {
                    subs.remove(&self.id);
                    if subs.is_empty() {
                        listeners.keyed.remove(key);
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("global", &self.global.len())
            .field("keyed", &self.keyed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = SubscriptionRegistry::default();
        let a = registry.add_global(Arc::new(|_| {}));
        let b = registry.add_keyed("k", Arc::new(|_| {}));
        assert_eq!(registry.len(), 2);

        a.unsubscribe();
        a.unsubscribe();
        b.unsubscribe();
        b.clone().unsubscribe();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_pending_only_includes_changed_keys() {
        let registry = SubscriptionRegistry::default();
        registry.add_keyed("a", Arc::new(|_| {}));
        registry.add_keyed("b", Arc::new(|_| {}));

        let pending = registry.pending_for(&["a".to_string()]);
        assert!(pending.global.is_empty());
        assert_eq!(pending.keyed.len(), 1);
        assert_eq!(pending.keyed[0].0, "a");

        assert!(registry.pending_for(&["z".to_string()]).is_empty());
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let registry = SubscriptionRegistry::default();
        let sub = registry.add_global(Arc::new(|_| {}));
        drop(registry);
        sub.unsubscribe();
    }
}
