//! LRU Tracker Module
//!
//! Access-time index used to pick eviction victims.

use std::collections::{BTreeMap, HashMap};

// == LRU Tracker ==
/// Tracks the last-touch order of keys.
///
/// Every touch stamps the key with a fresh tick from a monotonic counter, so
/// ordering by tick is strict least-recently-touched order with no ties.
#[derive(Debug, Default)]
pub struct LruTracker {
    /// key -> tick of its latest touch
    ticks: HashMap<String, u64>,
    /// tick -> key, oldest first
    order: BTreeMap<u64, String>,
    next_tick: u64,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used, inserting it if new.
    pub fn touch(&mut self, key: &str) {
        self.next_tick += 1;
        let tick = self.next_tick;
        if let Some(old) = self.ticks.insert(key.to_string(), tick) {
            self.order.remove(&old);
        }
        self.order.insert(tick, key.to_string());
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &str) {
        if let Some(tick) = self.ticks.remove(key) {
            self.order.remove(&tick);
        }
    }

    // == Oldest ==
    /// Returns the least recently used key, skipping `exclude`.
    pub fn oldest_except(&self, exclude: Option<&str>) -> Option<&String> {
        self.order
            .values()
            .find(|key| Some(key.as_str()) != exclude)
    }

    pub fn clear(&mut self) {
        self.ticks.clear();
        self.order.clear();
    }

    // == Length ==
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.ticks.contains_key(key)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_new() {
        let lru = LruTracker::new();
        assert!(lru.is_empty());
        assert_eq!(lru.len(), 0);
    }

    #[test]
    fn test_lru_touch_existing_key() {
        let mut lru = LruTracker::new();

        lru.touch("key1");
        lru.touch("key2");
        lru.touch("key3");
        lru.touch("key1");

        assert_eq!(lru.len(), 3);
        assert_eq!(lru.oldest_except(None), Some(&"key2".to_string()));
    }

    #[test]
    fn test_lru_remove() {
        let mut lru = LruTracker::new();

        lru.touch("key1");
        lru.touch("key2");
        lru.touch("key3");
        lru.remove("key2");
        lru.remove("nonexistent");

        assert_eq!(lru.len(), 2);
        assert!(!lru.contains("key2"));
        assert!(lru.contains("key1"));
        assert!(lru.contains("key3"));
    }

    #[test]
    fn test_oldest_except_skips_protected_key() {
        let mut lru = LruTracker::new();

        lru.touch("a");
        lru.touch("b");

        assert_eq!(lru.oldest_except(Some("a")), Some(&"b".to_string()));
        assert_eq!(lru.oldest_except(None), Some(&"a".to_string()));

        lru.remove("b");
        assert_eq!(lru.oldest_except(Some("a")), None);
    }

    #[test]
    fn test_lru_order_after_multiple_touches() {
        let mut lru = LruTracker::new();

        lru.touch("a");
        lru.touch("b");
        lru.touch("c");
        lru.touch("a");
        lru.touch("c");
        lru.touch("b");

        // Oldest to newest is now a, c, b
        let order: Vec<_> = lru.order.values().cloned().collect();
        assert_eq!(order, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_lru_touch_same_key_multiple_times() {
        let mut lru = LruTracker::new();

        lru.touch("key1");
        lru.touch("key1");
        lru.touch("key1");

        assert_eq!(lru.len(), 1);
        assert_eq!(lru.order.len(), 1);

        lru.clear();
        assert!(lru.is_empty());
        assert_eq!(lru.oldest_except(None), None);
    }
}
