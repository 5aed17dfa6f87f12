//! Eviction Policy Module
//!
//! Count and byte bounds enforced after every local write.

use tracing::debug;

use crate::cache::{CacheEntry, EntryTable};

// == Eviction Policy ==
/// Capacity bounds; `None` disables a bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictionPolicy {
    pub max_entries: Option<usize>,
    pub max_bytes: Option<usize>,
}

impl EvictionPolicy {
    pub fn new(max_entries: Option<usize>, max_bytes: Option<usize>) -> Self {
        Self {
            max_entries,
            max_bytes,
        }
    }

    /// True when the table exceeds either bound.
    pub fn is_over(&self, table: &EntryTable) -> bool {
        self.max_entries.is_some_and(|max| table.len() > max)
            || self.max_bytes.is_some_and(|max| table.total_bytes() > max)
    }

    // == Enforce ==
    /// Evicts least recently touched entries until both bounds hold.
    ///
    /// `protect` is never chosen; when it is the only entry left the loop
    /// stops even if a bound is still exceeded.
    pub fn enforce(&self, table: &mut EntryTable, protect: Option<&str>) -> Vec<CacheEntry> {
        let mut evicted = Vec::new();

        while self.is_over(table) {
            let Some(victim) = table.oldest_except(protect) else {
                break;
            };
            if let Some(entry) = table.remove(&victim) {
                debug!(
                    key = %victim,
                    entries = table.len(),
                    bytes = table.total_bytes(),
                    "evicted least recently used entry"
                );
                evicted.push(entry);
            }
        }

        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn insert(table: &mut EntryTable, key: &str, value: serde_json::Value) {
        table.insert(CacheEntry::new(key, value, Duration::from_secs(60)));
    }

    #[test]
    fn test_count_bound_evicts_oldest() {
        let policy = EvictionPolicy::new(Some(2), None);
        let mut table = EntryTable::new();

        insert(&mut table, "a", json!(1));
        insert(&mut table, "b", json!(2));
        insert(&mut table, "c", json!(3));

        let evicted = policy.enforce(&mut table, Some("c"));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key, "a");

        let mut keys = table.keys();
        keys.sort();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn test_touch_protects_from_eviction() {
        let policy = EvictionPolicy::new(Some(2), None);
        let mut table = EntryTable::new();

        insert(&mut table, "a", json!(1));
        insert(&mut table, "b", json!(2));
        table.touch("a");
        insert(&mut table, "c", json!(3));

        let evicted = policy.enforce(&mut table, Some("c"));
        assert_eq!(evicted[0].key, "b");
        assert!(table.contains("a"));
    }

    #[test]
    fn test_byte_bound_evicts_until_under() {
        // each "xxxxxxxx" value is 10 bytes
        let policy = EvictionPolicy::new(None, Some(25));
        let mut table = EntryTable::new();

        insert(&mut table, "a", json!("xxxxxxxx"));
        insert(&mut table, "b", json!("xxxxxxxx"));
        insert(&mut table, "c", json!("xxxxxxxx"));
        assert_eq!(table.total_bytes(), 30);

        let evicted = policy.enforce(&mut table, Some("c"));
        assert_eq!(evicted.len(), 1);
        assert_eq!(table.total_bytes(), 20);
        assert!(!table.contains("a"));
    }

    #[test]
    fn test_protected_key_survives_oversized_write() {
        let policy = EvictionPolicy::new(None, Some(5));
        let mut table = EntryTable::new();

        insert(&mut table, "small", json!(1));
        insert(&mut table, "big", json!("a long string value"));

        let evicted = policy.enforce(&mut table, Some("big"));
        assert_eq!(evicted.len(), 1);
        assert!(table.contains("big"));
        assert!(policy.is_over(&table));
    }

    #[test]
    fn test_unbounded_policy_never_evicts() {
        let policy = EvictionPolicy::default();
        let mut table = EntryTable::new();
        for i in 0..100 {
            insert(&mut table, &format!("k{i}"), json!(i));
        }
        assert!(policy.enforce(&mut table, None).is_empty());
        assert_eq!(table.len(), 100);
    }
}
