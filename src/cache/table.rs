//! Entry Table Module
//!
//! The authoritative key -> entry map, kept in lockstep with the access index,
//! the running byte total and the generation counter.

use std::collections::HashMap;

use serde_json::Value;

use crate::cache::{CacheEntry, LruTracker};

// == Entry Table ==
/// Synchronous entry storage. All mutation of cache state goes through here.
///
/// Generations come from a single counter shared by every key, so a token is
/// never reused, not even after a key is removed and written again.
#[derive(Debug, Default)]
pub struct EntryTable {
    entries: HashMap<String, CacheEntry>,
    lru: LruTracker,
    total_bytes: usize,
    last_generation: u64,
    /// Tokens held for keys that have no entry (mutations of absent keys)
    fences: HashMap<String, u64>,
}

impl EntryTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    // == Insert ==
    /// Inserts or replaces an entry, assigning it a fresh generation.
    ///
    /// Returns the generation the entry now carries.
    pub fn insert(&mut self, mut entry: CacheEntry) -> u64 {
        let generation = self.next_generation();
        entry.generation = generation;
        let key = entry.key.clone();

        self.total_bytes += entry.size;
        if let Some(old) = self.entries.insert(key.clone(), entry) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size);
        }
        self.fences.remove(&key);
        self.lru.touch(&key);
        generation
    }

    // == Get ==
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    /// Marks a key as just accessed.
    pub fn touch(&mut self, key: &str) {
        if self.entries.contains_key(key) {
            self.lru.touch(key);
        }
    }

    // == Generations ==
    /// Advances the generation of `key`, fencing off every token taken before.
    ///
    /// Works for absent keys too: the token is parked until the key is written
    /// or removed, or the holder releases it.
    pub fn bump(&mut self, key: &str) -> u64 {
        let generation = self.next_generation();
        match self.entries.get_mut(key) {
            Some(entry) => entry.generation = generation,
            None => {
                self.fences.insert(key.to_string(), generation);
            }
        }
        generation
    }

    /// Current generation of `key`, whether held by an entry or a fence.
    pub fn generation(&self, key: &str) -> Option<u64> {
        self.entries
            .get(key)
            .map(|entry| entry.generation)
            .or_else(|| self.fences.get(key).copied())
    }

    /// Drops a parked token if it is still the current one.
    pub fn release(&mut self, key: &str, token: u64) {
        if self.fences.get(key) == Some(&token) {
            self.fences.remove(key);
        }
    }

    // == Remove ==
    /// Removes an entry and its index slot.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.fences.remove(key);
        let entry = self.entries.remove(key)?;
        self.lru.remove(key);
        self.total_bytes = self.total_bytes.saturating_sub(entry.size);
        Some(entry)
    }

    /// Removes everything, returning the removed entries.
    pub fn clear(&mut self) -> Vec<CacheEntry> {
        self.fences.clear();
        self.lru.clear();
        self.total_bytes = 0;
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    // == Queries ==
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Least recently touched key other than `protect`.
    pub fn oldest_except(&self, protect: Option<&str>) -> Option<String> {
        self.lru.oldest_except(protect).cloned()
    }

    /// Keys whose expiry plus `retention_ms` is at or before `now`.
    pub fn collectable(&self, now: u64, retention_ms: u64) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.expiry.saturating_add(retention_ms) <= now)
            .map(|entry| entry.key.clone())
            .collect()
    }

    /// Full key -> value view.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn index_len(&self) -> usize {
        self.lru.len()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn entry(key: &str, value: Value) -> CacheEntry {
        CacheEntry::new(key, value, Duration::from_secs(60))
    }

    #[test]
    fn test_insert_and_get() {
        let mut table = EntryTable::new();
        table.insert(entry("key1", json!("value1")));

        assert_eq!(table.get("key1").unwrap().value, json!("value1"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.index_len(), 1);
    }

    #[test]
    fn test_generation_strictly_increases() {
        let mut table = EntryTable::new();
        let g1 = table.insert(entry("k", json!(1)));
        let g2 = table.bump("k");
        let g3 = table.insert(entry("k", json!(2)));

        assert!(g1 < g2 && g2 < g3);
        assert_eq!(table.generation("k"), Some(g3));
    }

    #[test]
    fn test_generation_not_reused_after_remove() {
        let mut table = EntryTable::new();
        let g1 = table.insert(entry("k", json!(1)));
        table.remove("k");
        assert_eq!(table.generation("k"), None);

        let g2 = table.insert(entry("k", json!(1)));
        assert!(g2 > g1);
    }

    #[test]
    fn test_fence_for_absent_key() {
        let mut table = EntryTable::new();
        let token = table.bump("ghost");
        assert_eq!(table.generation("ghost"), Some(token));
        assert!(!table.contains("ghost"));

        let newer = table.bump("ghost");
        table.release("ghost", token);
        assert_eq!(table.generation("ghost"), Some(newer));

        table.release("ghost", newer);
        assert_eq!(table.generation("ghost"), None);
    }

    #[test]
    fn test_insert_clears_fence() {
        let mut table = EntryTable::new();
        let token = table.bump("k");
        let generation = table.insert(entry("k", json!(1)));
        assert_ne!(table.generation("k"), Some(token));
        assert_eq!(table.generation("k"), Some(generation));
    }

    #[test]
    fn test_byte_accounting() {
        let mut table = EntryTable::new();
        table.insert(entry("a", json!("xxxx"))); // 6 bytes
        table.insert(entry("b", json!(12))); // 2 bytes
        assert_eq!(table.total_bytes(), 8);

        table.insert(entry("a", json!("x"))); // 3 bytes
        assert_eq!(table.total_bytes(), 5);

        table.remove("b");
        assert_eq!(table.total_bytes(), 3);

        table.clear();
        assert_eq!(table.total_bytes(), 0);
        assert!(table.is_empty());
        assert_eq!(table.index_len(), 0);
    }

    #[test]
    fn test_touch_changes_oldest() {
        let mut table = EntryTable::new();
        table.insert(entry("a", json!(1)));
        table.insert(entry("b", json!(2)));
        assert_eq!(table.oldest_except(None).as_deref(), Some("a"));

        table.touch("a");
        assert_eq!(table.oldest_except(None).as_deref(), Some("b"));

        table.touch("missing");
        assert_eq!(table.index_len(), 2);
    }

    #[test]
    fn test_collectable_respects_retention() {
        let mut table = EntryTable::new();
        table.insert(CacheEntry::with_expiry("old", json!(1), Duration::from_secs(1), 1_000));
        table.insert(CacheEntry::with_expiry("new", json!(1), Duration::from_secs(1), 5_000));

        assert_eq!(table.collectable(4_000, 0), vec!["old".to_string()]);
        assert!(table.collectable(4_000, 5_000).is_empty());
    }

    #[test]
    fn test_snapshot() {
        let mut table = EntryTable::new();
        table.insert(entry("x", json!(1)));
        table.insert(entry("y", json!(2)));
        table.remove("x");

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("y"), Some(&json!(2)));
    }
}
