//! Cache Statistics Module
//!
//! Tracks hits, misses, evictions and background refresh activity.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of reads that returned a value (fresh or stale)
    pub hits: u64,
    /// Number of reads that found nothing or an expired entry
    pub misses: u64,
    /// Number of entries evicted by the capacity bounds
    pub evictions: u64,
    /// Entries removed because a read found them expired
    pub expired: u64,
    /// Entries removed by the garbage collector
    pub collected: u64,
    /// Refreshes whose result was committed
    pub refreshes: u64,
    /// Refresh cycles abandoned after the retry failed
    pub refresh_failures: u64,
    /// Refreshes or mutations discarded by the generation fence
    pub superseded: u64,
    /// Failed persistent store calls
    pub store_failures: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
    /// Approximate bytes held by entry values
    pub total_bytes: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expired(&mut self) {
        self.expired += 1;
    }

    pub fn record_collected(&mut self, count: usize) {
        self.collected += count as u64;
    }

    pub fn record_refresh(&mut self) {
        self.refreshes += 1;
    }

    pub fn record_refresh_failure(&mut self) {
        self.refresh_failures += 1;
    }

    pub fn record_superseded(&mut self) {
        self.superseded += 1;
    }

    pub fn record_store_failure(&mut self) {
        self.store_failures += 1;
    }

    // == Update Sizes ==
    /// Updates the entry count and byte gauges.
    pub fn set_totals(&mut self, entries: usize, bytes: usize) {
        self.total_entries = entries;
        self.total_bytes = bytes;
    }
}
