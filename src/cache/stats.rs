//! Cache Statistics Module
//!
//! Tracks lookups, writes, evictions and file saves.

use serde::Serialize;

// == Cache Stats ==
/// Counters kept by a connection across start/stop cycles.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Lookups that found a value
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Accepted writes
    pub sets: u64,
    /// Writes rejected by the byte ceiling
    pub rejected: u64,
    /// Explicit removals of a present key
    pub drops: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Completed file rewrites
    pub saves: u64,
    /// Failed background file rewrites
    pub save_failures: u64,
    /// Current number of entries
    pub total_entries: usize,
    /// Current number of segments
    pub segments: usize,
    /// Current accounted byte total
    pub byte_size: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
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

    pub fn record_set(&mut self) {
        self.sets += 1;
    }

    pub fn record_rejected(&mut self) {
        self.rejected += 1;
    }

    pub fn record_drop(&mut self) {
        self.drops += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    pub fn record_save(&mut self) {
        self.saves += 1;
    }

    pub fn record_save_failure(&mut self) {
        self.save_failures += 1;
    }

    // == Update Gauges ==
    /// Refreshes the point-in-time gauges.
    pub fn set_totals(&mut self, entries: usize, segments: usize, byte_size: u64) {
        self.total_entries = entries;
        self.segments = segments;
        self.byte_size = byte_size;
    }
}
