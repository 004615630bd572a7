//! Usage counters of the map data cache

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing how the map data cache is used
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    evicted_tiles: AtomicU64,
    evicted_composites: AtomicU64,
}

impl CacheStats {
    /// All counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record lookups answered from cache
    pub fn record_hits(&self, count: usize) {
        self.hits.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record lookups the cache could not answer
    pub fn record_misses(&self, count: usize) {
        self.misses.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a call into a fetch callback
    pub fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a trim
    pub fn record_trim(&self, tiles: usize, composites: usize) {
        self.evicted_tiles.fetch_add(tiles as u64, Ordering::Relaxed);
        self.evicted_composites
            .fetch_add(composites as u64, Ordering::Relaxed);
    }

    /// Lookups answered from cache
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that needed a fetch
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Fetch callback invocations
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Tiles evicted by trims
    pub fn evicted_tiles(&self) -> u64 {
        self.evicted_tiles.load(Ordering::Relaxed)
    }

    /// Ways and relations evicted by trims
    pub fn evicted_composites(&self) -> u64 {
        self.evicted_composites.load(Ordering::Relaxed)
    }

    /// Share of lookups answered from cache, 0.0 before the first lookup
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Set all counters back to zero
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.fetches.store(0, Ordering::Relaxed);
        self.evicted_tiles.store(0, Ordering::Relaxed);
        self.evicted_composites.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = CacheStats::new();

        stats.record_hits(2);
        stats.record_misses(1);
        stats.record_fetch();

        assert_eq!(stats.hits(), 2);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.fetches(), 1);
        assert_eq!(stats.hit_ratio(), 2.0 / 3.0);
    }

    #[test]
    fn test_stats_trim() {
        let stats = CacheStats::new();

        stats.record_trim(3, 10);
        stats.record_trim(1, 0);

        assert_eq!(stats.evicted_tiles(), 4);
        assert_eq!(stats.evicted_composites(), 10);
    }

    #[test]
    fn test_stats_reset() {
        let stats = CacheStats::new();

        stats.record_hits(1);
        stats.record_misses(1);
        stats.record_trim(1, 1);
        stats.reset();

        assert_eq!(stats.hits(), 0);
        assert_eq!(stats.misses(), 0);
        assert_eq!(stats.evicted_tiles(), 0);
        assert_eq!(stats.hit_ratio(), 0.0);
    }
}
