//! Cache instrumentation sink.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters recorded by [`CachedCoinView`](crate::CachedCoinView).
///
/// Pure instrumentation: the only contract is "accept a count". Readers
/// take a [`CacheStatsSnapshot`] for logging or metrics export.
#[derive(Debug, Default)]
pub struct CachePerformanceCounter {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    flushes: AtomicU64,
    rewinds: AtomicU64,
    evicted_entries: AtomicU64,
}

impl CachePerformanceCounter {
    pub fn record_hits(&self, count: u64) {
        self.cache_hits.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_misses(&self, count: u64) {
        self.cache_misses.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rewind(&self) {
        self.rewinds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: u64) {
        self.evicted_entries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            rewinds: self.rewinds.load(Ordering::Relaxed),
            evicted_entries: self.evicted_entries.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub flushes: u64,
    pub rewinds: u64,
    pub evicted_entries: u64,
}

impl CacheStatsSnapshot {
    /// Hit ratio in `[0, 1]`, or `None` before any lookup.
    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.cache_hits + self.cache_misses;
        (total > 0).then(|| self.cache_hits as f64 / total as f64)
    }
}

impl std::fmt::Display for CacheStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "hits: {}, misses: {}, flushes: {}, rewinds: {}, evicted: {}",
            self.cache_hits, self.cache_misses, self.flushes, self.rewinds, self.evicted_entries
        )
    }
}
