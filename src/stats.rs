//! Per-shard atomic counters (spec §4.2).
//!
//! Each `LruTtlMap` owns one of these. The router aggregates them by summing
//! a `StatsSnapshot` per shard; counters are 64-bit and wrap-around is not a
//! concern at realistic throughputs.

use std::sync::atomic::{AtomicU64, Ordering};

/// An immutable point-in-time view of a shard's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub gets: u64,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub expires: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl std::ops::Add for StatsSnapshot {
    type Output = StatsSnapshot;

    fn add(self, rhs: StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            gets: self.gets + rhs.gets,
            hits: self.hits + rhs.hits,
            misses: self.misses + rhs.misses,
            sets: self.sets + rhs.sets,
            deletes: self.deletes + rhs.deletes,
            expires: self.expires + rhs.expires,
            evictions: self.evictions + rhs.evictions,
            expirations: self.expirations + rhs.expirations,
        }
    }
}

/// Atomic counters for a single shard.
#[derive(Debug, Default)]
pub struct StatsCounters {
    gets: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    expires: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_expire_call(&self) {
        self.expires.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        if count > 0 {
            self.expirations.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            expires: self.expires.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.gets.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.expires.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gets_equal_hits_plus_misses() {
        let stats = StatsCounters::new();
        stats.record_get();
        stats.record_hit();
        stats.record_get();
        stats.record_miss();

        let snap = stats.snapshot();
        assert_eq!(snap.gets, snap.hits + snap.misses);
    }

    #[test]
    fn reset_zeroes_all_counters() {
        let stats = StatsCounters::new();
        stats.record_set();
        stats.record_eviction();
        stats.reset();

        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn snapshot_add_aggregates_across_shards() {
        let a = StatsCounters::new();
        let b = StatsCounters::new();
        a.record_set();
        b.record_set();
        b.record_hit();

        let total = a.snapshot() + b.snapshot();
        assert_eq!(total.sets, 2);
        assert_eq!(total.hits, 1);
    }
}
