//! Per-shard bounded LRU+TTL map (spec §4.1).
//!
//! Structured the way `hkv-engine`'s `MemoryEngine` shard inner is: a hash
//! index from key to a dense arena slot, with prev/next stored as indices
//! rather than pointers so the doubly-linked recency list needs no unsafe
//! code. `head` is the least-recently-used end, `tail` is most-recently-used;
//! `insert`/`get` move a node to `tail`, eviction pops from `head`.

use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{Result, StoreError};
use crate::stats::{StatsCounters, StatsSnapshot};

/// One live entry's recency-list node.
#[derive(Debug)]
struct Node {
    key: Bytes,
    value: Bytes,
    expires_at_millis: Option<i64>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Node {
    fn is_expired(&self, now_millis: i64) -> bool {
        match self.expires_at_millis {
            Some(deadline) => now_millis >= deadline,
            None => false,
        }
    }
}

/// A live entry as returned by drain/restore, decoupled from the arena.
#[derive(Debug, Clone)]
pub struct LiveEntry {
    pub key: Bytes,
    pub value: Bytes,
    pub expires_at_millis: Option<i64>,
}

struct Inner {
    map: HashMap<Bytes, usize>,
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            map: HashMap::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn lru_detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.nodes[idx].as_ref().expect("node exists");
            (node.prev, node.next)
        };

        match prev {
            Some(prev_idx) => self.nodes[prev_idx].as_mut().expect("node exists").next = next,
            None => self.head = next,
        }

        match next {
            Some(next_idx) => self.nodes[next_idx].as_mut().expect("node exists").prev = prev,
            None => self.tail = prev,
        }

        let node = self.nodes[idx].as_mut().expect("node exists");
        node.prev = None;
        node.next = None;
    }

    fn lru_push_tail(&mut self, idx: usize) {
        let prev_tail = self.tail;
        {
            let node = self.nodes[idx].as_mut().expect("node exists");
            node.prev = prev_tail;
            node.next = None;
        }

        match prev_tail {
            Some(tail_idx) => self.nodes[tail_idx].as_mut().expect("node exists").next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    /// Moves `idx` to the most-recently-used end.
    fn touch(&mut self, idx: usize) {
        if self.tail == Some(idx) {
            return;
        }
        self.lru_detach(idx);
        self.lru_push_tail(idx);
    }

    fn alloc_slot(&mut self) -> usize {
        self.free.pop().unwrap_or_else(|| {
            self.nodes.push(None);
            self.nodes.len() - 1
        })
    }

    /// Removes a node by arena index, detaching it from both the map and the
    /// recency list. Returns the removed key/value/expiration.
    fn remove_idx(&mut self, idx: usize) -> Option<(Bytes, Bytes, Option<i64>)> {
        let node = self.nodes[idx].take()?;
        self.lru_relink_after_take(idx, node.prev, node.next);
        self.map.remove(&node.key);
        self.free.push(idx);
        Some((node.key, node.value, node.expires_at_millis))
    }

    fn lru_relink_after_take(&mut self, _idx: usize, prev: Option<usize>, next: Option<usize>) {
        match prev {
            Some(prev_idx) => self.nodes[prev_idx].as_mut().expect("node exists").next = next,
            None => self.head = next,
        }
        match next {
            Some(next_idx) => self.nodes[next_idx].as_mut().expect("node exists").prev = prev,
            None => self.tail = prev,
        }
    }

    fn pop_head(&mut self) -> Option<(Bytes, Bytes, Option<i64>)> {
        let idx = self.head?;
        self.remove_idx(idx)
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// A bounded, thread-safe map with O(1) LRU eviction and inline TTL metadata.
pub struct LruTtlMap {
    capacity: usize,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    stats: StatsCounters,
}

impl LruTtlMap {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        debug_assert!(capacity >= 1, "LruTtlMap capacity must be at least 1");
        LruTtlMap {
            capacity: capacity.max(1),
            clock,
            inner: Mutex::new(Inner::new()),
            stats: StatsCounters::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> &StatsCounters {
        &self.stats
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Upserts `key`. Clears any prior expiration. Evicts the LRU entry first
    /// if inserting a brand new key into a full map.
    pub fn insert(&self, key: Bytes, value: Bytes) {
        self.stats.record_set();
        let mut inner = self.inner.lock();

        if let Some(&idx) = inner.map.get(&key) {
            let node = inner.nodes[idx].as_mut().expect("node exists");
            node.value = value;
            node.expires_at_millis = None;
            inner.touch(idx);
            return;
        }

        if inner.len() >= self.capacity {
            if inner.pop_head().is_some() {
                self.stats.record_eviction();
            }
        }

        let idx = inner.alloc_slot();
        inner.nodes[idx] = Some(Node {
            key: key.clone(),
            value,
            expires_at_millis: None,
            prev: None,
            next: None,
        });
        inner.lru_push_tail(idx);
        inner.map.insert(key, idx);
    }

    /// Returns the value for `key`, lazily expiring it if its TTL has passed.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.stats.record_get();
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        let idx = match inner.map.get(key) {
            Some(&idx) => idx,
            None => {
                self.stats.record_miss();
                return None;
            }
        };

        let expired = inner.nodes[idx].as_ref().expect("node exists").is_expired(now);
        if expired {
            inner.remove_idx(idx);
            self.stats.record_expiration();
            self.stats.record_miss();
            return None;
        }

        inner.touch(idx);
        let value = inner.nodes[idx].as_ref().expect("node exists").value.clone();
        self.stats.record_hit();
        Some(value)
    }

    /// Removes `key` if present. Does not count as an expiration even if the
    /// entry happened to already be expired.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.stats.record_delete();
        let mut inner = self.inner.lock();
        match inner.map.get(key).copied() {
            Some(idx) => {
                inner.remove_idx(idx);
                true
            }
            None => false,
        }
    }

    /// Stamps an absolute expiration `ttl_millis` from now. Does not move the
    /// key in recency order. Fails fast on non-positive TTL.
    pub fn expire(&self, key: &[u8], ttl_millis: i64) -> Result<bool> {
        self.stats.record_expire_call();
        if ttl_millis <= 0 {
            return Err(StoreError::InvalidArgument(format!(
                "ttl_millis must be positive, got {ttl_millis}"
            )));
        }

        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        let idx = match inner.map.get(key).copied() {
            Some(idx) => idx,
            None => return Ok(false),
        };

        let expired = inner.nodes[idx].as_ref().expect("node exists").is_expired(now);
        if expired {
            inner.remove_idx(idx);
            self.stats.record_expiration();
            return Ok(false);
        }

        inner.nodes[idx].as_mut().expect("node exists").expires_at_millis = Some(now + ttl_millis);
        Ok(true)
    }

    /// Equivalent to `get(key).is_some()` without moving recency order or
    /// revealing the value.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        let idx = match inner.map.get(key).copied() {
            Some(idx) => idx,
            None => return false,
        };

        let expired = inner.nodes[idx].as_ref().expect("node exists").is_expired(now);
        if expired {
            inner.remove_idx(idx);
            self.stats.record_expiration();
            return false;
        }
        true
    }

    /// Number of live (non-expired) entries. Does not mutate the map: this
    /// is a read-only scan rather than an opportunistic sweep, so it never
    /// races with a concurrent reader holding a cloned value.
    pub fn size(&self) -> usize {
        let now = self.clock.now_millis();
        let inner = self.inner.lock();
        inner
            .nodes
            .iter()
            .flatten()
            .filter(|node| !node.is_expired(now))
            .count()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        *inner = Inner::new();
    }

    /// Scans all entries once, removing those whose expiration has passed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        let expired_indices: Vec<usize> = inner
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| match slot {
                Some(node) if node.is_expired(now) => Some(idx),
                _ => None,
            })
            .collect();

        for idx in &expired_indices {
            inner.remove_idx(*idx);
        }

        let removed = expired_indices.len();
        self.stats.record_expirations(removed as u64);
        removed
    }

    /// Returns a consistent snapshot of all live entries, removing any found
    /// expired during the drain and counting them as expirations. Ordered
    /// from least- to most-recently-used.
    pub fn drain_for_snapshot(&self) -> Vec<LiveEntry> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        let expired_indices: Vec<usize> = inner
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| match slot {
                Some(node) if node.is_expired(now) => Some(idx),
                _ => None,
            })
            .collect();
        for idx in &expired_indices {
            inner.remove_idx(*idx);
        }
        self.stats.record_expirations(expired_indices.len() as u64);

        let mut entries = Vec::with_capacity(inner.len());
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            let node = inner.nodes[idx].as_ref().expect("node exists");
            entries.push(LiveEntry {
                key: node.key.clone(),
                value: node.value.clone(),
                expires_at_millis: node.expires_at_millis,
            });
            cursor = node.next;
        }
        entries
    }

    /// Replaces current content with `entries`, dropping any already expired
    /// at load time and counting each as an expiration. Recency order follows
    /// the order entries appear in `entries` (first = least recent).
    /// Respects the map's own capacity, evicting the oldest loaded entries
    /// first if `entries` exceeds it.
    pub fn load_from_snapshot(&self, entries: Vec<LiveEntry>) {
        let now = self.clock.now_millis();
        let mut inner = Inner::new();
        let mut dropped_expired = 0u64;

        for entry in entries {
            if let Some(deadline) = entry.expires_at_millis {
                if now >= deadline {
                    dropped_expired += 1;
                    continue;
                }
            }

            if inner.len() >= self.capacity {
                if inner.pop_head().is_some() {
                    self.stats.record_eviction();
                }
            }

            let idx = inner.alloc_slot();
            inner.nodes[idx] = Some(Node {
                key: entry.key.clone(),
                value: entry.value,
                expires_at_millis: entry.expires_at_millis,
                prev: None,
                next: None,
            });
            inner.lru_push_tail(idx);
            inner.map.insert(entry.key, idx);
        }

        self.stats.record_expirations(dropped_expired);
        *self.inner.lock() = inner;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    fn map_with_capacity(capacity: usize) -> (LruTtlMap, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new(1_000));
        let map = LruTtlMap::new(capacity, clock.clone());
        (map, clock)
    }

    #[test]
    fn insert_get_delete_roundtrip() {
        let (map, _clock) = map_with_capacity(4);
        map.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1"));
        map.insert(Bytes::from_static(b"b"), Bytes::from_static(b"2"));

        assert_eq!(map.get(b"a"), Some(Bytes::from_static(b"1")));
        assert_eq!(map.get(b"c"), None);
        assert!(map.delete(b"b"));
        assert_eq!(map.size(), 1);

        let snap = map.stats_snapshot();
        assert_eq!(snap.gets, 2);
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.sets, 2);
        assert_eq!(snap.deletes, 1);
    }

    #[test]
    fn lru_eviction_picks_least_recently_touched() {
        let (map, _clock) = map_with_capacity(3);
        map.insert(Bytes::from_static(b"k1"), Bytes::from_static(b"v"));
        map.insert(Bytes::from_static(b"k2"), Bytes::from_static(b"v"));
        map.insert(Bytes::from_static(b"k3"), Bytes::from_static(b"v"));

        // touch k1, making k2 the new LRU
        assert!(map.get(b"k1").is_some());
        map.insert(Bytes::from_static(b"k4"), Bytes::from_static(b"v"));

        assert!(map.get(b"k1").is_some());
        assert_eq!(map.get(b"k2"), None);
        assert!(map.get(b"k3").is_some());
        assert!(map.get(b"k4").is_some());
        assert_eq!(map.stats_snapshot().evictions, 1);
    }

    #[test]
    fn expire_does_not_touch_recency() {
        let (map, _clock) = map_with_capacity(2);
        map.insert(Bytes::from_static(b"k1"), Bytes::from_static(b"v"));
        map.insert(Bytes::from_static(b"k2"), Bytes::from_static(b"v"));

        // k1 is LRU. Calling expire on it must not promote it.
        assert!(map.expire(b"k1", 100_000).unwrap());
        map.insert(Bytes::from_static(b"k3"), Bytes::from_static(b"v"));

        assert_eq!(map.get(b"k1"), None);
        assert!(map.get(b"k2").is_some());
        assert!(map.get(b"k3").is_some());
    }

    #[test]
    fn lazy_expiry_counts_once() {
        let (map, clock) = map_with_capacity(4);
        map.insert(Bytes::from_static(b"x"), Bytes::from_static(b"v"));
        map.expire(b"x", 50).unwrap();

        clock.advance(20);
        assert_eq!(map.get(b"x"), Some(Bytes::from_static(b"v")));

        clock.advance(200);
        assert_eq!(map.get(b"x"), None);
        assert_eq!(map.stats_snapshot().expirations, 1);

        // A second get on the now-absent key does not double-count.
        assert_eq!(map.get(b"x"), None);
        assert_eq!(map.stats_snapshot().expirations, 1);
    }

    #[test]
    fn insert_after_expire_clears_ttl() {
        let (map, clock) = map_with_capacity(4);
        map.insert(Bytes::from_static(b"k"), Bytes::from_static(b"v1"));
        map.expire(b"k", 10).unwrap();
        map.insert(Bytes::from_static(b"k"), Bytes::from_static(b"v2"));

        clock.advance(1_000);
        assert_eq!(map.get(b"k"), Some(Bytes::from_static(b"v2")));
    }

    #[test]
    fn expire_requires_positive_ttl() {
        let (map, _clock) = map_with_capacity(2);
        map.insert(Bytes::from_static(b"k"), Bytes::from_static(b"v"));
        assert!(matches!(
            map.expire(b"k", 0),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            map.expire(b"k", -5),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn sweep_expired_removes_and_counts() {
        let (map, clock) = map_with_capacity(4);
        map.insert(Bytes::from_static(b"a"), Bytes::from_static(b"v"));
        map.insert(Bytes::from_static(b"b"), Bytes::from_static(b"v"));
        map.expire(b"a", 10).unwrap();

        clock.advance(100);
        assert_eq!(map.sweep_expired(), 1);
        assert_eq!(map.size(), 1);
        assert_eq!(map.stats_snapshot().expirations, 1);
    }

    #[test]
    fn drain_and_load_round_trip() {
        let (map, _clock) = map_with_capacity(4);
        map.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1"));
        map.insert(Bytes::from_static(b"b"), Bytes::from_static(b"2"));
        map.expire(b"b", 1_000_000).unwrap();

        let drained = map.drain_for_snapshot();
        assert_eq!(drained.len(), 2);

        let (fresh, _clock2) = map_with_capacity(4);
        fresh.load_from_snapshot(drained);
        assert_eq!(fresh.get(b"a"), Some(Bytes::from_static(b"1")));
        assert_eq!(fresh.get(b"b"), Some(Bytes::from_static(b"2")));
    }

    #[test]
    fn load_from_snapshot_drops_already_expired() {
        let (map, clock) = map_with_capacity(4);
        let entries = vec![LiveEntry {
            key: Bytes::from_static(b"stale"),
            value: Bytes::from_static(b"v"),
            expires_at_millis: Some(clock.now_millis() - 1),
        }];
        map.load_from_snapshot(entries);
        assert_eq!(map.get(b"stale"), None);
        assert_eq!(map.stats_snapshot().expirations, 1);
    }

    #[test]
    fn capacity_bound_never_exceeded() {
        let (map, _clock) = map_with_capacity(5);
        for i in 0..50 {
            map.insert(Bytes::from(format!("k{i}")), Bytes::from_static(b"v"));
            assert!(map.size() <= 5);
        }
    }
}
