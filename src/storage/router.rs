//! Fixed shard-count router in front of the per-shard maps (spec §4.3).
//!
//! Routes by a 32-bit FNV-1a content hash spread with an xor-shift before
//! masking, enforces key/value size limits before ever touching a shard,
//! and carries the router-wide snapshot gate: point operations take it
//! shared, capture/restore take it exclusive. Lock order is always
//! gate -> shard, never the reverse, and no operation ever holds two shard
//! locks at once.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::clock::Clock;
use crate::error::{Result, SizeKind, StoreError};
use crate::snapshot::codec::{SnapshotEntry, SnapshotImage};
use crate::stats::StatsSnapshot;
use crate::storage::lru_ttl::{LiveEntry, LruTtlMap};

/// No limit on key/value size.
pub const UNBOUNDED: usize = usize::MAX;

/// Construction parameters for a [`ShardRouter`].
#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    pub shard_count: u32,
    pub capacity_per_shard: usize,
    pub max_key_bytes: usize,
    pub max_value_bytes: usize,
}

impl RouterConfig {
    pub fn new(shard_count: u32, capacity_per_shard: usize) -> Self {
        RouterConfig {
            shard_count,
            capacity_per_shard,
            max_key_bytes: UNBOUNDED,
            max_value_bytes: UNBOUNDED,
        }
    }

    pub fn with_max_key_bytes(mut self, limit: usize) -> Self {
        self.max_key_bytes = limit;
        self
    }

    pub fn with_max_value_bytes(mut self, limit: usize) -> Self {
        self.max_value_bytes = limit;
        self
    }
}

/// Routes keys to one of `shard_count` [`LruTtlMap`] instances and
/// coordinates whole-store snapshot capture/restore.
pub struct ShardRouter {
    shards: Vec<LruTtlMap>,
    config: RouterConfig,
    clock: Arc<dyn Clock>,
    /// Shared for point ops, exclusive for capture/restore. Never nested
    /// inside a shard lock.
    snapshot_gate: RwLock<()>,
}

impl ShardRouter {
    pub fn new(config: RouterConfig, clock: Arc<dyn Clock>) -> Self {
        assert!(config.shard_count.is_power_of_two(), "shard_count must be a power of two");
        assert!(config.shard_count >= 1);

        let shards = (0..config.shard_count)
            .map(|_| LruTtlMap::new(config.capacity_per_shard, clock.clone()))
            .collect();

        ShardRouter {
            shards,
            config,
            clock,
            snapshot_gate: RwLock::new(()),
        }
    }

    pub fn shard_count(&self) -> u32 {
        self.config.shard_count
    }

    pub fn capacity_per_shard(&self) -> usize {
        self.config.capacity_per_shard
    }

    /// 32-bit FNV-1a over the key bytes, spread with an xor-right-shift-16,
    /// then masked to `shard_count - 1` (shard_count is a power of two).
    /// Empty keys always land on shard 0.
    fn shard_index(&self, key: &[u8]) -> usize {
        if key.is_empty() {
            return 0;
        }

        let mut hash: u32 = 0x811c9dc5;
        for &byte in key {
            hash ^= byte as u32;
            hash = hash.wrapping_mul(0x01000193);
        }
        hash ^= hash >> 16;

        (hash & (self.config.shard_count - 1)) as usize
    }

    fn shard_for(&self, key: &[u8]) -> &LruTtlMap {
        &self.shards[self.shard_index(key)]
    }

    fn check_key_size(&self, key: &[u8]) -> Result<()> {
        if self.config.max_key_bytes != UNBOUNDED && key.len() > self.config.max_key_bytes {
            return Err(StoreError::TooLarge {
                kind: SizeKind::Key,
                size: key.len(),
                limit: self.config.max_key_bytes,
            });
        }
        Ok(())
    }

    fn check_value_size(&self, value: &[u8]) -> Result<()> {
        if self.config.max_value_bytes != UNBOUNDED && value.len() > self.config.max_value_bytes {
            return Err(StoreError::TooLarge {
                kind: SizeKind::Value,
                size: value.len(),
                limit: self.config.max_value_bytes,
            });
        }
        Ok(())
    }

    pub fn insert(&self, key: Bytes, value: Bytes) -> Result<()> {
        self.check_key_size(&key)?;
        self.check_value_size(&value)?;

        let _gate = self.snapshot_gate.read();
        self.shard_for(&key).insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.check_key_size(key)?;

        let _gate = self.snapshot_gate.read();
        Ok(self.shard_for(key).get(key))
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.check_key_size(key)?;

        let _gate = self.snapshot_gate.read();
        Ok(self.shard_for(key).delete(key))
    }

    pub fn expire(&self, key: &[u8], ttl_millis: i64) -> Result<bool> {
        self.check_key_size(key)?;

        let _gate = self.snapshot_gate.read();
        self.shard_for(key).expire(key, ttl_millis)
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        self.check_key_size(key)?;

        let _gate = self.snapshot_gate.read();
        Ok(self.shard_for(key).contains_key(key))
    }

    /// Sum of live entries across all shards.
    pub fn size(&self) -> usize {
        let _gate = self.snapshot_gate.read();
        self.shards.iter().map(|shard| shard.size()).sum()
    }

    pub fn clear(&self) {
        let _gate = self.snapshot_gate.write();
        for shard in &self.shards {
            shard.clear();
        }
    }

    /// Drives every shard's lazy sweep once. Used by [`super::sweeper::BackgroundSweeper`].
    pub fn sweep_expired(&self) -> usize {
        let _gate = self.snapshot_gate.read();
        self.shards.iter().map(|shard| shard.sweep_expired()).sum()
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.shards
            .iter()
            .map(|shard| shard.stats_snapshot())
            .fold(StatsSnapshot::default(), |acc, snap| acc + snap)
    }

    /// Takes the snapshot gate exclusively, quiescing all point operations,
    /// and drains every shard into a self-describing in-memory image.
    pub fn capture_snapshot(&self) -> SnapshotImage {
        let _gate = self.snapshot_gate.write();

        let mut entries = Vec::new();
        for (shard_index, shard) in self.shards.iter().enumerate() {
            for live in shard.drain_for_snapshot() {
                entries.push(SnapshotEntry {
                    shard_index: shard_index as u32,
                    key: live.key,
                    value: live.value,
                    expires_at_millis: live.expires_at_millis,
                });
            }
        }

        SnapshotImage {
            capture_timestamp_millis: self.clock.now_millis(),
            shard_count: self.config.shard_count,
            capacity_per_shard: self.config.capacity_per_shard as u32,
            entries,
        }
    }

    /// Takes the snapshot gate exclusively and replaces all shard content
    /// with `image`. Fails with [`StoreError::ShardCountMismatch`] before
    /// touching any shard if the image's shard count doesn't match, or with
    /// [`StoreError::Internal`] if an entry names a shard outside that range.
    /// Either check happens before the gate is taken, so a rejected restore
    /// leaves the store untouched.
    pub fn restore_snapshot(&self, image: SnapshotImage) -> Result<()> {
        if image.shard_count != self.config.shard_count {
            return Err(StoreError::ShardCountMismatch {
                image_shards: image.shard_count,
                store_shards: self.config.shard_count,
            });
        }
        if let Some(entry) = image.entries.iter().find(|e| e.shard_index >= self.config.shard_count) {
            return Err(StoreError::Internal(format!(
                "snapshot entry shard_index {} out of range for shard_count {}",
                entry.shard_index, self.config.shard_count
            )));
        }

        let _gate = self.snapshot_gate.write();

        let mut per_shard: Vec<Vec<LiveEntry>> = (0..self.config.shard_count)
            .map(|_| Vec::new())
            .collect();
        for entry in image.entries {
            per_shard[entry.shard_index as usize].push(LiveEntry {
                key: entry.key,
                value: entry.value,
                expires_at_millis: entry.expires_at_millis,
            });
        }

        for (shard, entries) in self.shards.iter().zip(per_shard.into_iter()) {
            shard.load_from_snapshot(entries);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    fn router(shard_count: u32, capacity: usize) -> (ShardRouter, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new(1_000));
        let cfg = RouterConfig::new(shard_count, capacity);
        (ShardRouter::new(cfg, clock.clone()), clock)
    }

    #[test]
    fn empty_key_routes_to_shard_zero() {
        let (r, _clock) = router(8, 4);
        assert_eq!(r.shard_index(b""), 0);
    }

    #[test]
    fn insert_get_delete_round_trip_across_shards() {
        let (r, _clock) = router(4, 16);
        for i in 0..64 {
            let key = Bytes::from(format!("key-{i}"));
            r.insert(key.clone(), Bytes::from(format!("val-{i}"))).unwrap();
        }
        assert!(r.size() <= 4 * 16);
        assert!(r.get(b"key-0").unwrap().is_some());
    }

    #[test]
    fn oversized_key_rejected_before_touching_shard() {
        let cfg = RouterConfig::new(4, 16).with_max_key_bytes(4);
        let clock = Arc::new(TestClock::new(0));
        let r = ShardRouter::new(cfg, clock);

        let err = r.insert(Bytes::from_static(b"toolong"), Bytes::from_static(b"v"));
        assert!(matches!(err, Err(StoreError::TooLarge { kind: SizeKind::Key, .. })));
        assert_eq!(r.size(), 0);
    }

    #[test]
    fn capture_and_restore_round_trip() {
        let (r, _clock) = router(4, 16);
        r.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1")).unwrap();
        r.insert(Bytes::from_static(b"b"), Bytes::from_static(b"2")).unwrap();
        r.expire(b"b", 1_000_000).unwrap();

        let image = r.capture_snapshot();
        assert_eq!(image.shard_count, 4);

        let (r2, _clock2) = router(4, 16);
        r2.restore_snapshot(image).unwrap();
        assert_eq!(r2.get(b"a").unwrap(), Some(Bytes::from_static(b"1")));
        assert_eq!(r2.get(b"b").unwrap(), Some(Bytes::from_static(b"2")));
    }

    #[test]
    fn restore_rejects_shard_count_mismatch() {
        let (r4, _clock) = router(4, 16);
        let image = r4.capture_snapshot();

        let (r8, _clock2) = router(8, 16);
        let err = r8.restore_snapshot(image);
        assert!(matches!(err, Err(StoreError::ShardCountMismatch { image_shards: 4, store_shards: 8 })));
    }

    #[test]
    fn restore_rejects_out_of_range_shard_index_without_panicking() {
        let (r, _clock) = router(4, 16);
        let image = SnapshotImage {
            capture_timestamp_millis: 0,
            shard_count: 4,
            capacity_per_shard: 16,
            entries: vec![SnapshotEntry {
                shard_index: 4,
                key: Bytes::from_static(b"a"),
                value: Bytes::from_static(b"1"),
                expires_at_millis: None,
            }],
        };
        assert!(matches!(r.restore_snapshot(image), Err(StoreError::Internal(_))));
        assert_eq!(r.size(), 0);
    }
}
