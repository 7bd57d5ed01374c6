//! shardkv — a sharded in-memory key-value store with bounded per-shard LRU
//! eviction, absolute-time TTL expiration, and atomic point-in-time
//! snapshot persistence.

pub mod clock;
pub mod error;
pub mod server;
pub mod snapshot;
pub mod stats;
pub mod storage;

pub use clock::{Clock, SystemClock};
pub use error::{Result, SizeKind, StoreError};
pub use server::{Config, Server};
pub use snapshot::{SnapshotEntry, SnapshotImage, SnapshotManager};
pub use stats::{StatsCounters, StatsSnapshot};
pub use storage::{BackgroundSweeper, LruTtlMap, RouterConfig, ShardRouter};
