//! Storage engine: per-shard bounded LRU+TTL maps behind a hash router,
//! plus the background sweeper that reclaims expired entries.

pub mod lru_ttl;
pub mod router;
pub mod sweeper;

pub use lru_ttl::{LiveEntry, LruTtlMap};
pub use router::{RouterConfig, ShardRouter, UNBOUNDED};
pub use sweeper::BackgroundSweeper;
