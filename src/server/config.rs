//! Server Configuration

use std::path::PathBuf;

use crate::storage::UNBOUNDED;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address
    pub bind: String,

    /// Port number
    pub port: u16,

    /// Shard count; must be a power of two
    pub shard_count: u32,

    /// Max live entries held by each shard
    pub capacity_per_shard: usize,

    /// Max key size in bytes; `UNBOUNDED` disables the check
    pub max_key_bytes: usize,

    /// Max value size in bytes; `UNBOUNDED` disables the check
    pub max_value_bytes: usize,

    /// Background TTL sweep interval in milliseconds
    pub sweep_interval_millis: u64,

    /// Directory snapshot files are written to and loaded from
    pub snapshot_dir: PathBuf,

    /// Periodic snapshot interval in milliseconds; 0 disables periodic saves
    pub snapshot_interval_millis: u64,

    /// Number of newest snapshots to retain after each periodic save
    pub snapshot_retain: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 6380,
            shard_count: 16,
            capacity_per_shard: 10_000,
            max_key_bytes: UNBOUNDED,
            max_value_bytes: UNBOUNDED,
            sweep_interval_millis: 1_000,
            snapshot_dir: PathBuf::from("snapshots"),
            snapshot_interval_millis: 0,
            snapshot_retain: 5,
        }
    }
}

impl Config {
    /// Create a new config with custom port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Create a new config with custom bind address
    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    pub fn with_shard_count(mut self, shard_count: u32) -> Self {
        self.shard_count = shard_count;
        self
    }

    pub fn with_capacity_per_shard(mut self, capacity: usize) -> Self {
        self.capacity_per_shard = capacity;
        self
    }

    pub fn with_max_key_bytes(mut self, limit: usize) -> Self {
        self.max_key_bytes = limit;
        self
    }

    pub fn with_max_value_bytes(mut self, limit: usize) -> Self {
        self.max_value_bytes = limit;
        self
    }

    pub fn with_sweep_interval_millis(mut self, interval: u64) -> Self {
        self.sweep_interval_millis = interval;
        self
    }

    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }

    pub fn with_snapshot_interval_millis(mut self, interval: u64) -> Self {
        self.snapshot_interval_millis = interval;
        self
    }

    pub fn with_snapshot_retain(mut self, retain: usize) -> Self {
        self.snapshot_retain = retain;
        self
    }
}
