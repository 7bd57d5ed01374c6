//! Error taxonomy shared across the storage engine, router, and snapshot subsystem.

use std::path::PathBuf;

use thiserror::Error;

/// The kind of size limit an oversized insert violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeKind {
    Key,
    Value,
}

impl std::fmt::Display for SizeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeKind::Key => write!(f, "key"),
            SizeKind::Value => write!(f, "value"),
        }
    }
}

/// Errors surfaced by the storage engine, shard router, and snapshot manager.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A non-positive TTL, negative retention count, or non-positive interval.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A key or value exceeded its configured size limit.
    #[error("{kind} too large: size={size} limit={limit}")]
    TooLarge {
        kind: SizeKind,
        size: usize,
        limit: usize,
    },

    /// Reserved for snapshot-file lookups; store point operations return
    /// "absent" rather than this error.
    #[error("not found: {0}")]
    NotFound(String),

    /// `restoreSnapshot` was given an image whose shard count does not match
    /// the live router.
    #[error("shard count mismatch: image has {image_shards}, store has {store_shards}")]
    ShardCountMismatch {
        image_shards: u32,
        store_shards: u32,
    },

    /// The snapshot file's version byte is not one this codec understands.
    #[error("incompatible snapshot version: {found}")]
    IncompatibleVersion { found: u8 },

    /// The snapshot bytes were malformed (truncated, bad magic, bad CRC, ...).
    #[error("snapshot decode error: {0}")]
    DecodeError(String),

    /// An underlying filesystem operation failed.
    #[error("io error at {path:?}: {source}")]
    IoError {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    /// `startPeriodic` was called while a schedule was already running.
    #[error("periodic task already running")]
    AlreadyRunning,

    /// `stopPeriodic` was called while no schedule was running.
    #[error("periodic task not running")]
    NotRunning,

    /// An invariant was violated; the caller cannot recover from this.
    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn io(source: std::io::Error) -> Self {
        StoreError::IoError { path: None, source }
    }

    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::IoError {
            path: Some(path.into()),
            source,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(source: std::io::Error) -> Self {
        StoreError::io(source)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
