//! Binary snapshot codec and save/load/retention lifecycle.

pub mod codec;
pub mod manager;

pub use codec::{SnapshotEntry, SnapshotImage};
pub use manager::SnapshotManager;
