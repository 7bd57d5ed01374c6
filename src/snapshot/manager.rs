//! Snapshot lifecycle: on-demand save/load, periodic scheduling, retention.
//!
//! Writes are atomic: the encoded image goes to `<name>.bin.tmp` first, then
//! `fs::rename` swaps it into place, so a crash or concurrent reader never
//! observes a partially-written snapshot file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::snapshot::codec::{self, SnapshotImage};
use crate::storage::router::ShardRouter;

const STOP_GRACE: Duration = Duration::from_secs(5);
const FILE_PREFIX: &str = "snapshot-";
const FILE_SUFFIX: &str = ".bin";

/// Coordinates snapshot capture/restore against a [`ShardRouter`] and the
/// on-disk snapshot directory.
pub struct SnapshotManager {
    router: Arc<ShardRouter>,
    dir: PathBuf,
    tmp_counter: AtomicU64,
    periodic: std::sync::Mutex<Option<(JoinHandle<()>, oneshot::Sender<()>)>>,
}

impl SnapshotManager {
    pub fn new(router: Arc<ShardRouter>, dir: impl Into<PathBuf>) -> Self {
        SnapshotManager {
            router,
            dir: dir.into(),
            tmp_counter: AtomicU64::new(0),
            periodic: std::sync::Mutex::new(None),
        }
    }

    fn file_path_for(&self, capture_timestamp_millis: i64, collision_suffix: u64) -> PathBuf {
        if collision_suffix == 0 {
            self.dir
                .join(format!("{FILE_PREFIX}{capture_timestamp_millis}{FILE_SUFFIX}"))
        } else {
            self.dir.join(format!(
                "{FILE_PREFIX}{capture_timestamp_millis}-{collision_suffix}{FILE_SUFFIX}"
            ))
        }
    }

    /// Picks a filename for `capture_timestamp_millis`, appending a
    /// monotonically increasing counter if two captures land in the same
    /// millisecond.
    fn next_available_path(&self, capture_timestamp_millis: i64) -> PathBuf {
        let mut suffix = 0u64;
        loop {
            let candidate = self.file_path_for(capture_timestamp_millis, suffix);
            if !candidate.exists() {
                return candidate;
            }
            suffix += 1;
        }
    }

    fn tmp_path_for(&self, final_path: &Path) -> PathBuf {
        let suffix = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let mut tmp = final_path.as_os_str().to_owned();
        tmp.push(format!(".{suffix}.tmp"));
        PathBuf::from(tmp)
    }

    /// Captures the live store and writes it to `snapshot-<timestamp>.bin`
    /// (or `snapshot-<timestamp>-<n>.bin` if that name is already taken),
    /// returning the path written.
    pub async fn save_snapshot(&self) -> Result<PathBuf> {
        let image = self.router.capture_snapshot();
        let dir = self.dir.clone();
        let timestamp = image.capture_timestamp_millis;

        let (final_path, tmp_path) = {
            std::fs::create_dir_all(&dir).map_err(|e| StoreError::io_at(dir.clone(), e))?;
            let final_path = self.next_available_path(timestamp);
            let tmp_path = self.tmp_path_for(&final_path);
            (final_path, tmp_path)
        };
        let log_path = final_path.clone();
        let write_final_path = final_path.clone();
        let write_tmp_path = tmp_path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let bytes = codec::encode(&image);
            std::fs::write(&write_tmp_path, &bytes)
                .map_err(|e| StoreError::io_at(write_tmp_path.clone(), e))?;
            std::fs::rename(&write_tmp_path, &write_final_path)
                .map_err(|e| StoreError::io_at(write_final_path.clone(), e))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Internal(format!("save_snapshot task panicked: {e}")))??;

        info!(path = %log_path.display(), "snapshot saved");
        Ok(log_path)
    }

    /// True if `name` matches `snapshot-<ts>.bin` or the collision-suffixed
    /// `snapshot-<ts>-<n>.bin`.
    fn is_snapshot_name(name: &str) -> bool {
        let Some(rest) = name.strip_prefix(FILE_PREFIX).and_then(|r| r.strip_suffix(FILE_SUFFIX)) else {
            return false;
        };
        match rest.split_once('-') {
            Some((ts, suffix)) => ts.parse::<i64>().is_ok() && suffix.parse::<u64>().is_ok(),
            None => rest.parse::<i64>().is_ok(),
        }
    }

    /// Lists snapshot files in the directory, newest first by last-modified
    /// time, per spec.
    fn list_snapshots_blocking(dir: &Path) -> Result<Vec<(std::time::SystemTime, PathBuf)>> {
        let mut found: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        let read_dir = match std::fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io_at(dir, e)),
        };

        for entry in read_dir {
            let entry = entry.map_err(|e| StoreError::io_at(dir, e))?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !Self::is_snapshot_name(name) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map_err(|e| StoreError::io_at(&path, e))?;
            found.push((modified, path));
        }

        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found)
    }

    /// Loads and restores the most recent snapshot file (by last-modified
    /// time) in the directory. Returns `false` if no snapshot file exists.
    pub async fn load_latest_snapshot(&self) -> Result<bool> {
        let dir = self.dir.clone();
        let mut found = tokio::task::spawn_blocking(move || Self::list_snapshots_blocking(&dir))
            .await
            .map_err(|e| StoreError::Internal(format!("load_latest_snapshot task panicked: {e}")))??;

        if found.is_empty() {
            return Ok(false);
        }

        let (_, latest) = found.remove(0);
        self.load_snapshot(&latest).await
    }

    /// Loads and restores a specific snapshot file. Returns `false` if the
    /// path doesn't exist.
    pub async fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref().to_owned();
        let read_path = path.clone();
        let bytes = match tokio::task::spawn_blocking(move || std::fs::read(&read_path))
            .await
            .map_err(|e| StoreError::Internal(format!("load_snapshot task panicked: {e}")))?
        {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StoreError::io_at(path, e)),
        };

        let image: SnapshotImage = codec::decode(&bytes)?;
        self.router.restore_snapshot(image)?;
        info!(path = %path.display(), "snapshot restored");
        Ok(true)
    }

    /// Deletes all but the `keep` newest (by last-modified time) snapshot
    /// files in the directory.
    pub async fn cleanup_old_snapshots(&self, keep: usize) -> Result<usize> {
        let dir = self.dir.clone();
        let found = tokio::task::spawn_blocking(move || Self::list_snapshots_blocking(&dir))
            .await
            .map_err(|e| StoreError::Internal(format!("cleanup_old_snapshots task panicked: {e}")))??;

        if found.len() <= keep {
            return Ok(0);
        }

        let to_delete: Vec<PathBuf> = found.into_iter().skip(keep).map(|(_, path)| path).collect();
        let removed = to_delete.len();

        tokio::task::spawn_blocking(move || -> Result<()> {
            for path in to_delete {
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(StoreError::io_at(path, e));
                    }
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Internal(format!("cleanup_old_snapshots task panicked: {e}")))??;

        Ok(removed)
    }

    /// Spawns a task that calls [`Self::save_snapshot`] every
    /// `interval_millis`, pruning down to `retain` files after each
    /// successful save. Fails with [`StoreError::AlreadyRunning`] if a
    /// schedule is already active.
    pub fn start_periodic(self: &Arc<Self>, interval_millis: u64, retain: usize) -> Result<()> {
        let mut guard = self.periodic.lock().expect("periodic handle lock poisoned");
        if guard.is_some() {
            return Err(StoreError::AlreadyRunning);
        }
        if interval_millis == 0 {
            return Err(StoreError::InvalidArgument(
                "snapshot interval_millis must be positive".into(),
            ));
        }

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let manager = self.clone();
        let period = Duration::from_millis(interval_millis);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match manager.save_snapshot().await {
                            Ok(_) => {
                                if let Err(err) = manager.cleanup_old_snapshots(retain).await {
                                    warn!(error = %err, "snapshot retention cleanup failed");
                                }
                            }
                            Err(err) => warn!(error = %err, "periodic snapshot save failed"),
                        }
                    }
                    _ = &mut stop_rx => {
                        info!("periodic snapshot task stopping");
                        break;
                    }
                }
            }
        });

        *guard = Some((join, stop_tx));
        Ok(())
    }

    /// Signals the periodic schedule to stop and joins it within a bounded
    /// grace period. Fails with [`StoreError::NotRunning`] if nothing is
    /// active.
    pub async fn stop_periodic(&self) -> Result<()> {
        let pair = self
            .periodic
            .lock()
            .expect("periodic handle lock poisoned")
            .take();

        let (join, stop_tx) = match pair {
            Some(pair) => pair,
            None => return Err(StoreError::NotRunning),
        };

        let _ = stop_tx.send(());
        match tokio::time::timeout(STOP_GRACE, join).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "periodic snapshot task panicked"),
            Err(_) => warn!("periodic snapshot task did not stop within grace period"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::storage::router::RouterConfig;
    use bytes::Bytes;

    fn manager_with_tempdir() -> (Arc<SnapshotManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(TestClock::new(1_700_000_000_000));
        let router = Arc::new(ShardRouter::new(RouterConfig::new(4, 16), clock));
        let manager = Arc::new(SnapshotManager::new(router, dir.path()));
        (manager, dir)
    }

    #[tokio::test]
    async fn save_then_load_latest_round_trips() {
        let (manager, _dir) = manager_with_tempdir();
        manager.router.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1")).unwrap();

        let path = manager.save_snapshot().await.unwrap();
        assert!(path.exists());

        manager.router.clear();
        assert_eq!(manager.router.size(), 0);

        assert!(manager.load_latest_snapshot().await.unwrap());
        assert_eq!(manager.router.get(b"a").unwrap(), Some(Bytes::from_static(b"1")));
    }

    #[tokio::test]
    async fn load_latest_returns_false_when_directory_empty() {
        let (manager, _dir) = manager_with_tempdir();
        assert!(!manager.load_latest_snapshot().await.unwrap());
    }

    #[tokio::test]
    async fn load_snapshot_returns_false_for_missing_path() {
        let (manager, dir) = manager_with_tempdir();
        let missing = dir.path().join("snapshot-1-missing.bin");
        assert!(!manager.load_snapshot(&missing).await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_keeps_only_newest() {
        let (manager, _dir) = manager_with_tempdir();

        for _ in 0..3 {
            manager.save_snapshot().await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let removed = manager.cleanup_old_snapshots(1).await.unwrap();
        assert_eq!(removed, 2);

        let remaining = SnapshotManager::list_snapshots_blocking(&manager.dir).unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn periodic_double_start_rejected() {
        let (manager, _dir) = manager_with_tempdir();
        manager.start_periodic(1000, 5).unwrap();
        assert!(matches!(
            manager.start_periodic(1000, 5),
            Err(StoreError::AlreadyRunning)
        ));
        manager.stop_periodic().await.unwrap();
    }

    #[tokio::test]
    async fn periodic_schedule_prunes_to_retain_count() {
        let (manager, _dir) = manager_with_tempdir();
        manager.start_periodic(10, 1).unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        manager.stop_periodic().await.unwrap();

        let remaining = SnapshotManager::list_snapshots_blocking(&manager.dir).unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn stop_periodic_without_start_rejected() {
        let (manager, _dir) = manager_with_tempdir();
        assert!(matches!(
            manager.stop_periodic().await,
            Err(StoreError::NotRunning)
        ));
    }
}
