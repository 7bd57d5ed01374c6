//! Background TTL sweeper that periodically drives `ShardRouter::sweep_expired`.
//!
//! Mirrors the teacher's single-dedicated-task pattern for periodic work:
//! one `tokio::task` driven by `tokio::time::interval`, stopped via a
//! cancellation channel with a bounded grace period on join.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::storage::router::ShardRouter;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Periodically sweeps expired entries out of every shard.
pub struct BackgroundSweeper {
    router: Arc<ShardRouter>,
    running: AtomicBool,
    handle: std::sync::Mutex<Option<(JoinHandle<()>, oneshot::Sender<()>)>>,
}

impl BackgroundSweeper {
    pub fn new(router: Arc<ShardRouter>) -> Self {
        BackgroundSweeper {
            router,
            running: AtomicBool::new(false),
            handle: std::sync::Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the sweep loop at `interval_millis`. Fails with
    /// [`StoreError::AlreadyRunning`] if a loop is already active.
    pub fn start(&self, interval_millis: u64) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(StoreError::AlreadyRunning);
        }
        if interval_millis == 0 {
            self.running.store(false, Ordering::SeqCst);
            return Err(StoreError::InvalidArgument(
                "sweep interval_millis must be positive".into(),
            ));
        }

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let router = self.router.clone();
        let period = Duration::from_millis(interval_millis);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = router.sweep_expired();
                        if removed > 0 {
                            debug!(removed, "background sweep removed expired entries");
                        }
                    }
                    _ = &mut stop_rx => {
                        info!("background sweeper stopping");
                        break;
                    }
                }
            }
        });

        *self.handle.lock().expect("sweeper handle lock poisoned") = Some((join, stop_tx));
        Ok(())
    }

    /// Signals the sweep loop to stop and joins it, waiting up to a bounded
    /// grace period. Fails with [`StoreError::NotRunning`] if nothing is active.
    pub async fn stop(&self) -> Result<()> {
        let pair = self
            .handle
            .lock()
            .expect("sweeper handle lock poisoned")
            .take();

        let (join, stop_tx) = match pair {
            Some(pair) => pair,
            None => return Err(StoreError::NotRunning),
        };

        let _ = stop_tx.send(());
        match tokio::time::timeout(STOP_GRACE, join).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "sweeper task panicked"),
            Err(_) => warn!("sweeper task did not stop within grace period"),
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::storage::router::RouterConfig;

    fn router() -> Arc<ShardRouter> {
        let clock = Arc::new(TestClock::new(0));
        Arc::new(ShardRouter::new(RouterConfig::new(4, 16), clock))
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let sweeper = BackgroundSweeper::new(router());
        sweeper.start(50).unwrap();
        assert!(matches!(sweeper.start(50), Err(StoreError::AlreadyRunning)));
        sweeper.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_is_rejected() {
        let sweeper = BackgroundSweeper::new(router());
        assert!(matches!(sweeper.stop().await, Err(StoreError::NotRunning)));
    }

    #[tokio::test]
    async fn start_then_stop_clears_running_flag() {
        let sweeper = BackgroundSweeper::new(router());
        sweeper.start(20).unwrap();
        assert!(sweeper.is_running());
        sweeper.stop().await.unwrap();
        assert!(!sweeper.is_running());
    }
}
