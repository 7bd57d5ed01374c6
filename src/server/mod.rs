//! Server Module
//!
//! TCP accept loop dispatching the line protocol into the storage engine.

mod config;
mod handler;
pub mod protocol;

pub use config::Config;
pub use handler::Handler;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::clock::SystemClock;
use crate::error::Result;
use crate::snapshot::SnapshotManager;
use crate::storage::{BackgroundSweeper, RouterConfig, ShardRouter};

/// Ties the shard router, background sweeper, and snapshot manager together
/// behind a TCP accept loop.
pub struct Server {
    config: Config,
    router: Arc<ShardRouter>,
    sweeper: Arc<BackgroundSweeper>,
    snapshots: Arc<SnapshotManager>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let router_config = RouterConfig::new(config.shard_count, config.capacity_per_shard)
            .with_max_key_bytes(config.max_key_bytes)
            .with_max_value_bytes(config.max_value_bytes);
        let router = Arc::new(ShardRouter::new(router_config, Arc::new(SystemClock)));
        let sweeper = Arc::new(BackgroundSweeper::new(router.clone()));
        let snapshots = Arc::new(SnapshotManager::new(router.clone(), config.snapshot_dir.clone()));

        Server {
            config,
            router,
            sweeper,
            snapshots,
        }
    }

    pub fn router(&self) -> &Arc<ShardRouter> {
        &self.router
    }

    pub fn snapshots(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    /// Loads the most recent snapshot from the configured directory.
    /// Returns `false` if the directory has no snapshot files; that is not
    /// an error.
    pub async fn restore_latest_snapshot(&self) -> Result<bool> {
        self.snapshots.load_latest_snapshot().await
    }

    /// Binds the listener, starts background tasks, and serves connections
    /// until the process is killed.
    pub async fn run(self) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.config.bind, self.config.port);
        let listener = TcpListener::bind(&addr).await?;

        info!(%addr, shards = self.config.shard_count, "server listening");

        if self.config.sweep_interval_millis > 0 {
            self.sweeper
                .start(self.config.sweep_interval_millis)
                .expect("sweeper was not already running at startup");
        }

        if self.config.snapshot_interval_millis > 0 {
            self.snapshots
                .start_periodic(self.config.snapshot_interval_millis, self.config.snapshot_retain)
                .expect("snapshot schedule was not already running at startup");
        }

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    info!(%peer_addr, "new connection");
                    let router = self.router.clone();

                    tokio::spawn(async move {
                        let handler = Handler::new(router);
                        if let Err(err) = handler.run(socket).await {
                            error!(%peer_addr, error = %err, "connection error");
                        }
                    });
                }
                Err(err) => {
                    error!(error = %err, "accept error");
                }
            }
        }
    }
}
