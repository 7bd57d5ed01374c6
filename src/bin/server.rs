//! Binary entry point: parses CLI flags, initializes tracing, runs the server.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use shardkv::server::{Config, Server};

/// Sharded in-memory key-value store with LRU+TTL eviction and snapshotting.
#[derive(Parser, Debug)]
#[command(name = "shardkv-server", version, about)]
struct Cli {
    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port number
    #[arg(long, default_value_t = 6380)]
    port: u16,

    /// Shard count; must be a power of two
    #[arg(long, default_value_t = 16)]
    shards: u32,

    /// Max live entries held by each shard
    #[arg(long, default_value_t = 10_000)]
    capacity_per_shard: usize,

    /// Max key size in bytes (0 = unbounded)
    #[arg(long, default_value_t = 0)]
    max_key_bytes: usize,

    /// Max value size in bytes (0 = unbounded)
    #[arg(long, default_value_t = 0)]
    max_value_bytes: usize,

    /// Background TTL sweep interval in milliseconds (0 disables sweeping)
    #[arg(long, default_value_t = 1_000)]
    sweep_interval_millis: u64,

    /// Directory snapshot files are written to and loaded from
    #[arg(long, default_value = "snapshots")]
    snapshot_dir: String,

    /// Periodic snapshot interval in milliseconds (0 disables periodic saves)
    #[arg(long, default_value_t = 0)]
    snapshot_interval_millis: u64,

    /// Number of newest snapshots to retain after each periodic save
    #[arg(long, default_value_t = 5)]
    snapshot_retain: usize,

    /// Load the most recent snapshot from `snapshot_dir` before serving
    #[arg(long, default_value_t = false)]
    restore_on_start: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if !cli.shards.is_power_of_two() {
        anyhow::bail!("--shards must be a power of two, got {}", cli.shards);
    }

    let config = Config::default()
        .with_bind(cli.bind)
        .with_port(cli.port)
        .with_shard_count(cli.shards)
        .with_capacity_per_shard(cli.capacity_per_shard)
        .with_max_key_bytes(if cli.max_key_bytes == 0 { usize::MAX } else { cli.max_key_bytes })
        .with_max_value_bytes(if cli.max_value_bytes == 0 { usize::MAX } else { cli.max_value_bytes })
        .with_sweep_interval_millis(cli.sweep_interval_millis)
        .with_snapshot_dir(cli.snapshot_dir)
        .with_snapshot_interval_millis(cli.snapshot_interval_millis)
        .with_snapshot_retain(cli.snapshot_retain);

    let server = Server::new(config);

    if cli.restore_on_start {
        if server.restore_latest_snapshot().await? {
            tracing::info!("restored from latest snapshot");
        } else {
            tracing::info!("no snapshot found, starting empty");
        }
    }

    server.run().await?;
    Ok(())
}
