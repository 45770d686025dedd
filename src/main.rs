//! Broadcast node speaking the JSON-lines node protocol on stdin/stdout.
//!
//! Logs go to stderr; stdout carries only protocol messages.

use anyhow::{Context, Result};
use clap::Parser;
use ringcast::{NodeConfig, Runner, Strategy};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ringcast")]
#[command(about = "Peer-to-peer value broadcast node with ring anti-entropy")]
#[command(version)]
struct Cli {
    /// Dissemination strategy: direct, or ring (forward once plus anti-entropy)
    #[arg(short, long, default_value = "ring", env = "RINGCAST_STRATEGY")]
    strategy: Strategy,

    /// Anti-entropy interval in milliseconds
    #[arg(long, default_value = "1000", env = "RINGCAST_SYNC_INTERVAL_MS")]
    sync_interval_ms: u64,

    /// Timeout for a sync RPC in milliseconds
    #[arg(long, default_value = "1000", env = "RINGCAST_RPC_TIMEOUT_MS")]
    rpc_timeout_ms: u64,
}

impl Cli {
    fn config(&self) -> NodeConfig {
        NodeConfig::new()
            .with_strategy(self.strategy)
            .with_sync_interval(Duration::from_millis(self.sync_interval_ms))
            .with_rpc_timeout(Duration::from_millis(self.rpc_timeout_ms))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ringcast=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = cli.config();
    tracing::info!(
        strategy = %config.strategy,
        sync_interval_ms = cli.sync_interval_ms,
        rpc_timeout_ms = cli.rpc_timeout_ms,
        "starting node"
    );

    Runner::new(config)
        .run()
        .await
        .context("node terminated with an error")?;

    Ok(())
}
