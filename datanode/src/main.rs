#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod config;
mod server;
mod shutdown;
mod store;

use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "datanode")]
#[command(about = "Replica-chain data-node")]
#[command(version)]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0:17310")]
    listen: SocketAddr,

    #[arg(long, default_value = "cfs")]
    cluster_id: String,

    /// Client read deadline in seconds (0 disables it)
    #[arg(long, default_value = "60")]
    client_read_timeout: u64,

    /// Follower reply deadline in seconds (0 disables it)
    #[arg(long, default_value = "30")]
    follower_read_timeout: u64,

    #[arg(long, default_value = "1024")]
    max_connections: usize,

    #[arg(long)]
    no_metrics: bool,

    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    gen_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Some(path) = &args.gen_config {
        if let Err(e) = generate_config(path) {
            eprintln!("Failed to generate config: {e}");
            std::process::exit(1);
        }
        println!("Generated default config at: {}", path.display());
        return;
    }

    init_tracing();

    let config = match &args.config {
        Some(path) => match config::Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                error!(
                    target: "datanode",
                    error = %e,
                    path = %path.display(),
                    "Failed to load config file"
                );
                std::process::exit(1);
            },
        },
        None => config::Config::from_args(&args),
    };

    info!(
        target: "datanode",
        version = env!("CARGO_PKG_VERSION"),
        cluster_id = %config.cluster_id,
        listen = %config.listen_addr,
        "Starting data-node"
    );

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let shutdown_signal = shutdown::stop_on(shutdown::termination_signal(), shutdown_tx.clone());

    let mut server_handle = tokio::spawn(server::run(config, shutdown_tx.subscribe()));

    tokio::select! {
        () = shutdown_signal => {
            info!(target: "datanode", "Shutdown signal received");
        }
        result = &mut server_handle => {
            log_server_exit(result);
            return;
        }
    }

    let clean = shutdown::drain_with_timeout(shutdown::DRAIN_TIMEOUT).await;
    if clean {
        info!(target: "datanode", "Graceful drain complete");
    } else {
        tracing::warn!(target: "datanode", "Drain timed out, some packets may be unanswered");
    }

    log_server_exit(server_handle.await);
    info!(target: "datanode", "Data-node shutdown complete");
}

fn log_server_exit(result: Result<dn_core::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!(target: "datanode", "Server exited cleanly"),
        Ok(Err(e)) => error!(target: "datanode", error = %e, "Server error"),
        Err(e) => error!(target: "datanode", error = %e, "Server task panicked"),
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,datanode=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

fn generate_config(path: &Path) -> std::io::Result<()> {
    let config = config::Config::default();

    let content = format!(
        r#"# Data-node configuration
# Generated by: datanode --gen-config {}
#
# All values shown are defaults.

# Prefix of the per-opcode latency timer keys
cluster_id = "{}"

# Address for client and replica connections
listen_addr = "{}"

# Read deadlines in seconds; 0 waits indefinitely
client_read_timeout_secs = {}
follower_read_timeout_secs = {}

[pool]
# Idle connections kept per follower address
idle_per_addr = {}
# Hard limit on live follower connections
max_connections = {}
connect_timeout_ms = {}

[buffers]
# Pre-allocated header and full-block buffers
header_pool_size = {}
block_pool_size = {}

[metrics]
enabled = {}
# Timer samples beyond this backlog are dropped
channel_capacity = {}

[store]
capacity_bytes = {}
"#,
        path.display(),
        config.cluster_id,
        config.listen_addr,
        config.client_read_timeout_secs,
        config.follower_read_timeout_secs,
        config.pool.idle_per_addr,
        config.pool.max_connections,
        config.pool.connect_timeout_ms,
        config.buffers.header_pool_size,
        config.buffers.block_pool_size,
        config.metrics.enabled,
        config.metrics.channel_capacity,
        config.store.capacity_bytes,
    );

    std::fs::write(path, content)
}
