mod connection;

use crate::config::Config;
use crate::store::MemoryStore;
use dn_core::{BufferPool, Result};
use dn_metrics::{Collector, CounterSnapshot, HistogramBackend, MetricsBackend, TracingBackend};
use dn_repl::{ExtentStore, Forwarder, ReplicaConnectionPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};

pub use connection::handle_connection;

/// State shared by every connection of one data-node.
pub struct ServerContext {
    pub cluster_id: String,
    pub client_read_timeout: Option<Duration>,
    pub store: Arc<dyn ExtentStore>,
    pub buffers: Arc<BufferPool>,
    pub forwarder: Forwarder,
    pub collector: Collector,
}

impl ServerContext {
    pub fn new(config: &Config, store: Arc<dyn ExtentStore>, collector: Collector) -> Self {
        let buffers = Arc::new(BufferPool::new(config.buffer_config()));
        let pool = Arc::new(ReplicaConnectionPool::new(config.pool_config()));
        Self {
            cluster_id: config.cluster_id.clone(),
            client_read_timeout: config.client_read_timeout(),
            store,
            forwarder: Forwarder::new(pool, Arc::clone(&buffers), config.forward_config()),
            buffers,
            collector,
        }
    }
}

pub async fn run(config: Config, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    let histograms = Arc::new(HistogramBackend::new());
    let (collector, collector_task) = if config.metrics.enabled {
        let backends: Vec<Arc<dyn MetricsBackend>> = vec![
            Arc::clone(&histograms) as Arc<dyn MetricsBackend>,
            Arc::new(TracingBackend),
        ];
        let (collector, task) = Collector::start(config.metrics.channel_capacity, backends);
        (collector, Some(task))
    } else {
        (Collector::disabled(), None)
    };

    let store = Arc::new(MemoryStore::new(config.store.capacity_bytes));
    let ctx = Arc::new(ServerContext::new(&config, store, collector));

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(
        target: "datanode::server",
        addr = %config.listen_addr,
        cluster_id = %config.cluster_id,
        "Listening for connections"
    );

    serve(listener, Arc::clone(&ctx), shutdown_rx).await;

    let drained = ctx.forwarder.pool().drain().await;
    debug!(target: "datanode::server", drained, "Follower connections closed");

    // Connection tasks hold the last collector clones; stop waiting once the
    // queue has had a moment to flush
    drop(ctx);
    if let Some(task) = collector_task {
        let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
    }
    for key in histograms.keys() {
        if let Some(snapshot) = histograms.snapshot(&key) {
            info!(
                target: "datanode::metrics",
                key = %key,
                count = snapshot.count,
                avg_us = snapshot.avg_us(),
                p99_us = snapshot.p99(),
                "Operation latency"
            );
        }
    }
    let counters = CounterSnapshot::capture();
    info!(target: "datanode::metrics", ?counters, "Final counters");

    info!(target: "datanode::server", "Server shutdown complete");
    Ok(())
}

/// Accept connections until a shutdown signal arrives.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, addr)) => {
                        let _ = stream.set_nodelay(true);
                        trace!(target: "datanode::server", peer = %addr, "Connection accepted");

                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &ctx).await {
                                debug!(target: "datanode::server", peer = %addr, error = %e, "Connection closed");
                            }
                        });
                    }
                    Err(e) => {
                        error!(target: "datanode::server", error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!(target: "datanode::server", "Shutdown signal received, stopping accept loop");
                break;
            }
        }
    }
}
