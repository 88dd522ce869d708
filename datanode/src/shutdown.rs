//! Graceful shutdown for the data-node.
//!
//! A signal stops the accept loop through the broadcast channel; packets
//! already being handled are given `DRAIN_TIMEOUT` to be answered before the
//! process exits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{info, warn};

pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(25);

/// Packets between decode and reply
pub static IN_FLIGHT_PACKETS: AtomicU64 = AtomicU64::new(0);

#[inline]
pub fn begin_packet() {
    IN_FLIGHT_PACKETS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn end_packet() {
    IN_FLIGHT_PACKETS.fetch_sub(1, Ordering::Relaxed);
}

#[inline]
pub fn in_flight_count() -> u64 {
    IN_FLIGHT_PACKETS.load(Ordering::Relaxed)
}

/// Name of the first termination signal delivered to the process.
#[cfg(unix)]
pub async fn termination_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    Ok(tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = interrupt.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
pub async fn termination_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}

/// Stop the accept loop once `signal` resolves.
///
/// If the listener cannot be installed the data-node keeps serving and this
/// future never completes; it then only stops when the server task exits.
pub async fn stop_on<F>(signal: F, shutdown_tx: broadcast::Sender<()>)
where
    F: std::future::Future<Output = std::io::Result<&'static str>>,
{
    match signal.await {
        Ok(name) => {
            info!(target: "datanode::shutdown", signal = name, "Stopping accept loop");
            request_shutdown(&shutdown_tx);
        },
        Err(e) => {
            warn!(target: "datanode::shutdown", error = %e, "No termination signal listener");
            std::future::pending::<()>().await;
        },
    }
}

pub fn request_shutdown(shutdown_tx: &broadcast::Sender<()>) {
    let _ = shutdown_tx.send(());
}

/// Wait for in-flight packets to be answered. Returns false on timeout.
pub async fn drain_with_timeout(timeout: Duration) -> bool {
    info!(
        target: "datanode::shutdown",
        timeout_secs = timeout.as_secs(),
        "Beginning drain sequence"
    );

    let start = Instant::now();
    loop {
        let count = in_flight_count();
        if count == 0 {
            break;
        }

        if start.elapsed() > timeout {
            warn!(
                target: "datanode::shutdown",
                in_flight = count,
                "Drain timeout exceeded, forcing shutdown"
            );
            return false;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    info!(
        target: "datanode::shutdown",
        elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Drain sequence complete"
    );
    true
}
