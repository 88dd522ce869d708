//! Connection pool for follower links.
//!
//! Idle connections are kept per follower address. A connection is on loan
//! to exactly one packet at a time: the packet either hands it back with a
//! reuse hint or destroys it when anything went wrong on the chain, since a
//! connection with unread or half-written bytes can never be reused.

use dn_core::{DnError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle connections kept per follower address
    pub idle_per_addr: usize,
    /// Hard limit on live connections (idle + on loan)
    pub max_connections: usize,
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_per_addr: 8,
            max_connections: 1024,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// What to do with a connection handed back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseHint {
    Keep,
    Close,
}

pub struct ReplicaConnectionPool {
    idle: Mutex<HashMap<String, Vec<TcpStream>>>,
    config: PoolConfig,
    total_connections: AtomicUsize,
    draining: AtomicBool,
}

impl ReplicaConnectionPool {
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            config,
            total_connections: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
        }
    }

    /// Borrow a connection to `addr`, dialing a new one when none is idle.
    ///
    /// The live-connection slot is reserved before dialing so concurrent
    /// callers cannot overshoot `max_connections`.
    pub async fn acquire(&self, addr: &str) -> Result<TcpStream> {
        if self.draining.load(Ordering::Acquire) {
            return Err(DnError::PoolDraining);
        }

        if let Some(stream) = self
            .idle
            .lock()
            .await
            .get_mut(addr)
            .and_then(Vec::pop)
        {
            debug!(target: "datanode::pool", follower = addr, "Reusing pooled connection");
            dn_metrics::increment_connections_reused();
            return Ok(stream);
        }

        let prev = self.total_connections.fetch_add(1, Ordering::Relaxed);
        if prev >= self.config.max_connections {
            self.total_connections.fetch_sub(1, Ordering::Relaxed);
            warn!(
                target: "datanode::pool",
                follower = addr,
                current_connections = prev,
                max_connections = self.config.max_connections,
                "Connection pool exhausted"
            );
            dn_metrics::increment_pool_exhausted();
            return Err(DnError::PoolExhausted);
        }

        debug!(target: "datanode::pool", follower = addr, "Dialing follower");
        let stream = match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                self.total_connections.fetch_sub(1, Ordering::Relaxed);
                warn!(target: "datanode::pool", follower = addr, error = %e, "Failed to connect to follower");
                return Err(e.into());
            },
            Err(_) => {
                self.total_connections.fetch_sub(1, Ordering::Relaxed);
                warn!(
                    target: "datanode::pool",
                    follower = addr,
                    timeout_ms = u64::try_from(self.config.connect_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Connect to follower timed out"
                );
                return Err(DnError::timed_out("follower connect"));
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            self.total_connections.fetch_sub(1, Ordering::Relaxed);
            return Err(e.into());
        }

        dn_metrics::increment_connections();
        Ok(stream)
    }

    /// Hand a healthy connection back.
    pub async fn release(&self, addr: &str, stream: TcpStream, hint: ReuseHint) {
        if hint == ReuseHint::Keep && !self.draining.load(Ordering::Acquire) {
            let mut idle = self.idle.lock().await;
            let slot = idle.entry(addr.to_owned()).or_default();
            if slot.len() < self.config.idle_per_addr {
                slot.push(stream);
                return;
            }
        }
        drop(stream);
        self.forget_one();
    }

    /// Close a connection that may carry unread or partial frames.
    pub fn force_destroy(&self, stream: TcpStream, addr: &str) {
        debug!(target: "datanode::pool", follower = addr, "Destroying follower connection");
        drop(stream);
        dn_metrics::increment_connections_evicted();
        self.forget_one();
    }

    fn forget_one(&self) {
        self.total_connections.fetch_sub(1, Ordering::Relaxed);
        dn_metrics::decrement_connections();
    }

    pub async fn idle_count(&self, addr: &str) -> usize {
        self.idle.lock().await.get(addr).map_or(0, Vec::len)
    }

    /// Live connections, idle and on loan.
    #[inline]
    #[must_use]
    pub fn total_connections(&self) -> usize {
        self.total_connections.load(Ordering::Relaxed)
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Close every idle connection and refuse new loans. Connections still on
    /// loan are closed as they come back. Returns the number closed now.
    pub async fn drain(&self) -> usize {
        self.draining.store(true, Ordering::Release);
        let mut idle = self.idle.lock().await;
        let drained: usize = idle.drain().map(|(_, conns)| conns.len()).sum();
        for _ in 0..drained {
            self.forget_one();
        }
        debug!(target: "datanode::pool", drained, "Connection pool drained");
        drained
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn test_release_keeps_and_reuses() {
        let (_l, addr) = listener().await;
        let pool = ReplicaConnectionPool::new(PoolConfig::default());

        let conn = pool.acquire(&addr).await.unwrap();
        let local = conn.local_addr().unwrap();
        assert_eq!(pool.total_connections(), 1);

        pool.release(&addr, conn, ReuseHint::Keep).await;
        assert_eq!(pool.idle_count(&addr).await, 1);

        let again = pool.acquire(&addr).await.unwrap();
        assert_eq!(again.local_addr().unwrap(), local);
        assert_eq!(pool.idle_count(&addr).await, 0);
        assert_eq!(pool.total_connections(), 1);
    }

    #[tokio::test]
    async fn test_close_hint_and_force_destroy_drop_connection() {
        let (_l, addr) = listener().await;
        let pool = ReplicaConnectionPool::new(PoolConfig::default());

        let a = pool.acquire(&addr).await.unwrap();
        let b = pool.acquire(&addr).await.unwrap();
        assert_eq!(pool.total_connections(), 2);

        pool.release(&addr, a, ReuseHint::Close).await;
        pool.force_destroy(b, &addr);
        assert_eq!(pool.idle_count(&addr).await, 0);
        assert_eq!(pool.total_connections(), 0);
    }

    #[tokio::test]
    async fn test_idle_set_is_bounded() {
        let (_l, addr) = listener().await;
        let pool = ReplicaConnectionPool::new(PoolConfig {
            idle_per_addr: 1,
            ..PoolConfig::default()
        });

        let a = pool.acquire(&addr).await.unwrap();
        let b = pool.acquire(&addr).await.unwrap();
        pool.release(&addr, a, ReuseHint::Keep).await;
        pool.release(&addr, b, ReuseHint::Keep).await;

        assert_eq!(pool.idle_count(&addr).await, 1);
        assert_eq!(pool.total_connections(), 1);
    }

    #[tokio::test]
    async fn test_hard_cap() {
        let (_l, addr) = listener().await;
        let pool = ReplicaConnectionPool::new(PoolConfig {
            max_connections: 1,
            ..PoolConfig::default()
        });

        let held = pool.acquire(&addr).await.unwrap();
        assert!(matches!(pool.acquire(&addr).await, Err(DnError::PoolExhausted)));

        pool.release(&addr, held, ReuseHint::Keep).await;
        assert!(pool.acquire(&addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_dial_releases_slot() {
        let (l, addr) = listener().await;
        drop(l);
        let pool = ReplicaConnectionPool::new(PoolConfig::default());

        assert!(pool.acquire(&addr).await.is_err());
        assert_eq!(pool.total_connections(), 0);
    }

    #[tokio::test]
    async fn test_drain_closes_idle_and_refuses() {
        let (_l, addr) = listener().await;
        let pool = ReplicaConnectionPool::new(PoolConfig::default());

        let idle = pool.acquire(&addr).await.unwrap();
        let loaned = pool.acquire(&addr).await.unwrap();
        pool.release(&addr, idle, ReuseHint::Keep).await;

        assert_eq!(pool.drain().await, 1);
        assert_eq!(pool.total_connections(), 1);
        assert!(matches!(pool.acquire(&addr).await, Err(DnError::PoolDraining)));

        pool.release(&addr, loaned, ReuseHint::Keep).await;
        assert_eq!(pool.idle_count(&addr).await, 0);
        assert_eq!(pool.total_connections(), 0);
    }
}
