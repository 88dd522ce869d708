//! Relaying packets to the followers of a partition.
//!
//! The primary writes one relayed copy of the packet to every follower named
//! in the descriptor blob, applies the packet locally, then collects one reply
//! per follower. Relayed copies carry hop count 0 and no descriptor blob, so
//! each follower applies the packet and answers without relaying further.
//!
//! Every follower connection taken for a packet is resolved by `finish`:
//! handed back for reuse when the whole chain succeeded, destroyed otherwise.

use crate::packet::ReplPacket;
use crate::pool::{ReplicaConnectionPool, ReuseHint};
use dn_core::{BufferPool, DnError, Result};
use dn_wire::{Action, Packet, ResultCode};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Deadline for each follower reply; `None` waits indefinitely
    pub follower_read_timeout: Option<Duration>,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            follower_read_timeout: Some(Duration::from_secs(30)),
        }
    }
}

pub struct Forwarder {
    pool: Arc<ReplicaConnectionPool>,
    buffers: Arc<BufferPool>,
    config: ForwardConfig,
}

impl Forwarder {
    #[must_use]
    pub fn new(
        pool: Arc<ReplicaConnectionPool>,
        buffers: Arc<BufferPool>,
        config: ForwardConfig,
    ) -> Self {
        Self {
            pool,
            buffers,
            config,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<ReplicaConnectionPool> {
        &self.pool
    }

    /// Write the relayed copy of `pkt` to every follower concurrently.
    ///
    /// Connections that were obtained stay bound to the packet even when
    /// another follower failed, so `finish` can destroy them.
    pub async fn send_to_followers(&self, pkt: &mut ReplPacket) -> Result<()> {
        if pkt.follower_addrs().is_empty() {
            return Ok(());
        }

        let frame = relay_frame(&pkt.packet);
        let sends = pkt
            .follower_addrs()
            .iter()
            .map(|addr| self.send_one(addr, &frame));
        let results = join_all(sends).await;

        let mut first_err = None;
        for (slot, (conn, result)) in pkt.follower_conns.iter_mut().zip(results) {
            *slot = conn;
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            None => Ok(()),
            Some(e) => {
                dn_metrics::increment_forward_failures();
                pkt.fail(Action::SendToFollowers, &e);
                Err(e)
            },
        }
    }

    async fn send_one(&self, addr: &str, frame: &[u8]) -> (Option<TcpStream>, Result<()>) {
        let mut stream = match self.pool.acquire(addr).await {
            Ok(s) => s,
            Err(e) => return (None, Err(e)),
        };
        dn_metrics::increment_forwards();
        let result = write_frame(&mut stream, frame).await;
        if let Err(e) = &result {
            warn!(target: "datanode::forward", follower = addr, error = %e, "Relay to follower failed");
        }
        (Some(stream), result)
    }

    /// Read one reply from every follower concurrently.
    ///
    /// A reply must answer the same request id with result `Ok`. A follower
    /// slot with no connection is a `ConnIsNull` fault.
    pub async fn receive_from_followers(&self, pkt: &mut ReplPacket) -> Result<()> {
        if pkt.follower_addrs().is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let req_id = pkt.packet.header.req_id;
        let conns = std::mem::take(&mut pkt.follower_conns);
        let receives = pkt
            .follower_addrs()
            .iter()
            .zip(conns)
            .map(|(addr, conn)| self.receive_one(addr, conn, req_id));
        let results = join_all(receives).await;

        let mut first_err = None;
        for (conn, result) in results {
            pkt.follower_conns.push(conn);
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            None => {
                debug!(
                    target: "datanode::forward",
                    req_id,
                    followers = pkt.follower_addrs().len(),
                    latency_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
                    "All followers acknowledged"
                );
                Ok(())
            },
            Some(e) => {
                dn_metrics::increment_forward_failures();
                let action = if matches!(e, DnError::ConnIsNull(_)) {
                    Action::ConnIsNull
                } else {
                    Action::ReceiveFromFollower
                };
                pkt.fail(action, &e);
                Err(e)
            },
        }
    }

    async fn receive_one(
        &self,
        addr: &str,
        conn: Option<TcpStream>,
        req_id: i64,
    ) -> (Option<TcpStream>, Result<()>) {
        let Some(mut stream) = conn else {
            return (None, Err(DnError::ConnIsNull(addr.to_owned())));
        };

        let result = Packet::read_from(&mut stream, self.config.follower_read_timeout, &self.buffers)
            .await
            .and_then(|reply| check_reply(addr, req_id, &reply));
        if let Err(e) = &result {
            warn!(target: "datanode::forward", follower = addr, req_id, error = %e, "Follower reply rejected");
        }
        (Some(stream), result)
    }

    /// Return every follower connection of `pkt` to the pool when the chain
    /// succeeded, or destroy them all when it did not.
    pub async fn finish(&self, pkt: &mut ReplPacket, ok: bool) {
        let conns = std::mem::take(&mut pkt.follower_conns);
        for (addr, conn) in pkt.follower_addrs().iter().zip(conns) {
            let Some(stream) = conn else { continue };
            if ok {
                self.pool.release(addr, stream, ReuseHint::Keep).await;
            } else {
                self.pool.force_destroy(stream, addr);
            }
        }
    }
}

/// The copy of `packet` sent to followers: hop count 0, no descriptor blob.
fn relay_frame(packet: &Packet) -> Vec<u8> {
    let mut header = packet.header;
    header.remaining_followers = 0;
    header.arg_len = 0;

    let payload = if header.defers_payload() {
        &[][..]
    } else {
        let payload = packet.payload();
        header.size = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        payload
    };

    let mut frame = Vec::with_capacity(dn_wire::PacketHeader::SIZE + payload.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(payload);
    frame
}

async fn write_frame(stream: &mut TcpStream, frame: &[u8]) -> Result<()> {
    stream.write_all(frame).await?;
    stream.flush().await?;
    Ok(())
}

fn check_reply(addr: &str, req_id: i64, reply: &Packet) -> Result<()> {
    if reply.header.req_id != req_id {
        return Err(DnError::ReqIdMismatch {
            addr: addr.to_owned(),
            expected: req_id,
            actual: reply.header.req_id,
        });
    }
    if reply.header.result_code != ResultCode::Ok {
        return Err(DnError::FollowerReply {
            addr: addr.to_owned(),
            code: reply.header.result_code.code(),
            message: String::from_utf8_lossy(reply.payload()).into_owned(),
        });
    }
    Ok(())
}
