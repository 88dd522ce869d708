use crate::chain::{check_hop_count, parse_followers};
use dn_core::{DnError, Result};
use dn_metrics::{Collector, TimerHandle};
use dn_wire::{Action, Packet, ResultCode};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::warn;

/// A packet together with its chain state: the resolved follower
/// addresses, one connection slot per follower, and the operation timer.
pub struct ReplPacket {
    pub packet: Packet,
    /// Cleared by handlers that answer on their own (streamed reads)
    pub need_reply: bool,
    follower_addrs: Vec<String>,
    pub(crate) follower_conns: Vec<Option<TcpStream>>,
    timer: Option<TimerHandle>,
}

impl ReplPacket {
    #[must_use]
    pub fn new(packet: Packet) -> Self {
        Self {
            packet,
            need_reply: true,
            follower_addrs: Vec::new(),
            follower_conns: Vec::new(),
            timer: None,
        }
    }

    /// Parse the follower descriptors and validate the hop count.
    ///
    /// On failure the packet already holds a `PreparePkg` error reply.
    pub fn resolve_followers(&mut self) -> Result<()> {
        let header = &self.packet.header;
        let resolved = parse_followers(&self.packet.arg, header.arg_len).and_then(|addrs| {
            check_hop_count(header.remaining_followers)?;
            Ok(addrs)
        });

        match resolved {
            Ok(addrs) => {
                self.follower_conns = std::iter::repeat_with(|| None).take(addrs.len()).collect();
                self.follower_addrs = addrs;
                Ok(())
            },
            Err(e) => {
                self.fail(Action::PreparePkg, &e);
                Err(e)
            },
        }
    }

    #[must_use]
    pub fn follower_addrs(&self) -> &[String] {
        &self.follower_addrs
    }

    /// Slots currently holding a live follower connection.
    #[must_use]
    pub fn bound_connections(&self) -> usize {
        self.follower_conns.iter().filter(|c| c.is_some()).count()
    }

    /// Whether this replica must relay the packet further down the chain.
    /// Streamed reads are served locally whatever their hop count.
    #[inline]
    #[must_use]
    pub fn is_forward(&self) -> bool {
        self.packet.header.remaining_followers > 0 && !self.packet.header.opcode.streams_reply()
    }

    #[inline]
    #[must_use]
    pub fn is_master_command(&self) -> bool {
        self.packet.header.opcode.is_master_command()
    }

    #[inline]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.packet.header.result_code == ResultCode::Ok
    }

    /// Start the per-opcode latency timer.
    pub fn before_tp(&mut self, cluster_id: &str, collector: &Collector) {
        let key = format!(
            "{cluster_id}_datanode_stream{}",
            self.packet.header.opcode.name()
        );
        self.timer = Some(collector.start_timer(key));
    }

    /// Stop the timer started by `before_tp`, if any.
    pub fn after_tp(&mut self) -> Option<Duration> {
        self.timer.take().map(TimerHandle::stop)
    }

    /// Pack an error reply for a fault raised during `action`.
    pub fn fail(&mut self, action: Action, err: &DnError) -> ResultCode {
        let code = self.packet.pack_error_body(action, err);
        dn_metrics::increment_packets_failed();
        warn!(
            target: "datanode::repl",
            action = %action,
            result = %code,
            error = %err,
            packet = %self.packet.unique_log_id(),
            "Packet failed"
        );
        code
    }
}

impl std::fmt::Debug for ReplPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplPacket")
            .field("packet", &self.packet.unique_log_id())
            .field("followers", &self.follower_addrs)
            .field("bound", &self.bound_connections())
            .field("need_reply", &self.need_reply)
            .finish()
    }
}
