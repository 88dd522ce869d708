//! Per-connection packet loop.
//!
//! Packets on one connection are handled strictly one at a time:
//! decode, start the timer, resolve the chain, relay to followers, apply
//! locally, collect follower replies, answer the client, settle the follower
//! connections. A decode fault ends the connection; every other fault is
//! answered with an error reply and the loop continues.

use super::ServerContext;
use crate::shutdown::{begin_packet, end_packet};
use dn_core::{BLOCK_SIZE, DnError, Result};
use dn_repl::ReplPacket;
use dn_wire::{Action, Opcode, Packet};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

pub async fn handle_connection<S>(mut stream: S, ctx: &ServerContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        let read = Packet::read_from(&mut stream, ctx.client_read_timeout, &ctx.buffers).await;
        let packet = match read {
            Ok(p) => p,
            Err(e) if e.is_eof() => return Ok(()),
            Err(e) => return Err(e),
        };
        dn_metrics::increment_packets_received();
        trace!(target: "datanode::server", packet = %packet.unique_log_id(), "Packet received");

        begin_packet();
        let mut pkt = ReplPacket::new(packet);
        pkt.before_tp(&ctx.cluster_id, &ctx.collector);
        let outcome = process(ctx, &mut pkt, &mut stream).await;
        pkt.after_tp();
        let replied = match outcome {
            Ok(()) if pkt.need_reply => pkt.packet.write_to(&mut stream).await,
            other => other,
        };
        end_packet();

        if let Err(e) = replied {
            pkt.fail(Action::WriteToClient, &e);
            return Err(e);
        }
    }
}

async fn process<S>(ctx: &ServerContext, pkt: &mut ReplPacket, stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin + Send,
{
    if pkt.is_master_command() {
        return operate(ctx, pkt, stream).await;
    }

    if pkt.resolve_followers().is_err() {
        return Ok(());
    }

    let forward = pkt.is_forward();
    if forward && ctx.forwarder.send_to_followers(pkt).await.is_err() {
        ctx.forwarder.finish(pkt, false).await;
        return Ok(());
    }

    let local = operate(ctx, pkt, stream).await;

    if forward {
        let chain_ok = local.is_ok()
            && pkt.is_ok()
            && ctx.forwarder.receive_from_followers(pkt).await.is_ok();
        ctx.forwarder.finish(pkt, chain_ok).await;
    }
    local
}

/// Apply the packet to the store and pack the reply.
///
/// Storage faults become error replies. The returned error is reserved for
/// faults on the client stream itself, raised while streaming a read.
async fn operate<S>(ctx: &ServerContext, pkt: &mut ReplPacket, stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin + Send,
{
    let h = pkt.packet.header;
    let store = ctx.store.as_ref();

    let result: Result<Option<Vec<u8>>> = match h.opcode {
        Opcode::Write => pkt.packet.verify_crc().and_then(|()| {
            store
                .write(h.partition_id, h.extent_id, h.extent_offset, pkt.packet.payload())
                .map(|()| None)
                .map_err(DnError::from)
        }),
        Opcode::Read | Opcode::ExtentRepairRead => store
            .read(h.partition_id, h.extent_id, h.extent_offset, h.size)
            .map(Some)
            .map_err(DnError::from),
        Opcode::StreamRead => return stream_read(ctx, pkt, stream).await,
        Opcode::CreateExtent => store
            .create_extent(h.partition_id, h.extent_id)
            .map(|()| None)
            .map_err(DnError::from),
        Opcode::MarkDelete => store
            .mark_delete(h.partition_id, h.extent_id)
            .map(|()| None)
            .map_err(DnError::from),
        Opcode::GetAllWaterMark => store
            .watermarks(h.partition_id, h.extent_mode)
            .map_err(DnError::from)
            .and_then(|marks| {
                serde_json::to_vec(&marks).map_err(|e| DnError::Protocol(e.to_string()))
            })
            .map(Some),
        Opcode::NotifyExtentRepair => store
            .notify_repair(h.partition_id)
            .map(|()| None)
            .map_err(DnError::from),
        op if op.is_master_command() => store
            .master_command(op, h.partition_id)
            .map(Some)
            .map_err(DnError::from),
        op => Err(DnError::UnknownOpcode(op.code())),
    };

    match result {
        Ok(None) => pkt.packet.pack_ok_reply(),
        Ok(Some(body)) => pkt.packet.pack_ok_with_body(body),
        Err(e) => {
            pkt.fail(Action::OperatePkg, &e);
        },
    }
    Ok(())
}

/// Answer a streamed read with one response packet per block.
async fn stream_read<S>(ctx: &ServerContext, pkt: &mut ReplPacket, stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin + Send,
{
    let h = pkt.packet.header;
    let data = match ctx
        .store
        .read(h.partition_id, h.extent_id, h.extent_offset, h.size)
    {
        Ok(data) => data,
        Err(fault) => {
            pkt.fail(Action::OperatePkg, &fault.into());
            return Ok(());
        },
    };

    let mut offset = h.extent_offset;
    let mut chunks = data.chunks(BLOCK_SIZE).peekable();
    if chunks.peek().is_none() {
        send_chunk(&h, offset, &[], stream).await?;
    }
    for chunk in chunks {
        send_chunk(&h, offset, chunk, stream).await?;
        offset += i64::try_from(chunk.len()).unwrap_or(i64::MAX);
    }

    debug!(
        target: "datanode::server",
        req_id = h.req_id,
        bytes = data.len(),
        "Streamed read answered"
    );
    pkt.packet.pack_ok_reply();
    pkt.need_reply = false;
    Ok(())
}

async fn send_chunk<S>(
    request: &dn_wire::PacketHeader,
    offset: i64,
    chunk: &[u8],
    stream: &mut S,
) -> Result<()>
where
    S: AsyncWrite + Unpin + Send,
{
    let mut reply =
        Packet::new_stream_read_response(request.req_id, request.partition_id, request.extent_id);
    reply.header.extent_offset = offset;
    reply.pack_ok_with_body(chunk.to_vec());
    reply.write_to(stream).await
}
