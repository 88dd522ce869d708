//! Packet: the unit of request and response on a replica connection.
//!
//! Client requests and intra-cluster background traffic (watermark queries,
//! repair reads, repair notifications, streamed read responses) share this
//! framing: a fixed header, an optional argument blob and an optional payload.

use crate::classify::{Action, classify};
use crate::header::PacketHeader;
use crate::opcode::{ExtentMode, Opcode, ResultCode};
use bytes::Bytes;
use dn_core::{
    BLOCK_SIZE, BufferPool, DnError, MAX_ARG_SIZE, MAX_PAYLOAD_SIZE, PooledBuffer, Result, crc32,
};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

static REQUEST_ID: LazyLock<AtomicI64> = LazyLock::new(|| AtomicI64::new(now_ns() / 1_000));

/// Next process-wide unique request id.
#[inline]
pub fn next_request_id() -> i64 {
    REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}

#[derive(Debug)]
pub struct Packet {
    pub header: PacketHeader,
    pub arg: Bytes,
    pub data: PooledBuffer,
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl Packet {
    /// Empty packet stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            header: PacketHeader {
                start_ns: now_ns(),
                ..PacketHeader::default()
            },
            arg: Bytes::new(),
            data: PooledBuffer::default(),
        }
    }

    fn with_op(opcode: Opcode, partition_id: u64) -> Self {
        let mut p = Self::new();
        p.header.opcode = opcode;
        p.header.partition_id = partition_id;
        p.header.req_id = next_request_id();
        p
    }

    /// Query for the watermarks of every extent in a partition.
    #[must_use]
    pub fn new_get_all_watermarks(partition_id: u64, extent_mode: ExtentMode) -> Self {
        let mut p = Self::with_op(Opcode::GetAllWaterMark, partition_id);
        p.header.extent_mode = extent_mode;
        p
    }

    /// Repair read of `size` bytes at `offset` from a peer replica.
    #[must_use]
    pub fn new_extent_repair_read(partition_id: u64, extent_id: u64, offset: i64, size: u32) -> Self {
        let mut p = Self::with_op(Opcode::ExtentRepairRead, partition_id);
        p.header.extent_id = extent_id;
        p.header.extent_offset = offset;
        p.header.size = size;
        p
    }

    /// One chunk of a streamed read, answering request `req_id`.
    #[must_use]
    pub fn new_stream_read_response(req_id: i64, partition_id: u64, extent_id: u64) -> Self {
        let mut p = Self::new();
        p.header.opcode = Opcode::Ok;
        p.header.req_id = req_id;
        p.header.partition_id = partition_id;
        p.header.extent_id = extent_id;
        p
    }

    /// Tell a replica to start repairing a partition.
    #[must_use]
    pub fn new_notify_extent_repair(partition_id: u64) -> Self {
        Self::with_op(Opcode::NotifyExtentRepair, partition_id)
    }

    #[must_use]
    pub fn new_write(partition_id: u64, extent_id: u64, offset: i64, data: Vec<u8>) -> Self {
        let mut p = Self::with_op(Opcode::Write, partition_id);
        p.header.extent_id = extent_id;
        p.header.extent_offset = offset;
        p.set_payload(data);
        p
    }

    #[must_use]
    pub fn new_read(partition_id: u64, extent_id: u64, offset: i64, size: u32) -> Self {
        let mut p = Self::with_op(Opcode::Read, partition_id);
        p.header.extent_id = extent_id;
        p.header.extent_offset = offset;
        p.header.size = size;
        p
    }

    #[must_use]
    pub fn new_create_extent(partition_id: u64, extent_id: u64) -> Self {
        let mut p = Self::with_op(Opcode::CreateExtent, partition_id);
        p.header.extent_id = extent_id;
        p
    }

    /// Attach a follower descriptor blob and the number of hops it covers.
    #[must_use]
    pub fn with_followers(mut self, arg: Bytes, remaining_followers: i8) -> Self {
        self.header.arg_len = u32::try_from(arg.len()).unwrap_or(u32::MAX);
        self.header.remaining_followers = remaining_followers;
        self.arg = arg;
        self
    }

    /// Replace the payload, updating size and CRC.
    pub fn set_payload(&mut self, data: Vec<u8>) {
        self.header.size = u32::try_from(data.len()).unwrap_or(u32::MAX);
        self.header.crc = crc32(&data);
        self.data = PooledBuffer::detached(data);
    }

    /// The declared payload bytes actually held by this packet.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let size = (self.header.size as usize).min(self.data.len());
        &self.data[..size]
    }

    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.header.result_code != ResultCode::Ok
    }

    /// Read one packet, bounded by `deadline` unless it is `None`.
    ///
    /// A short read or an expired deadline is an I/O fault and the stream must
    /// not be reused afterwards.
    pub async fn read_from<R>(
        reader: &mut R,
        deadline: Option<Duration>,
        buffers: &BufferPool,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        match deadline {
            Some(limit) => tokio::time::timeout(limit, Self::read_unbounded(reader, buffers))
                .await
                .map_err(|_| DnError::timed_out("packet read deadline exceeded"))?,
            None => Self::read_unbounded(reader, buffers).await,
        }
    }

    async fn read_unbounded<R>(reader: &mut R, buffers: &BufferPool) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let header = {
            let mut raw = buffers.header();
            reader.read_exact(raw.as_mut_slice()).await?;
            PacketHeader::parse(&raw)?
        };

        let arg = if header.arg_len > 0 {
            let len = header.arg_len as usize;
            if len > MAX_ARG_SIZE {
                return Err(DnError::Protocol(format!(
                    "argument blob of {len} bytes exceeds {MAX_ARG_SIZE}"
                )));
            }
            let mut arg = vec![0u8; len];
            reader.read_exact(&mut arg).await?;
            Bytes::from(arg)
        } else {
            Bytes::new()
        };

        let size = if header.defers_payload() {
            0
        } else {
            header.size as usize
        };
        if size > MAX_PAYLOAD_SIZE {
            return Err(DnError::PayloadTooLarge(size));
        }

        let mut data = if header.opcode == Opcode::Write && size == BLOCK_SIZE {
            buffers.block()
        } else {
            PooledBuffer::zeroed(size)
        };
        if size > 0 {
            reader.read_exact(&mut data.as_mut_slice()[..size]).await?;
        }

        trace!(
            target: "datanode::wire",
            opcode = %header.opcode,
            req_id = header.req_id,
            arg_len = header.arg_len,
            payload = size,
            "Packet decoded"
        );
        Ok(Self { header, arg, data })
    }

    /// Serialize header, argument blob and payload into one frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let arg_len = self.header.arg_len as usize;
        if self.arg.len() < arg_len {
            return Err(DnError::ArgLenMismatch {
                declared: self.header.arg_len,
                available: self.arg.len(),
            });
        }

        let size = if self.header.defers_payload() {
            0
        } else {
            self.header.size as usize
        };
        if self.data.len() < size {
            return Err(DnError::Protocol(format!(
                "payload declares {size} bytes but holds {}",
                self.data.len()
            )));
        }

        let mut frame = Vec::with_capacity(PacketHeader::SIZE + arg_len + size);
        frame.extend_from_slice(&self.header.encode());
        frame.extend_from_slice(&self.arg[..arg_len]);
        frame.extend_from_slice(&self.data[..size]);
        Ok(frame)
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = self.encode()?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Turn this packet into an error reply for a fault raised during `action`.
    ///
    /// The result code comes from the classifier with disk faults rewritten
    /// to intra-group network faults; the payload is `"<action>_<message>"`.
    /// Returns the code that was set.
    pub fn pack_error_body(&mut self, action: Action, err: &DnError) -> ResultCode {
        let code = classify(action, err, self.header.opcode).for_wire();
        let body = format!("{action}_{err}").into_bytes();

        self.header.result_code = code;
        self.header.arg_len = 0;
        self.arg = Bytes::new();
        self.set_payload(body);
        code
    }

    /// Success reply with no payload, as sent for writes and notifications.
    pub fn pack_ok_reply(&mut self) {
        self.header.result_code = ResultCode::Ok;
        self.header.arg_len = 0;
        self.arg = Bytes::new();
        self.set_payload(Vec::new());
    }

    /// Success reply carrying a handler-produced payload.
    pub fn pack_ok_with_body(&mut self, body: Vec<u8>) {
        self.header.result_code = ResultCode::Ok;
        self.header.arg_len = 0;
        self.arg = Bytes::new();
        self.set_payload(body);
    }

    /// Check the payload against the header CRC.
    pub fn verify_crc(&self) -> Result<()> {
        let actual = crc32(self.payload());
        if actual != self.header.crc {
            return Err(DnError::CrcMismatch {
                expected: self.header.crc,
                actual,
            });
        }
        Ok(())
    }

    /// Identifier used to correlate log lines for this packet.
    #[must_use]
    pub fn unique_log_id(&self) -> String {
        let h = &self.header;
        format!(
            "Req({})_Partition({})_Extent({})_ExtentOffset({})_Size({})_Op({})_ResultCode({})",
            h.req_id, h.partition_id, h.extent_id, h.extent_offset, h.size, h.opcode, h.result_code
        )
    }

    #[must_use]
    pub fn error_message(&self) -> String {
        format!(
            "req({}) err({})",
            self.unique_log_id(),
            String::from_utf8_lossy(self.payload())
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use dn_core::{BufferPoolConfig, StorageFault};

    fn pool() -> BufferPool {
        BufferPool::new(BufferPoolConfig {
            header_pool_size: 4,
            block_pool_size: 2,
        })
    }

    async fn decode(bytes: &[u8], buffers: &BufferPool) -> Result<Packet> {
        let mut reader = bytes;
        Packet::read_from(&mut reader, None, buffers).await
    }

    #[tokio::test]
    async fn test_write_packet_decodes_with_followers() {
        let buffers = pool();
        let arg = Bytes::from_static(b"0:10.0.0.1:17310,1:10.0.0.2:17310,");
        let sent = Packet::new_write(3, 1025, 0, b"hello extent".to_vec()).with_followers(arg.clone(), 2);
        let bytes = sent.encode().unwrap();

        let got = decode(&bytes, &buffers).await.unwrap();
        assert_eq!(got.header, sent.header);
        assert_eq!(got.arg, arg);
        assert_eq!(got.payload(), b"hello extent");
        assert_eq!(got.data.len(), got.header.size as usize);
        got.verify_crc().unwrap();
    }

    #[tokio::test]
    async fn test_unexecuted_read_consumes_no_payload() {
        let buffers = pool();
        let mut bytes = Packet::new_read(1, 2, 0, 4096).encode().unwrap();
        assert_eq!(bytes.len(), PacketHeader::SIZE);
        // Trailing bytes belong to the next packet on the stream
        bytes.extend_from_slice(&[0xAA; 16]);

        let mut reader = &bytes[..];
        let got = Packet::read_from(&mut reader, None, &buffers).await.unwrap();
        assert_eq!(got.header.size, 4096);
        assert!(got.data.is_empty());
        assert_eq!(reader.len(), 16);
    }

    #[tokio::test]
    async fn test_read_deferral_covers_exactly_read_class() {
        let buffers = pool();
        for opcode in [Opcode::Read, Opcode::StreamRead, Opcode::ExtentRepairRead] {
            let mut p = Packet::new();
            p.header.opcode = opcode;
            p.header.size = 8;
            let bytes = p.encode().unwrap();
            let got = decode(&bytes, &buffers).await.unwrap();
            assert!(got.data.is_empty(), "{opcode}");
        }

        // Same header shape for a write must carry its payload
        let mut p = Packet::new();
        p.header.opcode = Opcode::Write;
        p.header.size = 8;
        let mut bytes = p.header.encode().to_vec();
        assert!(decode(&bytes, &buffers).await.unwrap_err().is_eof());
        bytes.extend_from_slice(&[1; 8]);
        assert_eq!(decode(&bytes, &buffers).await.unwrap().payload(), &[1; 8]);
    }

    #[tokio::test]
    async fn test_executed_read_reply_carries_payload() {
        let buffers = pool();
        let mut reply = Packet::new_read(1, 2, 0, 5);
        reply.pack_ok_with_body(b"bytes".to_vec());
        let got = decode(&reply.encode().unwrap(), &buffers).await.unwrap();
        assert_eq!(got.header.result_code, ResultCode::Ok);
        assert_eq!(got.payload(), b"bytes");
    }

    #[tokio::test]
    async fn test_full_block_write_uses_pool() {
        let buffers = pool();
        let bytes = Packet::new_write(1, 1, 0, vec![7u8; BLOCK_SIZE]).encode().unwrap();

        let got = decode(&bytes, &buffers).await.unwrap();
        assert!(got.data.is_pooled());
        assert_eq!(buffers.available_blocks(), 1);
        drop(got);
        assert_eq!(buffers.available_blocks(), 2);

        let small = Packet::new_write(1, 1, 0, vec![7u8; 512]).encode().unwrap();
        assert!(!decode(&small, &buffers).await.unwrap().data.is_pooled());
    }

    #[tokio::test]
    async fn test_header_buffer_returned_on_error() {
        let buffers = pool();
        let mut bytes = Packet::new_write(1, 1, 0, vec![1; 4]).encode().unwrap();
        bytes[0] = 0x00;

        let err = decode(&bytes, &buffers).await.unwrap_err();
        assert!(matches!(err, DnError::InvalidMagic(0)));
        assert_eq!(buffers.available_headers(), 4);

        let err = decode(&bytes[..10], &buffers).await.unwrap_err();
        assert!(err.is_eof());
        assert_eq!(buffers.available_headers(), 4);
    }

    #[tokio::test]
    async fn test_read_deadline_expires_as_io_timeout() {
        let buffers = pool();
        let (mut client, _server) = tokio::io::duplex(64);
        let err = Packet::read_from(&mut client, Some(Duration::from_millis(20)), &buffers)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let buffers = pool();
        let mut p = Packet::new();
        p.header.opcode = Opcode::Write;
        p.header.size = u32::try_from(MAX_PAYLOAD_SIZE + 1).unwrap();
        let err = decode(&p.header.encode(), &buffers).await.unwrap_err();
        assert!(matches!(err, DnError::PayloadTooLarge(_)));
    }

    #[test]
    fn test_pack_error_body_format() {
        let mut p = Packet::new_write(1, 1, 0, vec![0; 32]);
        let err = DnError::from(StorageFault::ExtentDeleted);
        let code = p.pack_error_body(Action::OperatePkg, &err);

        let expected = format!("OperatePkg_{err}");
        assert_eq!(code, ResultCode::NotExist);
        assert_eq!(p.header.result_code, ResultCode::NotExist);
        assert_eq!(p.payload(), expected.as_bytes());
        assert_eq!(p.header.size as usize, expected.len());
        assert!(p.is_error());
    }

    #[test]
    fn test_pack_error_body_hides_disk_codes() {
        for fault in [
            StorageFault::NoSpace,
            StorageFault::Disk {
                detail: "sector 9".into(),
            },
        ] {
            let mut p = Packet::new_write(1, 1, 0, vec![0; 4]);
            p.pack_error_body(Action::OperatePkg, &fault.into());
            assert_eq!(p.header.result_code, ResultCode::IntraGroupNetErr);
            assert!(!String::from_utf8_lossy(p.payload()).contains("sector"));
        }
    }

    #[test]
    fn test_error_reply_drops_argument_blob() {
        let mut p = Packet::new_write(1, 1, 0, vec![0; 4])
            .with_followers(Bytes::from_static(b"0:h:1,"), 1);
        p.header.arg_len = 40;
        p.pack_error_body(
            Action::PreparePkg,
            &DnError::ArgLenMismatch {
                declared: 40,
                available: 6,
            },
        );
        assert_eq!(p.header.arg_len, 0);
        assert!(p.encode().is_ok());
    }

    #[test]
    fn test_encode_rejects_short_argument() {
        let mut p = Packet::new_write(1, 1, 0, vec![0; 4]);
        p.header.arg_len = 10;
        assert!(matches!(p.encode(), Err(DnError::ArgLenMismatch { .. })));
    }

    #[test]
    fn test_synthetic_constructors() {
        let wm = Packet::new_get_all_watermarks(9, ExtentMode::Tiny);
        assert_eq!(wm.header.opcode, Opcode::GetAllWaterMark);
        assert_eq!(wm.header.extent_mode, ExtentMode::Tiny);

        let repair = Packet::new_extent_repair_read(9, 12, 4096, 1024);
        assert_eq!(repair.header.opcode, Opcode::ExtentRepairRead);
        assert_eq!(repair.header.extent_mode, ExtentMode::Normal);
        assert_eq!(repair.header.size, 1024);
        assert_ne!(repair.header.req_id, wm.header.req_id);

        let chunk = Packet::new_stream_read_response(77, 9, 12);
        assert_eq!(chunk.header.opcode, Opcode::Ok);
        assert_eq!(chunk.header.req_id, 77);

        let notify = Packet::new_notify_extent_repair(9);
        assert_eq!(notify.header.opcode, Opcode::NotifyExtentRepair);
        assert_eq!(notify.header.result_code, ResultCode::Unexecuted);
        assert!(notify.header.start_ns > 0);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = next_request_id();
        let b = next_request_id();
        assert!(b > a);
    }

    #[test]
    fn test_error_message_includes_log_id() {
        let mut p = Packet::new_read(4, 5, 6, 7);
        p.pack_error_body(Action::OperatePkg, &StorageFault::TryAgain.into());
        let msg = p.error_message();
        assert!(msg.starts_with("req(Req("));
        assert!(msg.contains("_Op(OpRead)_ResultCode(Again)"));
        assert!(msg.ends_with("err(OperatePkg_try again)"));
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let mut p = Packet::new_write(1, 1, 0, b"abc".to_vec());
        p.header.crc ^= 1;
        assert!(matches!(p.verify_crc(), Err(DnError::CrcMismatch { .. })));
    }
}
