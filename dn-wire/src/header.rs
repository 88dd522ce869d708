use crate::opcode::{ExtentMode, Opcode, ResultCode};
use bytes::{Buf, BufMut};
use dn_core::{DnError, PACKET_HEADER_SIZE, PROTO_MAGIC, Result};

/// Fixed-size packet header. All integers are big-endian.
///
/// ```text
///  0 magic | 1 extent mode | 2 opcode | 3 result code | 4 remaining followers (i8)
///  5 crc u32 | 9 size u32 | 13 arg len u32
/// 17 partition id u64 | 25 extent id u64 | 33 extent offset i64
/// 41 request id i64 | 49 start ns i64 | 57 kernel offset u64
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub magic: u8,
    pub extent_mode: ExtentMode,
    pub opcode: Opcode,
    pub result_code: ResultCode,
    pub remaining_followers: i8,
    pub crc: u32,
    pub size: u32,
    pub arg_len: u32,
    pub partition_id: u64,
    pub extent_id: u64,
    pub extent_offset: i64,
    pub req_id: i64,
    pub start_ns: i64,
    pub kernel_offset: u64,
}

impl PacketHeader {
    pub const SIZE: usize = PACKET_HEADER_SIZE;

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(DnError::Protocol(format!(
                "header needs {} bytes, got {}",
                Self::SIZE,
                buf.len()
            )));
        }

        let mut cur = &buf[..Self::SIZE];
        let magic = cur.get_u8();
        if magic != PROTO_MAGIC {
            return Err(DnError::InvalidMagic(magic));
        }

        Ok(Self {
            magic,
            extent_mode: ExtentMode::try_from(cur.get_u8())?,
            opcode: Opcode::from(cur.get_u8()),
            result_code: ResultCode::try_from(cur.get_u8())?,
            remaining_followers: cur.get_i8(),
            crc: cur.get_u32(),
            size: cur.get_u32(),
            arg_len: cur.get_u32(),
            partition_id: cur.get_u64(),
            extent_id: cur.get_u64(),
            extent_offset: cur.get_i64(),
            req_id: cur.get_i64(),
            start_ns: cur.get_i64(),
            kernel_offset: cur.get_u64(),
        })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; PACKET_HEADER_SIZE] {
        let mut out = [0u8; PACKET_HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u8(self.magic);
        buf.put_u8(self.extent_mode as u8);
        buf.put_u8(self.opcode.code());
        buf.put_u8(self.result_code.code());
        buf.put_i8(self.remaining_followers);
        buf.put_u32(self.crc);
        buf.put_u32(self.size);
        buf.put_u32(self.arg_len);
        buf.put_u64(self.partition_id);
        buf.put_u64(self.extent_id);
        buf.put_i64(self.extent_offset);
        buf.put_i64(self.req_id);
        buf.put_i64(self.start_ns);
        buf.put_u64(self.kernel_offset);
        out
    }

    /// A read-class request that has not run yet carries no payload bytes,
    /// even when `size` names the number of bytes it wants back.
    #[inline]
    #[must_use]
    pub fn defers_payload(&self) -> bool {
        self.opcode.is_read() && self.result_code == ResultCode::Unexecuted
    }
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            magic: PROTO_MAGIC,
            extent_mode: ExtentMode::Normal,
            opcode: Opcode::Ok,
            result_code: ResultCode::Unexecuted,
            remaining_followers: 0,
            crc: 0,
            size: 0,
            arg_len: 0,
            partition_id: 0,
            extent_id: 0,
            extent_offset: 0,
            req_id: 0,
            start_ns: 0,
            kernel_offset: 0,
        }
    }
}
