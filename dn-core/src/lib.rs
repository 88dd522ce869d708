#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod buffer;
mod checksum;
mod error;

pub use buffer::{BufferPool, BufferPoolConfig, PooledBuffer};
pub use checksum::crc32;
pub use error::{DnError, Result, StorageFault};

/// First byte of every packet header.
pub const PROTO_MAGIC: u8 = 0xFF;
pub const PACKET_HEADER_SIZE: usize = 65;
/// Fixed block size used by the write path; full-block payloads come from the pool.
pub const BLOCK_SIZE: usize = 128 * 1024;
/// Upper bound on a single packet payload accepted from the wire.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;
/// Upper bound on the argument blob (follower descriptors) accepted from the wire.
pub const MAX_ARG_SIZE: usize = 64 * 1024;
/// Terminator between follower descriptors in the argument blob.
pub const ADDR_SPLIT: &str = ",";
