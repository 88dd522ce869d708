#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]

mod classify;
mod header;
mod opcode;
mod packet;

pub use classify::{Action, classify};
pub use header::PacketHeader;
pub use opcode::{ExtentMode, Opcode, ResultCode};
pub use packet::{Packet, next_request_id};
