#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]

//! Replica-chain handling for the data-node.
//!
//! A primary receives a packet whose argument blob names the followers of
//! the partition. It resolves that blob, relays the packet to every follower
//! over pooled connections, applies it locally, waits for every follower to
//! acknowledge and only then answers the client.

mod chain;
mod forward;
mod packet;
mod pool;
mod store;

pub use chain::{check_hop_count, encode_followers, parse_followers};
pub use forward::{ForwardConfig, Forwarder};
pub use packet::ReplPacket;
pub use pool::{PoolConfig, ReplicaConnectionPool, ReuseHint};
pub use store::{ExtentStore, ExtentWatermark};
