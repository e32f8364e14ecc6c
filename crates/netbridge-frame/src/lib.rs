//! Wire-level building blocks for netbridge.
//!
//! - [`WireBuffer`]: fixed-size byte region with little-endian cursors
//! - [`Packet`]: the network packet codec, gated on magic, version and CRC-32
//! - [`RelayPacket`]: the same-host relay frame codec
//! - [`Datagram`] and [`DatagramQueue`]: move-only messages and the queues
//!   that carry them between threads
//!
//! Reserved op-codes live in [`opcode`].

pub mod buffer;
pub mod datagram;
pub mod error;
pub mod millis;
pub mod opcode;
pub mod packet;
pub mod queue;
pub mod relay;
pub mod worker;

pub use buffer::WireBuffer;
pub use datagram::Datagram;
pub use error::{FrameError, Result};
pub use opcode::{is_application, is_reserved, opcode_name, RESERVED_START};
pub use packet::{
    Packet, ProtocolConfig, DEFAULT_MAGIC, DEFAULT_MAX_PACKET_SIZE, DEFAULT_VERSION, HEADER_SIZE,
};
pub use queue::{DatagramQueue, Signal};
pub use relay::{RelayPacket, MAX_RELAY_FRAME_SIZE, MAX_RELAY_PAYLOAD, RELAY_HEADER_SIZE};
pub use worker::join_bounded;
