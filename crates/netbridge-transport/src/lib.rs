//! Reliable, connection-oriented datagram transport over UDP.
//!
//! A [`Transport`] adds a handshake, sequencing, retransmission and
//! acknowledgement on top of a plain UDP socket. Applications exchange whole
//! [`Datagram`](netbridge_frame::Datagram)s through queues; splitting into
//! packets and reassembly happen underneath.

pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod peers;
pub mod sequence;
#[cfg(unix)]
pub mod transport;
pub mod validator;

pub use config::{SequenceIdRange, TransportConfig};
pub use connection::{Connection, ConnectionAction, ConnectionState};
pub use error::{Result, TransportError};
pub use handshake::SERVER_PEER_ID;
#[cfg(unix)]
pub use transport::{Transport, TransportRole};
pub use validator::{AcceptAll, FromAddress, PacketValidator};
