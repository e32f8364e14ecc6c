//! Non-blocking datagram socket abstraction.
//!
//! Two concrete sockets share one [`Socket`] contract:
//! - [`UdpEndpoint`] for the network transport
//! - [`RelaySocket`] for the same-host relay (Unix datagram sockets bound to a path)
//!
//! This is the lowest layer of netbridge. Every socket here is non-blocking;
//! callers wait for readiness with [`poll_readable`].

pub mod error;
pub mod traits;
pub mod udp;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, SocketError};
pub use traits::{poll_readable, Socket, SocketRole};
pub use udp::UdpEndpoint;

#[cfg(unix)]
pub use uds::RelaySocket;
