//! Reliable datagrams over UDP, plus a same-host relay between two processes.
//!
//! # Crate Structure
//!
//! - [`socket`]: UDP endpoint and Unix datagram relay sockets
//! - [`frame`]: wire buffer, packet and relay framing, queues
//! - [`transport`]: connection-oriented reliable transport over UDP
//! - [`relay`]: Primary/Secondary process relay (behind `relay` feature, Unix only)

/// Re-export socket types.
pub mod socket {
    pub use netbridge_socket::*;
}

/// Re-export frame types.
pub mod frame {
    pub use netbridge_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use netbridge_transport::*;
}

/// Re-export relay types (requires `relay` feature).
#[cfg(all(unix, feature = "relay"))]
pub mod relay {
    pub use netbridge_relay::*;
}
