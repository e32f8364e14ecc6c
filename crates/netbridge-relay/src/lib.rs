//! Same-host relay between two processes over paired Unix datagram sockets.
//!
//! One process runs the [`RelayRole::Primary`] end, the other the
//! [`RelayRole::Secondary`] end. Each binds its own socket under a shared
//! base name and writes to the other's:
//!
//! ```text
//! Primary   reads <dir>/<base>A   writes <dir>/<base>B
//! Secondary reads <dir>/<base>B   writes <dir>/<base>A
//! ```
//!
//! Messages travel as [`RelayPacket`](netbridge_frame::RelayPacket) frames.
//! KEEP_ALIVE frames detect a vanished peer; IPC_DATA carries the Primary's
//! unique id.

#![cfg(unix)]

pub mod config;
pub mod error;
pub mod relay;
pub mod stats;
pub mod unique_id;

pub use config::{RelayConfig, RelayRole, DEFAULT_SOCKET_DIR};
pub use error::{RelayError, Result};
pub use relay::ProcessRelay;
pub use stats::{RelayStats, RelayStatsSnapshot};
pub use unique_id::{derive_unique_id, local_unique_id};
