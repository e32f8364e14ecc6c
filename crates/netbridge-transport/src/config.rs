use std::net::SocketAddr;
use std::time::Duration;

use netbridge_frame::ProtocolConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// Inclusive range sequence ids are allocated from.
///
/// The client and server defaults do not overlap, so a sequence id alone
/// tells which side started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceIdRange {
    pub first: u32,
    pub last: u32,
}

impl SequenceIdRange {
    pub const CLIENT: SequenceIdRange = SequenceIdRange {
        first: 1,
        last: 0x7FFF_FFFF,
    };

    pub const SERVER: SequenceIdRange = SequenceIdRange {
        first: 0x8000_0000,
        last: 0xFFFF_FFFE,
    };

    pub fn contains(&self, id: u32) -> bool {
        (self.first..=self.last).contains(&id)
    }
}

/// Tuning for one [`Transport`](crate::Transport) instance.
///
/// Durations serialize as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Packet identity and size limits.
    pub protocol: ProtocolConfig,
    /// Local address to bind. Port 0 picks an ephemeral port.
    pub bind: SocketAddr,
    /// Longest any worker waits before re-checking for shutdown.
    #[serde(with = "netbridge_frame::millis")]
    pub poll_timeout: Duration,
    /// How often a client repeats its connection request while handshaking.
    #[serde(with = "netbridge_frame::millis")]
    pub handshake_retry_interval: Duration,
    /// How long an incomplete incoming sequence waits before asking for
    /// its missing packets.
    #[serde(with = "netbridge_frame::millis")]
    pub retransmit_after: Duration,
    /// Retransmission rounds per incoming sequence before it is abandoned.
    pub max_retransmission_requests: u32,
    /// How long a sent sequence waits for its ACK before being sent again.
    #[serde(with = "netbridge_frame::millis")]
    pub resend_unacked_after: Duration,
    /// Full resends per outgoing sequence.
    pub max_resends: u32,
    /// How long sent packets are kept for retransmission.
    #[serde(with = "netbridge_frame::millis")]
    pub retain_for: Duration,
    /// How many completed sequence ids each connection remembers for
    /// duplicate suppression.
    pub recent_completed_capacity: usize,
    /// Largest packet count an incoming sequence may declare.
    pub max_packets_per_sequence: u32,
    /// Send KEEP_ALIVE to every accepted peer at this interval.
    #[serde(with = "netbridge_frame::millis::option")]
    pub keepalive_interval: Option<Duration>,
    /// Close a connection that has been silent this long.
    #[serde(with = "netbridge_frame::millis::option")]
    pub peer_timeout: Option<Duration>,
    /// Bound on joining each worker during shutdown.
    #[serde(with = "netbridge_frame::millis")]
    pub shutdown_timeout: Duration,
    /// Sequence ids used when running as a client.
    pub client_sequence_ids: SequenceIdRange,
    /// Sequence ids used when running as a server.
    pub server_sequence_ids: SequenceIdRange,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolConfig::default(),
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            poll_timeout: Duration::from_millis(50),
            handshake_retry_interval: Duration::from_millis(500),
            retransmit_after: Duration::from_millis(200),
            max_retransmission_requests: 5,
            resend_unacked_after: Duration::from_secs(1),
            max_resends: 5,
            retain_for: Duration::from_secs(10),
            recent_completed_capacity: 256,
            max_packets_per_sequence: 4096,
            keepalive_interval: None,
            peer_timeout: None,
            shutdown_timeout: Duration::from_secs(2),
            client_sequence_ids: SequenceIdRange::CLIENT,
            server_sequence_ids: SequenceIdRange::SERVER,
        }
    }
}

impl TransportConfig {
    /// Default settings bound to `bind`.
    pub fn bound_to(bind: SocketAddr) -> Self {
        Self {
            bind,
            ..Self::default()
        }
    }

    /// Largest application payload slice carried by one packet.
    pub fn max_payload_per_packet(&self) -> usize {
        self.protocol.max_payload()
    }

    /// Reject settings the workers cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_per_packet() == 0 {
            return Err(TransportError::InvalidConfig(format!(
                "max_packet_size {} leaves no room for payload",
                self.protocol.max_packet_size
            )));
        }
        if self.poll_timeout.is_zero() {
            return Err(TransportError::InvalidConfig(
                "poll_timeout must be non-zero".to_string(),
            ));
        }
        for (name, range) in [
            ("client_sequence_ids", self.client_sequence_ids),
            ("server_sequence_ids", self.server_sequence_ids),
        ] {
            if range.first > range.last {
                return Err(TransportError::InvalidConfig(format!(
                    "{name} is empty ({}..={})",
                    range.first, range.last
                )));
            }
        }
        let (client, server) = (self.client_sequence_ids, self.server_sequence_ids);
        if client.first <= server.last && server.first <= client.last {
            return Err(TransportError::InvalidConfig(
                "client_sequence_ids and server_sequence_ids overlap".to_string(),
            ));
        }
        if self.recent_completed_capacity == 0 {
            return Err(TransportError::InvalidConfig(
                "recent_completed_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
