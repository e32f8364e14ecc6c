use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::connection::ConnectionState;

/// Peer id a client uses for its server.
pub const SERVER_PEER_ID: u32 = 0;

/// First peer id a server hands out.
pub const FIRST_CLIENT_PEER_ID: u32 = 1;

/// CONNECTION_ACCEPTED payload: the peer id the server assigned.
pub fn encode_peer_id(peer_id: u32) -> Bytes {
    Bytes::copy_from_slice(&peer_id.to_le_bytes())
}

pub fn decode_peer_id(payload: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = payload.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Client side of the connection handshake.
///
/// The client repeats CONNECTION_REQUEST until CONNECTION_ACCEPTED arrives
/// from the exact destination it asked.
#[derive(Debug)]
pub struct ClientHandshake {
    destination: SocketAddr,
    state: ConnectionState,
    last_attempt: Option<Instant>,
    attempts: u32,
    assigned_id: Option<u32>,
}

impl ClientHandshake {
    pub fn new(destination: SocketAddr) -> Self {
        Self {
            destination,
            state: ConnectionState::Unconnected,
            last_attempt: None,
            attempts: 0,
            assigned_id: None,
        }
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Peer id the server gave us, once accepted.
    pub fn assigned_id(&self) -> Option<u32> {
        self.assigned_id
    }

    /// Whether a connection request should go out now.
    pub fn is_due(&self, now: Instant, retry_interval: Duration) -> bool {
        match self.state {
            ConnectionState::Unconnected => true,
            ConnectionState::Handshaking => self
                .last_attempt
                .is_none_or(|at| now.duration_since(at) >= retry_interval),
            ConnectionState::Accepted | ConnectionState::Closed => false,
        }
    }

    pub fn record_attempt(&mut self, now: Instant) {
        self.state = ConnectionState::Handshaking;
        self.last_attempt = Some(now);
        self.attempts += 1;
    }

    /// Handle CONNECTION_ACCEPTED. Returns the assigned peer id if this
    /// completed the handshake.
    pub fn accept(&mut self, from: SocketAddr, payload: &[u8]) -> Option<u32> {
        if from != self.destination || self.state != ConnectionState::Handshaking {
            return None;
        }
        let assigned = decode_peer_id(payload)?;
        self.state = ConnectionState::Accepted;
        self.assigned_id = Some(assigned);
        Some(assigned)
    }

    /// The server went away. A new handshake needs a new transport.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

/// Server side peer id assignment.
#[derive(Debug)]
pub struct PeerIdAllocator {
    next: u32,
}

impl Default for PeerIdAllocator {
    fn default() -> Self {
        Self {
            next: FIRST_CLIENT_PEER_ID,
        }
    }
}

impl PeerIdAllocator {
    pub fn allocate(&mut self) -> u32 {
        let id = self.next;
        self.next = self.next.checked_add(1).unwrap_or(FIRST_CLIENT_PEER_ID);
        id
    }
}
