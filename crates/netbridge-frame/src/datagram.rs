use std::time::Instant;

use bytes::Bytes;

/// An application message crossing a queue boundary.
///
/// Deliberately not `Clone`: a datagram is handed from producer to consumer
/// exactly once. The payload is a [`Bytes`] so splitting it into packets
/// never copies.
#[derive(Debug, PartialEq, Eq)]
pub struct Datagram {
    op_code: u16,
    sender_id: u32,
    payload: Bytes,
    arrived_at: Instant,
}

impl Datagram {
    pub fn new(op_code: u16, sender_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            op_code,
            sender_id,
            payload: payload.into(),
            arrived_at: Instant::now(),
        }
    }

    pub fn op_code(&self) -> u16 {
        self.op_code
    }

    /// Peer that produced the datagram. Zero for locally built datagrams and
    /// for a client's view of its server.
    pub fn sender_id(&self) -> u32 {
        self.sender_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// When this datagram was created or assembled.
    pub fn arrived_at(&self) -> Instant {
        self.arrived_at
    }

    /// Replace the sender id, e.g. when forwarding between transports.
    pub fn with_sender(mut self, sender_id: u32) -> Self {
        self.sender_id = sender_id;
        self
    }

    /// Consume into `(op_code, sender_id, payload)`.
    pub fn into_parts(self) -> (u16, u32, Bytes) {
        (self.op_code, self.sender_id, self.payload)
    }
}
