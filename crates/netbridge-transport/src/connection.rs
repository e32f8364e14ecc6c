use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use netbridge_frame::{Datagram, Packet};
use tracing::{debug, warn};

use crate::sequence::IncomingSequence;

/// Lifecycle of a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Unconnected,
    Handshaking,
    Accepted,
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unconnected => "unconnected",
            Self::Handshaking => "handshaking",
            Self::Accepted => "accepted",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work a connection asks its owner to carry out.
#[derive(Debug, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Tell the peer the sequence is complete.
    SendAck { sequence_id: u32 },
    /// Ask the peer for one packet again.
    RequestRetransmission { sequence_id: u32, index: u32 },
    /// Hand an assembled message to the application.
    Deliver(Datagram),
}

/// Limits applied by [`Connection`] to incoming sequences.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveLimits {
    pub retransmit_after: Duration,
    pub max_retransmission_requests: u32,
    pub max_packets_per_sequence: u32,
    pub recent_completed_capacity: usize,
}

/// Receive-side reliability state for one accepted peer.
///
/// Owned by the update worker alone. All methods return the work to be done
/// instead of doing I/O, so the logic runs without sockets.
#[derive(Debug)]
pub struct Connection {
    peer_addr: SocketAddr,
    peer_id: u32,
    state: ConnectionState,
    limits: ReceiveLimits,
    incoming: HashMap<u32, IncomingSequence>,
    recent: VecDeque<u32>,
    recent_set: HashSet<u32>,
    last_heard: Instant,
}

impl Connection {
    /// A connection whose handshake has just completed.
    pub fn accepted(peer_addr: SocketAddr, peer_id: u32, limits: ReceiveLimits) -> Self {
        Self {
            peer_addr,
            peer_id,
            state: ConnectionState::Accepted,
            limits,
            incoming: HashMap::new(),
            recent: VecDeque::new(),
            recent_set: HashSet::new(),
            last_heard: Instant::now(),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn peer_id(&self) -> u32 {
        self.peer_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Accepted
    }

    /// Sequences still being reassembled.
    pub fn pending_sequences(&self) -> usize {
        self.incoming.len()
    }

    pub fn last_heard(&self) -> Instant {
        self.last_heard
    }

    /// Record that the peer is alive.
    pub fn touch(&mut self, now: Instant) {
        self.last_heard = now;
    }

    /// Stop accepting packets and drop all receive state.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
        self.incoming.clear();
    }

    /// Process one application packet.
    pub fn on_data(&mut self, packet: Packet, now: Instant) -> Vec<ConnectionAction> {
        if !self.is_open() {
            debug!(peer = %self.peer_addr, sequence_id = packet.sequence_id, "packet on closed connection dropped");
            return Vec::new();
        }
        self.touch(now);

        let sequence_id = packet.sequence_id;
        if self.recent_set.contains(&sequence_id) {
            debug!(peer = %self.peer_addr, sequence_id, "duplicate of completed sequence; re-acknowledging");
            return vec![ConnectionAction::SendAck { sequence_id }];
        }

        let entry = match self.incoming.entry(sequence_id) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                match IncomingSequence::new(&packet, self.limits.max_packets_per_sequence, now) {
                    Ok(seq) => e.insert(seq),
                    Err(reason) => {
                        warn!(peer = %self.peer_addr, sequence_id, ?reason, "rejected sequence header");
                        return Vec::new();
                    }
                }
            }
        };

        match entry.insert(&packet, now) {
            Ok(true) => {}
            Ok(false) => {
                debug!(peer = %self.peer_addr, sequence_id, index = packet.index, "duplicate packet");
                return Vec::new();
            }
            Err(reason) => {
                warn!(peer = %self.peer_addr, sequence_id, index = packet.index, ?reason, "packet inconsistent with its sequence");
                return Vec::new();
            }
        }

        if !entry.is_complete() {
            return Vec::new();
        }

        let Some(seq) = self.incoming.remove(&sequence_id) else {
            return Vec::new();
        };
        let Some(payload) = seq.assemble() else {
            return Vec::new();
        };
        self.remember_completed(sequence_id);
        debug!(peer = %self.peer_addr, sequence_id, bytes = payload.len(), "sequence complete");

        vec![
            ConnectionAction::Deliver(Datagram::new(seq.op_code(), self.peer_id, payload)),
            ConnectionAction::SendAck { sequence_id },
        ]
    }

    /// The peer re-sent a packet we asked for.
    pub fn on_retransmission_ack(&mut self, sequence_id: u32, now: Instant) {
        self.touch(now);
        if let Some(seq) = self.incoming.get_mut(&sequence_id) {
            seq.note_retransmission_ack(now);
        }
    }

    /// The peer no longer holds a packet we asked for; the sequence can
    /// never complete.
    pub fn on_retransmission_impossible(&mut self, sequence_id: u32, now: Instant) -> bool {
        self.touch(now);
        let dropped = self.incoming.remove(&sequence_id).is_some();
        if dropped {
            warn!(peer = %self.peer_addr, sequence_id, "sequence permanently incomplete");
        }
        dropped
    }

    /// Ask for missing packets of stalled sequences; abandon sequences that
    /// used up their retransmission rounds.
    pub fn maintain(&mut self, now: Instant) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if !self.is_open() {
            return actions;
        }

        let limits = self.limits;
        let peer = self.peer_addr;
        self.incoming.retain(|&sequence_id, seq| {
            if !seq.is_stalled(now, limits.retransmit_after) {
                return true;
            }
            if seq.requests() >= limits.max_retransmission_requests {
                warn!(peer = %peer, sequence_id, missing = seq.missing().len(), "giving up on incomplete sequence");
                return false;
            }
            seq.note_request(now);
            actions.extend(
                seq.missing()
                    .into_iter()
                    .map(|index| ConnectionAction::RequestRetransmission { sequence_id, index }),
            );
            true
        });

        actions
    }

    fn remember_completed(&mut self, sequence_id: u32) {
        if self.recent_set.insert(sequence_id) {
            self.recent.push_back(sequence_id);
        }
        while self.recent.len() > self.limits.recent_completed_capacity {
            if let Some(old) = self.recent.pop_front() {
                self.recent_set.remove(&old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn limits() -> ReceiveLimits {
        ReceiveLimits {
            retransmit_after: Duration::from_millis(10),
            max_retransmission_requests: 2,
            max_packets_per_sequence: 64,
            recent_completed_capacity: 4,
        }
    }

    fn conn() -> Connection {
        Connection::accepted(SocketAddr::from(([127, 0, 0, 1], 4000)), 3, limits())
    }

    fn part(seq: u32, index: u32, count: u32, data: &'static [u8]) -> Packet {
        Packet::data(42, seq, index, count, Bytes::from_static(data))
    }

    fn delivered(actions: &[ConnectionAction]) -> Vec<&Datagram> {
        actions
            .iter()
            .filter_map(|a| match a {
                ConnectionAction::Deliver(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn single_packet_delivers_and_acks() {
        let mut c = conn();
        let actions = c.on_data(part(1, 0, 1, b"hi"), Instant::now());
        let out = delivered(&actions);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sender_id(), 3);
        assert_eq!(out[0].op_code(), 42);
        assert_eq!(out[0].payload().as_ref(), b"hi");
        assert!(actions.contains(&ConnectionAction::SendAck { sequence_id: 1 }));
        assert_eq!(c.pending_sequences(), 0);
    }

    #[test]
    fn duplicate_of_completed_sequence_is_reacked_not_redelivered() {
        let mut c = conn();
        let now = Instant::now();
        c.on_data(part(1, 0, 1, b"x"), now);
        let again = c.on_data(part(1, 0, 1, b"x"), now);
        assert_eq!(again, vec![ConnectionAction::SendAck { sequence_id: 1 }]);
    }

    #[test]
    fn missing_packet_is_requested_then_completes() {
        let mut c = conn();
        let start = Instant::now();
        assert!(c.on_data(part(7, 0, 3, b"ab"), start).is_empty());
        assert!(c.on_data(part(7, 2, 3, b"ef"), start).is_empty());

        assert!(c.maintain(start + Duration::from_millis(5)).is_empty());
        let requests = c.maintain(start + Duration::from_millis(15));
        assert_eq!(
            requests,
            vec![ConnectionAction::RequestRetransmission { sequence_id: 7, index: 1 }]
        );

        let actions = c.on_data(part(7, 1, 3, b"cd"), start + Duration::from_millis(20));
        assert_eq!(delivered(&actions)[0].payload().as_ref(), b"abcdef");
    }

    #[test]
    fn sequence_abandoned_after_max_requests() {
        let mut c = conn();
        let start = Instant::now();
        c.on_data(part(9, 0, 2, b"a"), start);

        let step = Duration::from_millis(11);
        assert_eq!(c.maintain(start + step).len(), 1);
        assert_eq!(c.maintain(start + step * 2).len(), 1);
        assert!(c.maintain(start + step * 3).is_empty());
        assert_eq!(c.pending_sequences(), 0);
    }

    #[test]
    fn retransmission_impossible_drops_tracking() {
        let mut c = conn();
        let now = Instant::now();
        c.on_data(part(4, 0, 2, b"a"), now);
        assert!(c.on_retransmission_impossible(4, now));
        assert!(!c.on_retransmission_impossible(4, now));
        assert_eq!(c.pending_sequences(), 0);
    }

    #[test]
    fn closed_connection_accepts_nothing() {
        let mut c = conn();
        c.close();
        assert_eq!(c.state(), ConnectionState::Closed);
        assert!(c.on_data(part(1, 0, 1, b"x"), Instant::now()).is_empty());
    }

    #[test]
    fn recent_set_is_bounded() {
        let mut c = conn();
        let now = Instant::now();
        for seq in 1..=6 {
            c.on_data(part(seq, 0, 1, b"x"), now);
        }
        // Sequence 1 has aged out, so it is delivered again.
        let actions = c.on_data(part(1, 0, 1, b"x"), now);
        assert_eq!(delivered(&actions).len(), 1);
        // Sequence 6 is still remembered.
        let actions = c.on_data(part(6, 0, 1, b"x"), now);
        assert!(delivered(&actions).is_empty());
    }
}
