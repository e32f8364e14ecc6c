//! Sequences: the unit of reliable delivery.
//!
//! An outgoing payload is split into `count` packets that share one sequence
//! id. The sender keeps the encoded packets in a [`RetainedStore`] until the
//! receiver ACKs the sequence. The receiver collects packets in an
//! [`IncomingSequence`] until every index is present.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use netbridge_frame::{Packet, ProtocolConfig};

use crate::config::SequenceIdRange;
use crate::error::Result;

/// Hands out sequence ids from a range, wrapping at the end.
#[derive(Debug)]
pub struct SequenceIdAllocator {
    range: SequenceIdRange,
    next: u32,
}

impl SequenceIdAllocator {
    pub fn new(range: SequenceIdRange) -> Self {
        Self {
            range,
            next: range.first,
        }
    }

    pub fn allocate(&mut self) -> u32 {
        let id = self.next;
        self.next = if id >= self.range.last {
            self.range.first
        } else {
            id + 1
        };
        id
    }
}

/// Split `payload` into encoded packets of at most `protocol.max_payload()`
/// bytes each. An empty payload still produces one packet.
pub fn encode_sequence(
    op_code: u16,
    sequence_id: u32,
    payload: &Bytes,
    protocol: &ProtocolConfig,
) -> Result<Vec<Bytes>> {
    let chunk = protocol.max_payload().max(1);
    let count = payload.len().div_ceil(chunk).max(1);

    (0..count)
        .map(|index| {
            let start = index * chunk;
            let end = (start + chunk).min(payload.len());
            Packet::data(
                op_code,
                sequence_id,
                index as u32,
                count as u32,
                payload.slice(start..end),
            )
            .encode(protocol)
            .map_err(Into::into)
        })
        .collect()
}

/// Sent packets of one sequence, kept until acknowledged or expired.
#[derive(Debug, Clone)]
pub struct RetainedSequence {
    pub packets: Vec<Bytes>,
    pub created_at: Instant,
    pub last_sent: Instant,
    pub resends: u32,
}

/// Retention policy applied by [`RetainedStore::maintain`].
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub resend_after: Duration,
    pub max_resends: u32,
    pub retain_for: Duration,
}

/// What one maintenance pass decided.
#[derive(Debug, Default)]
pub struct RetentionSweep {
    /// Sequences due for a full resend: `(peer, sequence id, packets)`.
    pub resend: Vec<(SocketAddr, u32, Vec<Bytes>)>,
    /// Sequences dropped because they outlived the retention window.
    pub expired: Vec<(SocketAddr, u32)>,
}

/// Encoded packets of every unacknowledged outgoing sequence, keyed by
/// `(peer address, sequence id)`.
///
/// Shared between workers: the send worker retains, the listen worker reads
/// for retransmission, the update worker releases and sweeps.
#[derive(Debug, Default)]
pub struct RetainedStore {
    inner: Mutex<HashMap<(SocketAddr, u32), RetainedSequence>>,
}

impl RetainedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(SocketAddr, u32), RetainedSequence>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn retain(&self, peer: SocketAddr, sequence_id: u32, packets: Vec<Bytes>) {
        let now = Instant::now();
        self.lock().insert(
            (peer, sequence_id),
            RetainedSequence {
                packets,
                created_at: now,
                last_sent: now,
                resends: 0,
            },
        );
    }

    /// The encoded packet at `index`, if the sequence is still retained.
    pub fn packet(&self, peer: SocketAddr, sequence_id: u32, index: u32) -> Option<Bytes> {
        self.lock()
            .get(&(peer, sequence_id))
            .and_then(|seq| seq.packets.get(index as usize).cloned())
    }

    /// Drop a sequence. Returns whether it was retained.
    pub fn release(&self, peer: SocketAddr, sequence_id: u32) -> bool {
        self.lock().remove(&(peer, sequence_id)).is_some()
    }

    /// Drop every sequence sent to `peer`.
    pub fn release_peer(&self, peer: SocketAddr) -> usize {
        let mut inner = self.lock();
        let before = inner.len();
        inner.retain(|(addr, _), _| *addr != peer);
        before - inner.len()
    }

    pub fn contains(&self, peer: SocketAddr, sequence_id: u32) -> bool {
        self.lock().contains_key(&(peer, sequence_id))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Expire old sequences and pick unacknowledged ones to resend.
    ///
    /// A sequence that has used up its resends stays retained, so it can
    /// still answer retransmission requests, until it expires.
    pub fn maintain(&self, now: Instant, policy: RetentionPolicy) -> RetentionSweep {
        let mut sweep = RetentionSweep::default();
        let mut inner = self.lock();

        inner.retain(|&(peer, sequence_id), seq| {
            if now.duration_since(seq.created_at) >= policy.retain_for {
                sweep.expired.push((peer, sequence_id));
                return false;
            }
            if seq.resends < policy.max_resends
                && now.duration_since(seq.last_sent) >= policy.resend_after
            {
                seq.resends += 1;
                seq.last_sent = now;
                sweep.resend.push((peer, sequence_id, seq.packets.clone()));
            }
            true
        });

        sweep
    }
}

/// Why an incoming packet was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// `index >= count`, or `count` is zero.
    BadIndex,
    /// `count` is larger than the configured limit.
    TooManyPackets,
    /// `count` or op-code differs from earlier packets of the same sequence.
    Inconsistent,
}

/// Receive-side reassembly state of one sequence.
#[derive(Debug)]
pub struct IncomingSequence {
    op_code: u16,
    parts: Vec<Option<Bytes>>,
    received: usize,
    /// Last time a new packet arrived or a retransmission round was sent.
    last_progress: Instant,
    requests: u32,
}

impl IncomingSequence {
    /// Start tracking a sequence from its first packet's header.
    pub fn new(packet: &Packet, max_packets: u32, now: Instant) -> std::result::Result<Self, Rejected> {
        if packet.count == 0 || packet.index >= packet.count {
            return Err(Rejected::BadIndex);
        }
        if packet.count > max_packets {
            return Err(Rejected::TooManyPackets);
        }
        Ok(Self {
            op_code: packet.op_code,
            parts: vec![None; packet.count as usize],
            received: 0,
            last_progress: now,
            requests: 0,
        })
    }

    /// Store one packet. Returns `Ok(true)` if it was new.
    pub fn insert(&mut self, packet: &Packet, now: Instant) -> std::result::Result<bool, Rejected> {
        if packet.count as usize != self.parts.len() || packet.op_code != self.op_code {
            return Err(Rejected::Inconsistent);
        }
        let slot = self
            .parts
            .get_mut(packet.index as usize)
            .ok_or(Rejected::BadIndex)?;
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(packet.payload.clone());
        self.received += 1;
        self.last_progress = now;
        Ok(true)
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.parts.len()
    }

    pub fn op_code(&self) -> u16 {
        self.op_code
    }

    pub fn count(&self) -> u32 {
        self.parts.len() as u32
    }

    pub fn requests(&self) -> u32 {
        self.requests
    }

    /// Indices not yet received, in order.
    pub fn missing(&self) -> Vec<u32> {
        self.parts
            .iter()
            .enumerate()
            .filter(|(_, part)| part.is_none())
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Whether the sequence has been stalled for at least `after`.
    pub fn is_stalled(&self, now: Instant, after: Duration) -> bool {
        !self.is_complete() && now.duration_since(self.last_progress) >= after
    }

    /// Record one retransmission round.
    pub fn note_request(&mut self, now: Instant) {
        self.requests += 1;
        self.last_progress = now;
    }

    /// Count a RETRANSMISSION_ACK as progress so the next round waits again.
    pub fn note_retransmission_ack(&mut self, now: Instant) {
        self.last_progress = now;
    }

    /// Concatenate the payload in index order. `None` until complete.
    pub fn assemble(&self) -> Option<Bytes> {
        if !self.is_complete() {
            return None;
        }
        if let [Some(only)] = self.parts.as_slice() {
            return Some(only.clone());
        }
        let total = self.parts.iter().flatten().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(total);
        for part in self.parts.iter().flatten() {
            out.extend_from_slice(part);
        }
        Some(out.freeze())
    }
}
