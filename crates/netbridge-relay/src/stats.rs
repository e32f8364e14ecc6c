use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters updated by a running relay.
#[derive(Debug, Default)]
pub struct RelayStats {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    frames_rejected: AtomicU64,
    keepalives_sent: AtomicU64,
    keepalives_received: AtomicU64,
    datagrams_delivered: AtomicU64,
    sockets_created: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub keepalives_sent: u64,
    pub keepalives_received: u64,
    pub datagrams_delivered: u64,
    pub sockets_created: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl RelayStats {
    pub(crate) fn frame_sent(&self) {
        bump(&self.frames_sent);
    }

    pub(crate) fn frame_received(&self) {
        bump(&self.frames_received);
    }

    pub(crate) fn frame_rejected(&self) {
        bump(&self.frames_rejected);
    }

    pub(crate) fn keepalive_sent(&self) {
        bump(&self.keepalives_sent);
    }

    pub(crate) fn keepalive_received(&self) {
        bump(&self.keepalives_received);
    }

    pub(crate) fn datagram_delivered(&self) {
        bump(&self.datagrams_delivered);
    }

    pub(crate) fn socket_created(&self) {
        bump(&self.sockets_created);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
            keepalives_received: self.keepalives_received.load(Ordering::Relaxed),
            datagrams_delivered: self.datagrams_delivered.load(Ordering::Relaxed),
            sockets_created: self.sockets_created.load(Ordering::Relaxed),
        }
    }
}
