use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};

/// Accepted peers by id. Written by the update worker, read by the send
/// worker and the API.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    inner: Mutex<BTreeMap<u32, SocketAddr>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u32, SocketAddr>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, peer_id: u32, addr: SocketAddr) {
        self.lock().insert(peer_id, addr);
    }

    pub fn remove(&self, peer_id: u32) -> Option<SocketAddr> {
        self.lock().remove(&peer_id)
    }

    pub fn get(&self, peer_id: u32) -> Option<SocketAddr> {
        self.lock().get(&peer_id).copied()
    }

    pub fn contains(&self, peer_id: u32) -> bool {
        self.lock().contains_key(&peer_id)
    }

    /// Every accepted peer, ordered by id.
    pub fn entries(&self) -> Vec<(u32, SocketAddr)> {
        self.lock().iter().map(|(id, addr)| (*id, *addr)).collect()
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.lock().values().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
