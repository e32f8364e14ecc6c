use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use netbridge_frame::opcode::{IPC_DATA, KEEP_ALIVE};
use netbridge_frame::{
    is_reserved, join_bounded, opcode_name, Datagram, DatagramQueue, RelayPacket, Signal,
    MAX_RELAY_FRAME_SIZE,
};
use netbridge_socket::{poll_readable, RelaySocket, Socket, SocketRole};
use tracing::{debug, error, info, warn};

use crate::config::{RelayConfig, RelayRole};
use crate::error::{RelayError, Result};
use crate::stats::{RelayStats, RelayStatsSnapshot};
use crate::unique_id::local_unique_id;

#[derive(Debug, Default)]
struct Sockets {
    read: Option<Arc<RelaySocket>>,
    write: Option<Arc<RelaySocket>>,
}

#[derive(Debug, Default)]
struct Liveness {
    last_keepalive_sent: Option<Instant>,
    last_heard: Option<Instant>,
}

struct Shared {
    config: RelayConfig,
    role: RelayRole,
    sockets: Mutex<Sockets>,
    active: AtomicBool,
    connected: AtomicBool,
    unique_id: Mutex<Option<u32>>,
    liveness: Mutex<Liveness>,
    inbound: Arc<DatagramQueue<Datagram>>,
    signal: Option<Arc<Signal>>,
    stats: RelayStats,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Shared {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn unique_id(&self) -> Option<u32> {
        *lock(&self.unique_id)
    }

    fn read_socket(&self) -> Option<Arc<RelaySocket>> {
        lock(&self.sockets).read.clone()
    }

    fn write_socket(&self) -> Option<Arc<RelaySocket>> {
        lock(&self.sockets).write.clone()
    }

    fn is_paired(&self) -> bool {
        let sockets = lock(&self.sockets);
        sockets.read.is_some() && sockets.write.is_some()
    }

    /// Frame and write one packet. A failed write tears down the write side.
    fn write_frame(&self, frame: &RelayPacket) -> Result<()> {
        let write = self.write_socket().ok_or(RelayError::NotPaired)?;
        match write.send(&frame.serialize()) {
            Ok(()) => {
                self.stats.frame_sent();
                Ok(())
            }
            Err(err) => {
                warn!(
                    role = %self.role,
                    path = %write.path().display(),
                    op = opcode_name(frame.op_code()),
                    error = %err,
                    "relay write failed; frame dropped"
                );
                self.mark_disconnected("write failed");
                Err(err.into())
            }
        }
    }

    fn control_frame(&self, op_code: u16, payload: Vec<u8>) -> Result<RelayPacket> {
        let sender = self.unique_id().unwrap_or(0);
        RelayPacket::new(op_code, now_millis(), sender, payload).map_err(Into::into)
    }

    fn send_keepalive(&self) -> Result<()> {
        let frame = self.control_frame(KEEP_ALIVE, Vec::new())?;
        self.write_frame(&frame)?;
        self.stats.keepalive_sent();
        lock(&self.liveness).last_keepalive_sent = Some(Instant::now());
        Ok(())
    }

    fn mark_disconnected(&self, reason: &'static str) {
        let released = lock(&self.sockets).write.take().is_some();
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        *lock(&self.liveness) = Liveness::default();
        if released || was_connected {
            info!(role = %self.role, reason, "relay disconnected");
        }
    }

    /// Handshake sent once the pair first becomes complete.
    fn on_paired(&self) -> Result<()> {
        lock(&self.liveness).last_heard = Some(Instant::now());
        if self.role != RelayRole::Primary {
            return Ok(());
        }

        let id = match self.unique_id() {
            Some(id) => id,
            None => {
                let id = local_unique_id(&self.config.base_name);
                *lock(&self.unique_id) = Some(id);
                id
            }
        };
        self.send_keepalive()?;
        let frame = self.control_frame(IPC_DATA, id.to_le_bytes().to_vec())?;
        self.write_frame(&frame)?;
        debug!(role = %self.role, unique_id = id, "announced unique id");
        Ok(())
    }

    fn on_frame(&self, frame: RelayPacket) {
        self.stats.frame_received();
        match frame.op_code() {
            KEEP_ALIVE => self.on_keepalive(),
            IPC_DATA => self.on_ipc_data(&frame),
            op if is_reserved(op) => {
                debug!(role = %self.role, op = opcode_name(op), "unexpected control frame ignored");
            }
            _ => {
                self.inbound.push(frame.into_datagram());
                self.stats.datagram_delivered();
                if let Some(signal) = &self.signal {
                    signal.raise();
                }
            }
        }
    }

    fn on_keepalive(&self) {
        self.stats.keepalive_received();
        lock(&self.liveness).last_heard = Some(Instant::now());

        match self.role {
            RelayRole::Primary => {
                if !self.connected.swap(true, Ordering::AcqRel) {
                    info!(role = %self.role, "relay connected");
                }
            }
            RelayRole::Secondary => {
                if !self.connected.swap(true, Ordering::AcqRel) {
                    info!(role = %self.role, "relay connected");
                    return;
                }
                if let Err(err) = self.send_keepalive() {
                    debug!(role = %self.role, error = %err, "keepalive reply failed");
                }
            }
        }
    }

    fn on_ipc_data(&self, frame: &RelayPacket) {
        let Some(bytes) = frame.payload().get(..4) else {
            warn!(role = %self.role, len = frame.payload().len(), "short IPC_DATA frame ignored");
            return;
        };
        let mut id = [0u8; 4];
        id.copy_from_slice(bytes);
        let id = u32::from_le_bytes(id);
        *lock(&self.unique_id) = Some(id);
        debug!(role = %self.role, unique_id = id, "adopted peer unique id");
    }

    /// Peer timeout on both ends; the keepalive schedule is the Primary's.
    ///
    /// The Secondary only times out once connected, since before its first
    /// KEEP_ALIVE it has nothing to measure silence against.
    fn check_liveness(&self, now: Instant) {
        if !self.is_paired() {
            return;
        }

        let (last_sent, last_heard) = {
            let liveness = lock(&self.liveness);
            (liveness.last_keepalive_sent, liveness.last_heard)
        };

        let watching = match self.role {
            RelayRole::Primary => true,
            RelayRole::Secondary => self.connected.load(Ordering::Acquire),
        };
        if let (true, Some(timeout), Some(heard)) = (watching, self.config.peer_timeout, last_heard) {
            if now.duration_since(heard) >= timeout {
                warn!(role = %self.role, ?timeout, "no keepalive from peer");
                self.mark_disconnected("peer timed out");
                return;
            }
        }

        if self.role != RelayRole::Primary {
            return;
        }
        if let Some(interval) = self.config.keepalive_interval {
            if last_sent.is_none_or(|at| now.duration_since(at) >= interval) {
                if let Err(err) = self.send_keepalive() {
                    debug!(role = %self.role, error = %err, "keepalive failed");
                }
            }
        }
    }
}

/// One end of a same-host relay between two processes.
///
/// Each end reads on the socket it binds and writes to the socket the other
/// end binds. Either end may start first; [`complete_pair`] creates whatever
/// is missing and can be called again after a disconnect.
///
/// A poll worker drains the read socket and pushes application datagrams
/// onto the inbound queue given at start.
///
/// [`complete_pair`]: ProcessRelay::complete_pair
pub struct ProcessRelay {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ProcessRelay {
    /// Start the poll worker. No sockets are created until [`complete_pair`].
    ///
    /// [`complete_pair`]: ProcessRelay::complete_pair
    pub fn start(
        config: RelayConfig,
        role: RelayRole,
        inbound: Arc<DatagramQueue<Datagram>>,
    ) -> Result<Self> {
        Self::spawn(config, role, inbound, None)
    }

    /// Like [`start`](Self::start), also raising `signal` on every delivery.
    pub fn start_with_signal(
        config: RelayConfig,
        role: RelayRole,
        inbound: Arc<DatagramQueue<Datagram>>,
        signal: Arc<Signal>,
    ) -> Result<Self> {
        Self::spawn(config, role, inbound, Some(signal))
    }

    fn spawn(
        config: RelayConfig,
        role: RelayRole,
        inbound: Arc<DatagramQueue<Datagram>>,
        signal: Option<Arc<Signal>>,
    ) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            config,
            role,
            sockets: Mutex::new(Sockets::default()),
            active: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            unique_id: Mutex::new(None),
            liveness: Mutex::new(Liveness::default()),
            inbound,
            signal,
            stats: RelayStats::default(),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("netbridge-relay-{role}"))
                .spawn(move || poll_loop(&shared))
                .map_err(RelayError::Spawn)?
        };

        info!(
            %role,
            read = %shared.config.read_path(role).display(),
            write = %shared.config.write_path(role).display(),
            "relay started"
        );
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Create whichever of the read and write sockets is missing.
    ///
    /// Returns whether both now exist. When this call completed the pair, the
    /// Primary announces itself with KEEP_ALIVE followed by IPC_DATA carrying
    /// its unique id. An already complete pair is left untouched.
    ///
    /// Failing to bind the read socket is an error; the peer's socket not
    /// existing yet is not.
    pub fn complete_pair(&self) -> Result<bool> {
        if !self.shared.is_active() {
            return Err(RelayError::NotActive);
        }

        let config = &self.shared.config;
        let role = self.shared.role;
        let created = {
            let mut sockets = lock(&self.shared.sockets);
            let mut created = false;

            if sockets.read.is_none() {
                let mut read = RelaySocket::with_mode(config.read_path(role), config.socket_mode);
                read.open(SocketRole::Listener)?;
                sockets.read = Some(Arc::new(read));
                self.shared.stats.socket_created();
                created = true;
            }

            if sockets.write.is_none() {
                let mut write = RelaySocket::new(config.write_path(role));
                match write.open(SocketRole::Sender) {
                    Ok(()) => {
                        sockets.write = Some(Arc::new(write));
                        self.shared.stats.socket_created();
                        created = true;
                    }
                    Err(err) => {
                        debug!(%role, error = %err, "peer socket not available yet");
                    }
                }
            }

            if sockets.read.is_none() || sockets.write.is_none() {
                return Ok(false);
            }
            created
        };

        if created {
            info!(%role, "relay pair complete");
            self.shared.on_paired()?;
        }
        Ok(true)
    }

    /// Frame `datagram` and write it to the peer.
    ///
    /// The size check happens before any socket is touched. A failed write
    /// drops the datagram and marks the relay disconnected.
    pub fn add_datagram(&self, datagram: Datagram) -> Result<()> {
        let frame = RelayPacket::from_datagram(datagram, now_millis())?;
        if !self.shared.is_active() {
            return Err(RelayError::NotActive);
        }
        self.shared.write_frame(&frame)
    }

    /// Send one KEEP_ALIVE now.
    pub fn keep_alive(&self) -> Result<()> {
        self.shared.send_keepalive()
    }

    /// Whether the peer has shown it is alive.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Whether both sockets exist.
    pub fn is_paired(&self) -> bool {
        self.shared.is_paired()
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    /// The Primary's id: computed locally on the Primary, learned from
    /// IPC_DATA on the Secondary.
    pub fn unique_id(&self) -> Option<u32> {
        self.shared.unique_id()
    }

    pub fn role(&self) -> RelayRole {
        self.shared.role
    }

    pub fn config(&self) -> &RelayConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Stop the poll worker and close both sockets, unlinking the bound one.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shared.active.store(false, Ordering::Release);
        join_bounded("relay", worker, self.shared.config.shutdown_timeout);

        let mut sockets = lock(&self.shared.sockets);
        sockets.read = None;
        sockets.write = None;
        self.shared.connected.store(false, Ordering::Release);
        info!(role = %self.shared.role, "relay stopped");
    }
}

impl Drop for ProcessRelay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poll_loop(shared: &Shared) {
    // One byte over the limit so oversized frames are seen, not truncated.
    let mut buf = vec![0u8; MAX_RELAY_FRAME_SIZE + 1];

    while shared.is_active() {
        shared.check_liveness(Instant::now());

        let Some(read) = shared.read_socket() else {
            thread::sleep(shared.config.poll_timeout);
            continue;
        };
        let Some(fd) = read.raw_fd() else {
            thread::sleep(shared.config.poll_timeout);
            continue;
        };

        match poll_readable(fd, shared.config.poll_timeout) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                error!(role = %shared.role, error = %err, "relay poll failed");
                thread::sleep(shared.config.poll_timeout);
                continue;
            }
        }

        loop {
            match read.receive(&mut buf) {
                Ok(Some(n)) => match RelayPacket::deserialize(&buf[..n]) {
                    Ok(frame) => shared.on_frame(frame),
                    Err(err) => {
                        shared.stats.frame_rejected();
                        warn!(role = %shared.role, len = n, error = %err, "relay frame rejected");
                    }
                },
                Ok(None) => break,
                Err(err) => {
                    debug!(role = %shared.role, error = %err, "relay receive failed");
                    break;
                }
            }
            if !shared.is_active() {
                break;
            }
        }
    }
}
