use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use netbridge_frame::opcode::{
    ACK, CONNECTION_ACCEPTED, CONNECTION_DISCONNECT, CONNECTION_REQUEST, KEEP_ALIVE,
    RETRANSMISSION_ACK, RETRANSMISSION_IMPOSSIBLE, RETRANSMISSION_REQUEST,
};
use netbridge_frame::{join_bounded, opcode_name, Datagram, DatagramQueue, FrameError, Packet};
use netbridge_socket::{poll_readable, Socket, UdpEndpoint};
use tracing::{debug, error, info, warn};

use crate::config::TransportConfig;
use crate::connection::{Connection, ConnectionAction, ConnectionState, ReceiveLimits};
use crate::error::{Result, TransportError};
use crate::handshake::{encode_peer_id, ClientHandshake, PeerIdAllocator, SERVER_PEER_ID};
use crate::peers::PeerDirectory;
use crate::sequence::{encode_sequence, RetainedStore, RetentionPolicy, SequenceIdAllocator};
use crate::validator::{AcceptAll, FromAddress, PacketValidator};

/// Largest UDP datagram the listen worker reads.
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Datagrams read per readiness event before re-checking for shutdown.
const MAX_READS_PER_POLL: usize = 64;

/// Packets dispatched per update wake before running maintenance.
const MAX_DISPATCH_PER_WAKE: usize = 256;

const WAIT_INTERVAL: Duration = Duration::from_millis(5);

/// Which side of the handshake this transport plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportRole {
    /// Accept connection requests from any address.
    Server,
    /// Connect to one server.
    Client { destination: SocketAddr },
}

#[derive(Debug)]
enum Target {
    AllPeers,
    Peer(u32),
}

#[derive(Debug)]
struct Outbound {
    target: Target,
    datagram: Datagram,
}

enum Route {
    Send(Vec<SocketAddr>),
    Hold,
    Unknown(u32),
}

#[derive(Debug)]
struct Status {
    state: ConnectionState,
    local_peer_id: Option<u32>,
}

/// State shared by the API and the three workers.
struct Shared {
    config: TransportConfig,
    role: TransportRole,
    socket: UdpEndpoint,
    active: AtomicBool,
    status: Mutex<Status>,
    outbound: DatagramQueue<Outbound>,
    /// Datagrams queued or held that have not been handed to the socket.
    pending: AtomicUsize,
    received: DatagramQueue<(Packet, SocketAddr)>,
    inbound: Arc<DatagramQueue<Datagram>>,
    retained: RetainedStore,
    peers: PeerDirectory,
    validator: Box<dyn PacketValidator>,
}

impl Shared {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        self.status().state = state;
    }

    fn send_raw(&self, bytes: &[u8], to: SocketAddr) {
        if let Err(err) = self.socket.send_to(bytes, to) {
            debug!(peer = %to, error = %err, "send failed; relying on retransmission");
        }
    }

    fn send_packet(&self, packet: &Packet, to: SocketAddr) {
        match packet.encode(&self.config.protocol) {
            Ok(bytes) => self.send_raw(&bytes, to),
            Err(err) => warn!(
                peer = %to,
                op = opcode_name(packet.op_code),
                error = %err,
                "failed to encode packet"
            ),
        }
    }

    fn route(&self, target: &Target) -> Route {
        match *target {
            Target::AllPeers => {
                let addrs = self.peers.addresses();
                if addrs.is_empty() {
                    Route::Hold
                } else {
                    Route::Send(addrs)
                }
            }
            Target::Peer(peer_id) => match self.peers.get(peer_id) {
                Some(addr) => Route::Send(vec![addr]),
                None if matches!(self.role, TransportRole::Client { .. })
                    && self.status().state != ConnectionState::Closed =>
                {
                    Route::Hold
                }
                None => Route::Unknown(peer_id),
            },
        }
    }

    /// Listen-side handling of one raw datagram.
    fn on_datagram(&self, bytes: &[u8], from: SocketAddr) {
        let packet = match Packet::decode(bytes, &self.config.protocol) {
            Ok(packet) => packet,
            Err(err @ (FrameError::InvalidMagic { .. } | FrameError::VersionMismatch { .. })) => {
                warn!(peer = %from, error = %err, "foreign packet dropped");
                return;
            }
            Err(err) => {
                debug!(peer = %from, error = %err, "damaged packet dropped");
                return;
            }
        };

        if !self.validator.accepts(&packet, &from) {
            debug!(peer = %from, op = opcode_name(packet.op_code), "packet rejected by validator");
            return;
        }

        if packet.op_code == RETRANSMISSION_REQUEST {
            self.answer_retransmission(&packet, from);
            return;
        }

        self.received.push((packet, from));
    }

    fn answer_retransmission(&self, request: &Packet, from: SocketAddr) {
        let (sequence_id, index) = (request.sequence_id, request.index);
        match self.retained.packet(from, sequence_id, index) {
            Some(original) => {
                self.send_raw(&original, from);
                self.send_packet(&Packet::control(RETRANSMISSION_ACK, sequence_id, index), from);
                debug!(peer = %from, sequence_id, index, "packet retransmitted");
            }
            None => {
                self.send_packet(
                    &Packet::control(RETRANSMISSION_IMPOSSIBLE, sequence_id, index),
                    from,
                );
                debug!(peer = %from, sequence_id, index, "retransmission impossible");
            }
        }
    }
}

/// Reliable datagram transport over one UDP socket.
///
/// Three worker threads share the socket:
/// - **send** splits queued datagrams into sequences and transmits them
/// - **listen** reads and validates packets, answering retransmission
///   requests directly from the retained store
/// - **update** owns every connection, runs the handshake, reassembles and
///   delivers sequences, and drives retransmission and retention
///
/// Assembled messages are pushed onto the caller's inbound queue.
/// Dropping the transport shuts it down.
pub struct Transport {
    shared: Arc<Shared>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl Transport {
    /// Start with the role's default validator: [`AcceptAll`] for a server,
    /// [`FromAddress`] bound to the destination for a client.
    pub fn start(
        config: TransportConfig,
        role: TransportRole,
        inbound: Arc<DatagramQueue<Datagram>>,
    ) -> Result<Self> {
        let validator: Box<dyn PacketValidator> = match role {
            TransportRole::Server => Box::new(AcceptAll),
            TransportRole::Client { destination } => Box::new(FromAddress(destination)),
        };
        Self::spawn(config, role, inbound, validator)
    }

    /// Start with a custom validator.
    pub fn start_with_validator<V>(
        config: TransportConfig,
        role: TransportRole,
        inbound: Arc<DatagramQueue<Datagram>>,
        validator: V,
    ) -> Result<Self>
    where
        V: PacketValidator + 'static,
    {
        Self::spawn(config, role, inbound, Box::new(validator))
    }

    fn spawn(
        config: TransportConfig,
        role: TransportRole,
        inbound: Arc<DatagramQueue<Datagram>>,
        validator: Box<dyn PacketValidator>,
    ) -> Result<Self> {
        config.validate()?;
        let socket = UdpEndpoint::bind(config.bind)?;
        info!(local = ?socket.local_addr(), ?role, "transport starting");

        let shared = Arc::new(Shared {
            config,
            role,
            socket,
            active: AtomicBool::new(true),
            status: Mutex::new(Status {
                state: ConnectionState::Unconnected,
                local_peer_id: None,
            }),
            outbound: DatagramQueue::new(),
            pending: AtomicUsize::new(0),
            received: DatagramQueue::new(),
            inbound,
            retained: RetainedStore::new(),
            peers: PeerDirectory::new(),
            validator,
        });

        let mut transport = Self {
            shared,
            workers: Vec::with_capacity(3),
        };
        transport.spawn_worker("send", send_loop)?;
        transport.spawn_worker("listen", listen_loop)?;
        transport.spawn_worker("update", |shared| UpdateWorker::new(shared).run())?;
        Ok(transport)
    }

    fn spawn_worker(&mut self, name: &'static str, body: fn(&Shared)) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("netbridge-{name}"))
            .spawn(move || body(&shared))
            .map_err(|source| TransportError::Spawn { name, source })?;
        self.workers.push((name, handle));
        Ok(())
    }

    /// Queue a datagram for every accepted peer.
    ///
    /// Never blocks. Datagrams queued before any peer is accepted are held
    /// until one is.
    pub fn enqueue_send(&self, datagram: Datagram) -> Result<()> {
        self.enqueue(Target::AllPeers, datagram)
    }

    /// Queue a datagram for one peer. A client addresses its server as peer 0.
    pub fn enqueue_send_to(&self, peer_id: u32, datagram: Datagram) -> Result<()> {
        let known = match self.shared.role {
            TransportRole::Server => self.shared.peers.contains(peer_id),
            TransportRole::Client { .. } => peer_id == SERVER_PEER_ID,
        };
        if !known {
            return Err(TransportError::UnknownPeer(peer_id));
        }
        self.enqueue(Target::Peer(peer_id), datagram)
    }

    fn enqueue(&self, target: Target, datagram: Datagram) -> Result<()> {
        if !self.shared.is_active() {
            return Err(TransportError::NotActive);
        }
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.shared.outbound.push(Outbound { target, datagram });
        Ok(())
    }

    /// Wait up to `timeout` until every queued datagram has been sent and
    /// acknowledged or given up on. Returns whether that happened in time.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.pending.load(Ordering::Acquire) == 0 && self.shared.retained.is_empty() {
                return true;
            }
            if !self.is_active() || Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_INTERVAL);
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    /// Whether at least one peer has completed the handshake.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Accepted
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status().state
    }

    /// Wait up to `timeout` for the handshake to complete.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_connected() {
                return true;
            }
            if !self.is_active() || Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_INTERVAL);
        }
    }

    /// The bound socket address, with the ephemeral port resolved.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.socket.local_addr()
    }

    /// The id the server assigned to this client, once accepted.
    pub fn local_peer_id(&self) -> Option<u32> {
        self.shared.status().local_peer_id
    }

    /// Accepted peers, ordered by id.
    pub fn peers(&self) -> Vec<(u32, SocketAddr)> {
        self.shared.peers.entries()
    }

    pub fn role(&self) -> TransportRole {
        self.shared.role
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    /// Sent sequences still awaiting acknowledgement.
    pub fn unacked_sequences(&self) -> usize {
        self.shared.retained.len()
    }

    /// Disconnect from every peer and stop the workers.
    ///
    /// Each worker is joined for at most `shutdown_timeout`; a worker that
    /// does not stop in time is logged and detached. Idempotent.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() && !self.shared.is_active() {
            return;
        }

        if self.shared.is_active() {
            let disconnect = Packet::control(CONNECTION_DISCONNECT, 0, 0);
            for (peer_id, addr) in self.shared.peers.entries() {
                debug!(peer = %addr, peer_id, "sending disconnect");
                self.shared.send_packet(&disconnect, addr);
            }
        }

        self.shared.active.store(false, Ordering::Release);
        self.shared.outbound.wake_all();
        self.shared.received.wake_all();

        let timeout = self.shared.config.shutdown_timeout;
        for (name, handle) in self.workers.drain(..) {
            join_bounded(name, handle, timeout);
        }

        self.shared.set_state(ConnectionState::Closed);
        info!(local = ?self.local_addr(), "transport stopped");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("role", &self.shared.role)
            .field("local_addr", &self.local_addr())
            .field("state", &self.state())
            .field("peers", &self.peers())
            .finish()
    }
}

fn send_loop(shared: &Shared) {
    let range = match shared.role {
        TransportRole::Server => shared.config.server_sequence_ids,
        TransportRole::Client { .. } => shared.config.client_sequence_ids,
    };
    let mut ids = SequenceIdAllocator::new(range);
    let mut held: VecDeque<Outbound> = VecDeque::new();

    while shared.is_active() {
        let next = if !held.is_empty() && !shared.peers.is_empty() {
            held.pop_front()
        } else {
            shared.outbound.pop_timeout(shared.config.poll_timeout)
        };
        let Some(outbound) = next else {
            continue;
        };

        match shared.route(&outbound.target) {
            Route::Send(addrs) => {
                send_datagram(shared, &mut ids, outbound.datagram, &addrs);
                shared.pending.fetch_sub(1, Ordering::AcqRel);
            }
            Route::Hold => {
                if held.is_empty() {
                    debug!("no accepted peer yet; holding outbound datagrams");
                }
                held.push_back(outbound);
            }
            Route::Unknown(peer_id) => {
                warn!(peer_id, "datagram for unknown peer dropped");
                shared.pending.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    if !held.is_empty() {
        debug!(count = held.len(), "dropping held datagrams on shutdown");
    }
}

fn send_datagram(
    shared: &Shared,
    ids: &mut SequenceIdAllocator,
    datagram: Datagram,
    addrs: &[SocketAddr],
) {
    let (op_code, _, payload) = datagram.into_parts();
    let sequence_id = ids.allocate();
    let packets = match encode_sequence(op_code, sequence_id, &payload, &shared.config.protocol) {
        Ok(packets) => packets,
        Err(err) => {
            warn!(op = opcode_name(op_code), error = %err, "failed to encode datagram");
            return;
        }
    };

    for &addr in addrs {
        shared.retained.retain(addr, sequence_id, packets.clone());
        for packet in &packets {
            shared.send_raw(packet, addr);
        }
        debug!(
            peer = %addr,
            sequence_id,
            op = opcode_name(op_code),
            packets = packets.len(),
            bytes = payload.len(),
            "sequence sent"
        );
    }
}

fn listen_loop(shared: &Shared) {
    let Some(fd) = shared.socket.raw_fd() else {
        error!("listen worker started without an open socket");
        return;
    };
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    while shared.is_active() {
        match poll_readable(fd, shared.config.poll_timeout) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                warn!(error = %err, "poll failed");
                thread::sleep(shared.config.poll_timeout);
                continue;
            }
        }

        for _ in 0..MAX_READS_PER_POLL {
            match shared.socket.receive_from(&mut buf) {
                Ok(Some((n, from))) => shared.on_datagram(&buf[..n], from),
                Ok(None) => break,
                Err(err) => {
                    debug!(error = %err, "receive failed");
                    break;
                }
            }
        }
    }
}

/// Sole owner of connection state.
struct UpdateWorker<'a> {
    shared: &'a Shared,
    connections: HashMap<SocketAddr, Connection>,
    peer_ids: PeerIdAllocator,
    client: Option<ClientHandshake>,
    last_keepalive: Instant,
}

impl<'a> UpdateWorker<'a> {
    fn new(shared: &'a Shared) -> Self {
        let client = match shared.role {
            TransportRole::Server => None,
            TransportRole::Client { destination } => Some(ClientHandshake::new(destination)),
        };
        Self {
            shared,
            connections: HashMap::new(),
            peer_ids: PeerIdAllocator::default(),
            client,
            last_keepalive: Instant::now(),
        }
    }

    fn limits(&self) -> ReceiveLimits {
        let config = &self.shared.config;
        ReceiveLimits {
            retransmit_after: config.retransmit_after,
            max_retransmission_requests: config.max_retransmission_requests,
            max_packets_per_sequence: config.max_packets_per_sequence,
            recent_completed_capacity: config.recent_completed_capacity,
        }
    }

    fn run(mut self) {
        while self.shared.is_active() {
            let poll_timeout = self.shared.config.poll_timeout;
            if let Some((packet, from)) = self.shared.received.pop_timeout(poll_timeout) {
                self.dispatch(packet, from);
                for _ in 1..MAX_DISPATCH_PER_WAKE {
                    let Some((packet, from)) = self.shared.received.try_pop() else {
                        break;
                    };
                    self.dispatch(packet, from);
                }
            }
            self.maintain(Instant::now());
        }

        for conn in self.connections.values_mut() {
            conn.close();
        }
    }

    fn dispatch(&mut self, packet: Packet, from: SocketAddr) {
        let now = packet.received_at.unwrap_or_else(Instant::now);
        let (op, sequence_id) = (packet.op_code, packet.sequence_id);
        debug!(
            peer = %from,
            op = opcode_name(op),
            sequence_id,
            index = packet.index,
            "packet received"
        );

        match op {
            CONNECTION_REQUEST => return self.on_connection_request(from),
            CONNECTION_ACCEPTED => return self.on_connection_accepted(&packet, from),
            CONNECTION_DISCONNECT => return self.disconnect(from, "peer disconnected"),
            _ => {}
        }

        let Some(conn) = self.connections.get_mut(&from).filter(|c| c.is_open()) else {
            debug!(peer = %from, op = opcode_name(op), "packet from unaccepted peer dropped");
            return;
        };

        match op {
            ACK => {
                conn.touch(now);
                if self.shared.retained.release(from, sequence_id) {
                    debug!(peer = %from, sequence_id, "sequence acknowledged");
                }
            }
            RETRANSMISSION_ACK => conn.on_retransmission_ack(sequence_id, now),
            RETRANSMISSION_IMPOSSIBLE => {
                conn.on_retransmission_impossible(sequence_id, now);
            }
            KEEP_ALIVE => conn.touch(now),
            _ => {
                let actions = conn.on_data(packet, now);
                self.apply(from, actions);
            }
        }
    }

    fn on_connection_request(&mut self, from: SocketAddr) {
        if self.client.is_some() {
            debug!(peer = %from, "connection request ignored by client");
            return;
        }

        if let Some(conn) = self.connections.get(&from).filter(|c| c.is_open()) {
            debug!(peer = %from, peer_id = conn.peer_id(), "repeat connection request; re-sending acceptance");
            let accepted = Packet::data(CONNECTION_ACCEPTED, 0, 0, 0, encode_peer_id(conn.peer_id()));
            self.shared.send_packet(&accepted, from);
            return;
        }

        let peer_id = self.peer_ids.allocate();
        let limits = self.limits();
        self.connections
            .insert(from, Connection::accepted(from, peer_id, limits));
        self.shared.peers.insert(peer_id, from);
        self.shared.set_state(ConnectionState::Accepted);

        let accepted = Packet::data(CONNECTION_ACCEPTED, 0, 0, 0, encode_peer_id(peer_id));
        self.shared.send_packet(&accepted, from);
        info!(peer = %from, peer_id, "peer accepted");
    }

    fn on_connection_accepted(&mut self, packet: &Packet, from: SocketAddr) {
        let limits = self.limits();
        let Some(handshake) = self.client.as_mut() else {
            debug!(peer = %from, "connection acceptance ignored by server");
            return;
        };

        match handshake.accept(from, &packet.payload) {
            Some(assigned) => {
                self.connections
                    .insert(from, Connection::accepted(from, SERVER_PEER_ID, limits));
                self.shared.peers.insert(SERVER_PEER_ID, from);
                {
                    let mut status = self.shared.status();
                    status.state = ConnectionState::Accepted;
                    status.local_peer_id = Some(assigned);
                }
                info!(peer = %from, assigned_id = assigned, attempts = handshake.attempts(), "connected");
            }
            None => {
                debug!(peer = %from, state = %handshake.state(), "duplicate or unexpected acceptance ignored");
            }
        }
    }

    fn disconnect(&mut self, from: SocketAddr, reason: &'static str) {
        if let Some(mut conn) = self.connections.remove(&from) {
            conn.close();
            self.shared.peers.remove(conn.peer_id());
            let released = self.shared.retained.release_peer(from);
            info!(peer = %from, peer_id = conn.peer_id(), released, reason, "connection closed");
        } else {
            debug!(peer = %from, reason, "disconnect for unknown peer ignored");
        }

        match self.client.as_mut() {
            Some(handshake) if handshake.destination() == from => {
                handshake.close();
                self.shared.set_state(ConnectionState::Closed);
            }
            Some(_) => {}
            None if self.connections.is_empty() => {
                self.shared.set_state(ConnectionState::Unconnected);
            }
            None => {}
        }
    }

    fn apply(&self, peer: SocketAddr, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::SendAck { sequence_id } => {
                    self.shared
                        .send_packet(&Packet::control(ACK, sequence_id, 0), peer);
                }
                ConnectionAction::RequestRetransmission { sequence_id, index } => {
                    debug!(peer = %peer, sequence_id, index, "requesting retransmission");
                    self.shared.send_packet(
                        &Packet::control(RETRANSMISSION_REQUEST, sequence_id, index),
                        peer,
                    );
                }
                ConnectionAction::Deliver(datagram) => self.shared.inbound.push(datagram),
            }
        }
    }

    fn maintain(&mut self, now: Instant) {
        let shared = self.shared;
        let config = &shared.config;

        let mut pending = Vec::new();
        for conn in self.connections.values_mut() {
            let actions = conn.maintain(now);
            if !actions.is_empty() {
                pending.push((conn.peer_addr(), actions));
            }
        }
        for (peer, actions) in pending {
            self.apply(peer, actions);
        }

        let sweep = self.shared.retained.maintain(
            now,
            RetentionPolicy {
                resend_after: config.resend_unacked_after,
                max_resends: config.max_resends,
                retain_for: config.retain_for,
            },
        );
        for (peer, sequence_id, packets) in sweep.resend {
            debug!(peer = %peer, sequence_id, packets = packets.len(), "resending unacknowledged sequence");
            for packet in &packets {
                self.shared.send_raw(packet, peer);
            }
        }
        for (peer, sequence_id) in sweep.expired {
            debug!(peer = %peer, sequence_id, "retained sequence expired");
        }

        if let Some(handshake) = self.client.as_mut() {
            if handshake.is_due(now, config.handshake_retry_interval) {
                handshake.record_attempt(now);
                if handshake.attempts() == 1 {
                    self.shared.set_state(ConnectionState::Handshaking);
                }
                debug!(peer = %handshake.destination(), attempt = handshake.attempts(), "sending connection request");
                self.shared.send_packet(
                    &Packet::control(CONNECTION_REQUEST, 0, 0),
                    handshake.destination(),
                );
            }
        }

        if let Some(interval) = config.keepalive_interval {
            if now.duration_since(self.last_keepalive) >= interval {
                self.last_keepalive = now;
                let keepalive = Packet::control(KEEP_ALIVE, 0, 0);
                for peer in self.connections.keys() {
                    self.shared.send_packet(&keepalive, *peer);
                }
            }
        }

        if let Some(timeout) = config.peer_timeout {
            let silent: Vec<SocketAddr> = self
                .connections
                .values()
                .filter(|c| now.duration_since(c.last_heard()) >= timeout)
                .map(Connection::peer_addr)
                .collect();
            for peer in silent {
                warn!(peer = %peer, ?timeout, "peer silent too long");
                self.disconnect(peer, "peer timed out");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::UdpSocket;

    use bytes::Bytes;
    use netbridge_frame::{is_reserved, ProtocolConfig};

    use super::*;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn fast_config() -> TransportConfig {
        TransportConfig {
            bind: loopback(0),
            poll_timeout: Duration::from_millis(10),
            handshake_retry_interval: Duration::from_millis(30),
            retransmit_after: Duration::from_millis(30),
            resend_unacked_after: Duration::from_millis(60),
            max_resends: 20,
            shutdown_timeout: Duration::from_secs(2),
            ..TransportConfig::default()
        }
    }

    fn start_server() -> (Transport, Arc<DatagramQueue<Datagram>>) {
        let inbound = Arc::new(DatagramQueue::new());
        let server = Transport::start(fast_config(), TransportRole::Server, Arc::clone(&inbound))
            .expect("server should start");
        (server, inbound)
    }

    fn start_client(destination: SocketAddr) -> (Transport, Arc<DatagramQueue<Datagram>>) {
        let inbound = Arc::new(DatagramQueue::new());
        let client = Transport::start(
            fast_config(),
            TransportRole::Client { destination },
            Arc::clone(&inbound),
        )
        .expect("client should start");
        (client, inbound)
    }

    fn pop_within(queue: &DatagramQueue<Datagram>, timeout: Duration) -> Option<Datagram> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(datagram) = queue.pop_timeout(Duration::from_millis(20)) {
                return Some(datagram);
            }
        }
        None
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn pattern(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    #[test]
    fn client_and_server_exchange_multi_packet_messages() {
        let (server, server_inbound) = start_server();
        let server_addr = loopback(server.local_addr().expect("bound").port());
        let (client, client_inbound) = start_client(server_addr);

        // Queued before the handshake completes; held until it does.
        client
            .enqueue_send(Datagram::new(42, 0, pattern(5000)))
            .expect("enqueue should succeed");
        assert!(client.wait_connected(Duration::from_secs(5)));
        assert_eq!(client.local_peer_id(), Some(1));

        let received = pop_within(&server_inbound, Duration::from_secs(5)).expect("server should receive");
        assert_eq!(received.op_code(), 42);
        assert_eq!(received.sender_id(), 1);
        assert_eq!(received.payload(), &pattern(5000));

        server
            .enqueue_send_to(1, Datagram::new(43, 0, Bytes::from_static(b"pong")))
            .expect("peer 1 is accepted");
        let reply = pop_within(&client_inbound, Duration::from_secs(5)).expect("client should receive");
        assert_eq!(reply.op_code(), 43);
        assert_eq!(reply.sender_id(), SERVER_PEER_ID);
        assert_eq!(reply.payload().as_ref(), b"pong");

        assert!(wait_until(Duration::from_secs(2), || client.unacked_sequences() == 0));
        assert_eq!(server.peers().len(), 1);
    }

    #[test]
    fn converges_when_first_copy_of_every_packet_is_lost() {
        type Seen = Arc<Mutex<HashSet<(u16, u32, u32, u32)>>>;
        fn lossy(seen: Seen) -> impl PacketValidator {
            move |p: &Packet, _: &SocketAddr| {
                let key = (p.op_code, p.sequence_id, p.index, p.count);
                !seen.lock().expect("lock").insert(key)
            }
        }

        let server_inbound = Arc::new(DatagramQueue::new());
        let server = Transport::start_with_validator(
            fast_config(),
            TransportRole::Server,
            Arc::clone(&server_inbound),
            lossy(Seen::default()),
        )
        .expect("server should start");
        let destination = loopback(server.local_addr().expect("bound").port());

        let client = Transport::start_with_validator(
            fast_config(),
            TransportRole::Client { destination },
            Arc::new(DatagramQueue::new()),
            lossy(Seen::default()),
        )
        .expect("client should start");
        assert!(client.wait_connected(Duration::from_secs(5)));

        for op in 1..=3u16 {
            client
                .enqueue_send(Datagram::new(op, 0, pattern(3000)))
                .expect("enqueue should succeed");
        }

        let mut ops = HashSet::new();
        for _ in 0..3 {
            let datagram = pop_within(&server_inbound, Duration::from_secs(5)).expect("all three should arrive");
            assert_eq!(datagram.payload(), &pattern(3000));
            ops.insert(datagram.op_code());
        }
        assert_eq!(ops, HashSet::from([1, 2, 3]));

        assert!(wait_until(Duration::from_secs(5), || client.unacked_sequences() == 0));
        assert!(server_inbound.is_empty(), "duplicates must not be re-delivered");
    }

    #[test]
    fn converges_through_retransmission_requests_alone() {
        type Seen = Arc<Mutex<HashSet<(u32, u32)>>>;
        // Drops the first copy of every packet but the last of each sequence,
        // so only the receiver's requests can fill the gaps.
        fn lossy(seen: Seen) -> impl PacketValidator {
            move |p: &Packet, _: &SocketAddr| {
                if is_reserved(p.op_code) || p.index + 1 >= p.count {
                    return true;
                }
                !seen.lock().expect("lock").insert((p.sequence_id, p.index))
            }
        }

        let no_resends = || TransportConfig {
            max_resends: 0,
            ..fast_config()
        };
        let server_inbound = Arc::new(DatagramQueue::new());
        let server = Transport::start_with_validator(
            no_resends(),
            TransportRole::Server,
            Arc::clone(&server_inbound),
            lossy(Seen::default()),
        )
        .expect("server should start");
        let destination = loopback(server.local_addr().expect("bound").port());
        let (client, _client_inbound) = {
            let inbound = Arc::new(DatagramQueue::new());
            let client = Transport::start(
                no_resends(),
                TransportRole::Client { destination },
                Arc::clone(&inbound),
            )
            .expect("client should start");
            (client, inbound)
        };
        assert!(client.wait_connected(Duration::from_secs(5)));

        client
            .enqueue_send(Datagram::new(5, 0, pattern(3000)))
            .expect("enqueue should succeed");
        let datagram = pop_within(&server_inbound, Duration::from_secs(5)).expect("gaps should be filled");
        assert_eq!(datagram.op_code(), 5);
        assert_eq!(datagram.payload(), &pattern(3000));

        assert!(wait_until(Duration::from_secs(5), || client.unacked_sequences() == 0));
        assert!(server_inbound.pop_timeout(Duration::from_millis(100)).is_none());
    }

    #[test]
    fn retransmission_request_is_answered_from_retained_packets() {
        let config = TransportConfig {
            resend_unacked_after: Duration::from_secs(10),
            ..fast_config()
        };
        let server = Transport::start(config, TransportRole::Server, Arc::new(DatagramQueue::new()))
            .expect("server should start");
        let server_addr = loopback(server.local_addr().expect("bound").port());

        let protocol = ProtocolConfig::default();
        let raw = UdpSocket::bind(loopback(0)).expect("raw socket should bind");
        raw.set_read_timeout(Some(Duration::from_millis(200)))
            .expect("read timeout should apply");
        let send = |packet: Packet| {
            let wire = packet.encode(&protocol).expect("should encode");
            raw.send_to(&wire, server_addr).expect("raw send");
        };
        // Every packet read until `want` matches, `want`'s packet last.
        let read_until = |want: &dyn Fn(&Packet) -> bool| {
            let deadline = Instant::now() + Duration::from_secs(3);
            let mut seen = Vec::new();
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            while Instant::now() < deadline {
                let Ok((len, _)) = raw.recv_from(&mut buf) else {
                    continue;
                };
                let packet = Packet::decode(&buf[..len], &protocol).expect("server packets decode");
                let done = want(&packet);
                seen.push(packet);
                if done {
                    return seen;
                }
            }
            panic!("expected packet never arrived; saw {} packets", seen.len());
        };

        send(Packet::control(CONNECTION_REQUEST, 0, 0));
        let handshake = read_until(&|p: &Packet| p.op_code == CONNECTION_ACCEPTED);
        let accepted = handshake.last().expect("accepted packet");
        assert_eq!(crate::handshake::decode_peer_id(&accepted.payload), Some(1));

        server
            .enqueue_send_to(1, Datagram::new(9, 0, pattern(3000)))
            .expect("peer 1 is accepted");
        let first_copy = read_until(&|p: &Packet| p.op_code == 9 && p.index + 1 == p.count);
        let sequence_id = first_copy.last().expect("data packet").sequence_id;
        assert_eq!(first_copy.iter().filter(|p| p.op_code == 9).count(), 3);

        send(Packet::control(RETRANSMISSION_REQUEST, sequence_id, 1));
        let answer = read_until(&|p: &Packet| p.op_code == RETRANSMISSION_ACK);
        let ack = answer.last().expect("retransmission ack");
        assert_eq!((ack.sequence_id, ack.index), (sequence_id, 1));
        let resent = answer
            .iter()
            .find(|p| p.op_code == 9)
            .expect("original packet precedes the ack");
        assert_eq!((resent.sequence_id, resent.index, resent.count), (sequence_id, 1, 3));
        let original = first_copy
            .iter()
            .find(|p| p.op_code == 9 && p.index == 1)
            .expect("first copy of index 1");
        assert_eq!(resent.payload, original.payload);

        send(Packet::control(RETRANSMISSION_REQUEST, sequence_id.wrapping_add(1000), 0));
        let refusal = read_until(&|p: &Packet| p.op_code == RETRANSMISSION_IMPOSSIBLE);
        let impossible = refusal.last().expect("impossible packet");
        assert_eq!(
            (impossible.sequence_id, impossible.index),
            (sequence_id.wrapping_add(1000), 0)
        );
        assert!(refusal.iter().all(|p| p.op_code != RETRANSMISSION_ACK));
    }

    #[test]
    fn flush_waits_for_held_datagrams_to_be_acknowledged() {
        let (server, server_inbound) = start_server();
        let server_addr = loopback(server.local_addr().expect("bound").port());
        let (client, _client_inbound) = start_client(server_addr);

        client
            .enqueue_send(Datagram::new(7, 0, pattern(4000)))
            .expect("enqueue should succeed");
        assert!(client.flush(Duration::from_secs(5)));
        assert_eq!(client.unacked_sequences(), 0);
        assert!(server_inbound.pop_timeout(Duration::from_millis(100)).is_some());
    }

    #[test]
    fn foreign_magic_is_never_delivered() {
        let (server, inbound) = start_server();
        let server_addr = loopback(server.local_addr().expect("bound").port());
        let raw = UdpSocket::bind(loopback(0)).expect("raw socket should bind");

        let foreign = ProtocolConfig {
            magic: *b"XXXX",
            ..ProtocolConfig::default()
        };
        for packet in [
            Packet::control(CONNECTION_REQUEST, 0, 0),
            Packet::data(42, 1, 0, 1, Bytes::from_static(b"sneaky")),
        ] {
            let wire = packet.encode(&foreign).expect("should encode");
            raw.send_to(&wire, server_addr).expect("raw send");
        }
        thread::sleep(Duration::from_millis(150));
        assert!(server.peers().is_empty());
        assert!(inbound.is_empty());

        // The same sender with the right magic is accepted.
        let request = Packet::control(CONNECTION_REQUEST, 0, 0)
            .encode(&ProtocolConfig::default())
            .expect("should encode");
        raw.send_to(&request, server_addr).expect("raw send");
        assert!(wait_until(Duration::from_secs(2), || server.peers().len() == 1));
    }

    #[test]
    fn client_sees_server_disconnect() {
        let (mut server, _server_inbound) = start_server();
        let server_addr = loopback(server.local_addr().expect("bound").port());
        let (client, _client_inbound) = start_client(server_addr);
        assert!(client.wait_connected(Duration::from_secs(5)));

        server.shutdown();
        assert!(wait_until(Duration::from_secs(2), || client.state() == ConnectionState::Closed));
        assert!(client.peers().is_empty());
        assert!(client.is_active());
    }

    #[test]
    fn api_errors() {
        let (mut server, _inbound) = start_server();
        assert!(matches!(
            server.enqueue_send_to(9, Datagram::new(1, 0, Bytes::new())),
            Err(TransportError::UnknownPeer(9))
        ));
        assert_eq!(server.state(), ConnectionState::Unconnected);

        server.shutdown();
        server.shutdown();
        assert!(!server.is_active());
        assert_eq!(server.state(), ConnectionState::Closed);
        assert!(matches!(
            server.enqueue_send(Datagram::new(1, 0, Bytes::new())),
            Err(TransportError::NotActive)
        ));
    }

    #[test]
    fn start_fails_when_address_is_taken() {
        let (server, _inbound) = start_server();
        let config = TransportConfig {
            bind: server.local_addr().expect("bound"),
            ..fast_config()
        };
        let result = Transport::start(config, TransportRole::Server, Arc::new(DatagramQueue::new()));
        assert!(matches!(result, Err(TransportError::Socket(_))));
    }
}
