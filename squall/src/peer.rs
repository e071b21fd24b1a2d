use crate::config::PeerConfig;
use crate::connection::{Connection, ConnectionStatus, MAGIC_VERSION};
use crate::context::PeerContext;
use crate::discovery;
use crate::error::{PeerError, SendError};
use crate::event::{EventSink, IncomingKinds, PeerEvent};
use crate::fragment::MAX_ASSEMBLED_BYTES;
use crate::identity;
use crate::socket;
use crate::stats::PeerStatistics;
use crate::time::{SystemTimeProvider, TimeProvider};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use squall_wire::header::FRAME_HEADER_BYTES;
use squall_wire::{
    BitBuffer, DeliveryMethod, FrameHeader, MessageKind, NUM_SEQUENCE_CHANNELS, WireError,
};
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Addresses a connected peer either by endpoint or by its 64-bit id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    Endpoint(SocketAddr),
    Id(u64),
}

impl From<SocketAddr> for MessageTarget {
    fn from(addr: SocketAddr) -> Self {
        MessageTarget::Endpoint(addr)
    }
}

impl From<u64> for MessageTarget {
    fn from(id: u64) -> Self {
        MessageTarget::Id(id)
    }
}

enum Command {
    Connect {
        remote: SocketAddr,
        hail: Option<Vec<u8>>,
    },
    Send {
        target: MessageTarget,
        data: Vec<u8>,
        method: DeliveryMethod,
        channel: u8,
    },
    SendUnconnected {
        to: SocketAddr,
        data: Vec<u8>,
    },
    Discover {
        to: SocketAddr,
        payload: Vec<u8>,
    },
    RespondDiscovery {
        to: SocketAddr,
        payload: Vec<u8>,
    },
    Disconnect {
        target: MessageTarget,
        reason: String,
    },
    PostTestMessage {
        payload: Vec<u8>,
    },
    Shutdown {
        reason: String,
    },
}

/// The process-wide transport instance.
///
/// `start` binds the socket and spawns the single network thread that owns
/// every connection. The handle is the application side of the two
/// thread-safe queues: commands in, [`PeerEvent`]s out.
pub struct Peer {
    commands: Sender<Command>,
    events: Receiver<PeerEvent>,
    local_id: u64,
    local_addr: SocketAddr,
    stats: Arc<PeerStatistics>,
    thread: Option<JoinHandle<()>>,
}

impl Peer {
    pub fn start(config: PeerConfig) -> Result<Self, PeerError> {
        Self::start_with_time(config, Arc::new(SystemTimeProvider))
    }

    pub fn start_with_time(
        config: PeerConfig,
        time: Arc<dyn TimeProvider>,
    ) -> Result<Self, PeerError> {
        config.validate()?;
        let udp = socket::bind_socket(&config)?;
        let local_addr = udp.local_addr()?;
        let mut rng = StdRng::from_entropy();
        let local_id = identity::derive_peer_id(&local_addr, &mut rng);

        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let stats = Arc::new(PeerStatistics::default());
        let config = Arc::new(config);
        let events = EventSink::new(event_tx, config.enabled_incoming_kinds);
        let now = time.now_instant();
        let ctx = PeerContext::new(config, local_id, now, events, stats.clone(), rng);

        let core = PeerCore {
            socket: udp,
            ctx,
            time,
            connections: HashMap::new(),
            by_id: HashMap::new(),
            handshakes: HashMap::new(),
            commands: command_rx,
            unconnected: VecDeque::new(),
            last_heartbeat: now,
            shutdown: None,
            recv_buf: vec![0u8; 65_535],
        };
        let thread = thread::Builder::new()
            .name("squall-net".into())
            .spawn(move || core.run())
            .map_err(PeerError::Io)?;

        debug!(id = local_id, %local_addr, "peer started");
        Ok(Peer {
            commands: command_tx,
            events: event_rx,
            local_id,
            local_addr,
            stats,
            thread: Some(thread),
        })
    }

    pub fn local_peer_id(&self) -> u64 {
        self.local_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn statistics(&self) -> Arc<PeerStatistics> {
        Arc::clone(&self.stats)
    }

    /// The released-incoming queue.
    pub fn events(&self) -> &Receiver<PeerEvent> {
        &self.events
    }

    pub fn try_recv(&self) -> Option<PeerEvent> {
        self.events.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<PeerEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    fn command(&self, command: Command) -> Result<(), SendError> {
        self.commands
            .send(command)
            .map_err(|_| SendError::PeerShutDown)
    }

    pub fn connect(&self, remote: SocketAddr) -> Result<(), SendError> {
        self.command(Command::Connect { remote, hail: None })
    }

    pub fn connect_with_hail(&self, remote: SocketAddr, hail: Vec<u8>) -> Result<(), SendError> {
        self.command(Command::Connect {
            remote,
            hail: Some(hail),
        })
    }

    /// Queues a message for a connected peer. Transmission happens on the
    /// network thread, on the next heartbeat unless auto-flush is on.
    pub fn send(
        &self,
        target: impl Into<MessageTarget>,
        data: Vec<u8>,
        method: DeliveryMethod,
        channel: u8,
    ) -> Result<(), SendError> {
        if channel >= NUM_SEQUENCE_CHANNELS || (channel != 0 && !method.is_multi_channel()) {
            return Err(SendError::InvalidChannel(channel));
        }
        if data.len() > MAX_ASSEMBLED_BYTES {
            return Err(SendError::MessageTooLarge(data.len()));
        }
        self.command(Command::Send {
            target: target.into(),
            data,
            method,
            channel,
        })
    }

    /// Sends a kind-0 library datagram outside any connection.
    pub fn send_unconnected(&self, to: SocketAddr, data: Vec<u8>) -> Result<(), SendError> {
        self.command(Command::SendUnconnected { to, data })
    }

    pub fn discover(&self, to: SocketAddr, payload: Vec<u8>) -> Result<(), SendError> {
        self.command(Command::Discover { to, payload })
    }

    /// Broadcasts a discovery request on the local network.
    pub fn discover_local(&self, port: u16, payload: Vec<u8>) -> Result<(), SendError> {
        self.discover(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port),
            payload,
        )
    }

    pub fn respond_discovery(&self, to: SocketAddr, payload: Vec<u8>) -> Result<(), SendError> {
        self.command(Command::RespondDiscovery { to, payload })
    }

    pub fn disconnect(
        &self,
        target: impl Into<MessageTarget>,
        reason: &str,
    ) -> Result<(), SendError> {
        self.command(Command::Disconnect {
            target: target.into(),
            reason: reason.to_string(),
        })
    }

    /// Injects a `TestMessage` event into the inbound queue.
    pub fn post_test_message(&self, payload: Vec<u8>) -> Result<(), SendError> {
        self.command(Command::PostTestMessage { payload })
    }

    /// Disconnects every peer with `reason`, drains, and joins the network
    /// thread.
    pub fn shutdown(mut self, reason: &str) {
        let _ = self.commands.send(Command::Shutdown {
            reason: reason.to_string(),
        });
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown {
            reason: "peer shutting down".to_string(),
        });
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn heartbeat_interval(connection_count: usize) -> Duration {
    let hz = 1250usize.saturating_sub(connection_count).max(250);
    Duration::from_secs_f64(1.0 / hz as f64)
}

fn build_frame(kind: MessageKind, payload: &BitBuffer) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_BYTES + payload.byte_length());
    FrameHeader::new(kind, 0, false, payload.bit_length() as u16).encode(&mut out);
    out.extend_from_slice(payload.as_bytes());
    out
}

fn build_raw_frame(kind: MessageKind, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_BYTES + payload.len());
    FrameHeader::new(kind, 0, false, (payload.len() * 8) as u16).encode(&mut out);
    out.extend_from_slice(payload);
    out
}

/// State owned exclusively by the network thread.
struct PeerCore {
    socket: UdpSocket,
    ctx: PeerContext,
    time: Arc<dyn TimeProvider>,
    connections: HashMap<SocketAddr, Connection>,
    by_id: HashMap<u64, SocketAddr>,
    handshakes: HashMap<SocketAddr, Connection>,
    commands: Receiver<Command>,
    /// The unsent-unconnected queue, drained on the heartbeat.
    unconnected: VecDeque<(SocketAddr, Vec<u8>)>,
    last_heartbeat: Instant,
    shutdown: Option<String>,
    recv_buf: Vec<u8>,
}

impl PeerCore {
    fn run(mut self) {
        debug!(id = self.ctx.local_id, "network thread running");
        loop {
            let now = self.time.now_instant();
            self.drain_commands();
            if let Some(reason) = self.shutdown.take() {
                self.shutdown_drain(&reason);
                break;
            }

            if now.saturating_duration_since(self.last_heartbeat)
                > heartbeat_interval(self.connections.len())
            {
                self.heartbeat(now);
                self.last_heartbeat = now;
            }
            self.flush_outgoing();

            let received = self.receive_datagrams();
            self.flush_outgoing();
            if !received {
                // 1ms socket poll.
                thread::sleep(Duration::from_millis(1));
            }
        }
        debug!("network thread stopped");
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(command) => {
                    let now = self.time.now_instant();
                    self.handle_command(command, now);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.shutdown.is_none() {
                        self.shutdown = Some("peer handle dropped".to_string());
                    }
                    break;
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command, now: Instant) {
        match command {
            Command::Connect { remote, hail } => self.start_connect(remote, hail, now),
            Command::Send {
                target,
                data,
                method,
                channel,
            } => self.handle_send(target, data, method, channel, now),
            Command::SendUnconnected { to, data } => self.unconnected.push_back((to, data)),
            Command::Discover { to, payload } => {
                let frame = build_raw_frame(MessageKind::Discovery, &payload);
                self.ctx.send_datagram(to, frame);
            }
            Command::RespondDiscovery { to, payload } => {
                let body = discovery::encode_response(
                    self.connections.len() as u32,
                    self.ctx.config.maximum_connections as u32,
                    &payload,
                );
                self.ctx
                    .send_datagram(to, build_frame(MessageKind::DiscoveryResponse, &body));
            }
            Command::Disconnect { target, reason } => {
                if let Some(conn) = self.find_connection_mut(target) {
                    conn.request_disconnect(reason);
                }
            }
            Command::PostTestMessage { payload } => {
                self.ctx.events.emit(IncomingKinds::TEST_MESSAGE, move || {
                    PeerEvent::TestMessage { payload }
                });
            }
            Command::Shutdown { reason } => self.shutdown = Some(reason),
        }
    }

    fn find_connection_mut(&mut self, target: MessageTarget) -> Option<&mut Connection> {
        let endpoint = match target {
            MessageTarget::Endpoint(endpoint) => endpoint,
            MessageTarget::Id(id) => *self.by_id.get(&id)?,
        };
        self.connections.get_mut(&endpoint)
    }

    fn start_connect(&mut self, remote: SocketAddr, hail: Option<Vec<u8>>, now: Instant) {
        if self.connections.contains_key(&remote) || self.handshakes.contains_key(&remote) {
            trace!(%remote, "connect ignored: already known");
            return;
        }
        let conn = Connection::new_outbound(remote, &mut self.ctx, now, hail);
        self.handshakes.insert(remote, conn);
    }

    fn handle_send(
        &mut self,
        target: MessageTarget,
        data: Vec<u8>,
        method: DeliveryMethod,
        channel: u8,
        now: Instant,
    ) {
        use crate::channel::SendOutcome;
        let endpoint = match target {
            MessageTarget::Endpoint(endpoint) => Some(endpoint),
            MessageTarget::Id(id) => self.by_id.get(&id).copied(),
        };
        let conn = endpoint.and_then(|ep| self.connections.get_mut(&ep));
        let Some(conn) = conn else {
            self.ctx.events.emit(IncomingKinds::ERROR, || PeerEvent::Error {
                message: format!("cannot send: no connection for {target:?}"),
            });
            return;
        };
        match conn.send_message(&mut self.ctx, &data, method, channel, now) {
            SendOutcome::FailedNotConnected => {
                self.ctx.events.emit(IncomingKinds::ERROR, || PeerEvent::Error {
                    message: format!("cannot send: {target:?} is not connected"),
                });
            }
            SendOutcome::Dropped => {
                self.ctx.events.emit(IncomingKinds::ERROR, || PeerEvent::Error {
                    message: "message dropped: exceeds the current MTU".to_string(),
                });
            }
            SendOutcome::Sent | SendOutcome::Queued => {}
        }
    }

    fn heartbeat(&mut self, now: Instant) {
        // Handshake seats: retries, expiry, promotion.
        for conn in self.handshakes.values_mut() {
            conn.heartbeat(&mut self.ctx, now);
        }
        let ready: Vec<SocketAddr> = self
            .handshakes
            .iter()
            .filter(|(_, c)| {
                matches!(
                    c.status(),
                    ConnectionStatus::Connected | ConnectionStatus::ConnectedSecured
                )
            })
            .map(|(addr, _)| *addr)
            .collect();
        for addr in ready {
            self.promote(addr);
        }
        self.handshakes
            .retain(|_, c| c.status() != ConnectionStatus::Disconnected);

        for conn in self.connections.values_mut() {
            conn.heartbeat(&mut self.ctx, now);
        }

        while let Some((to, data)) = self.unconnected.pop_front() {
            let frame = build_raw_frame(MessageKind::Unconnected, &data);
            self.ctx.send_datagram(to, frame);
        }

        let by_id = &mut self.by_id;
        self.connections.retain(|_, conn| {
            if conn.status() == ConnectionStatus::Disconnected {
                by_id.remove(&conn.remote_id());
                false
            } else {
                true
            }
        });
    }

    fn receive_datagrams(&mut self) -> bool {
        let mut received = false;
        loop {
            let mut buf = std::mem::take(&mut self.recv_buf);
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    received = true;
                    let now = self.time.now_instant();
                    self.ctx.stats.note_received_packet(len);
                    self.handle_datagram(from, &buf[..len], now);
                    self.recv_buf = buf;
                }
                Err(e) => {
                    self.recv_buf = buf;
                    match e.kind() {
                        std::io::ErrorKind::WouldBlock => break,
                        // An ICMP reset names a datagram, never a
                        // connection; drop it and keep reading.
                        std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionRefused => continue,
                        _ => {
                            warn!("socket receive failed: {e}");
                            break;
                        }
                    }
                }
            }
        }
        received
    }

    fn handle_datagram(&mut self, from: SocketAddr, data: &[u8], now: Instant) {
        let mut offset = 0;
        while data.len() - offset >= FRAME_HEADER_BYTES {
            let Ok(header) = FrameHeader::decode(&data[offset..]) else {
                break;
            };
            let start = offset + FRAME_HEADER_BYTES;
            let payload_len = header.payload_bytes();
            if start + payload_len > data.len() {
                self.ctx.stats.note_malformed_frame();
                let err = WireError::PayloadBeyondDatagram {
                    got: payload_len,
                    have: data.len() - start,
                };
                warn!(%from, "dropping rest of datagram: {err}");
                break;
            }
            let payload = &data[start..start + payload_len];
            offset = start + payload_len;
            self.dispatch_frame(from, &header, payload, now);
        }
    }

    fn dispatch_frame(
        &mut self,
        from: SocketAddr,
        header: &FrameHeader,
        payload: &[u8],
        now: Instant,
    ) {
        if let Some(conn) = self.connections.get_mut(&from) {
            conn.handle_frame(&mut self.ctx, header, payload, now);
            return;
        }
        if let Some(conn) = self.handshakes.get_mut(&from) {
            conn.handle_frame(&mut self.ctx, header, payload, now);
            self.promote(from);
            return;
        }
        self.handle_unconnected_frame(from, header, payload, now);
    }

    /// Moves a completed handshake into the connection table, or reaps it.
    fn promote(&mut self, addr: SocketAddr) {
        let status = match self.handshakes.get(&addr) {
            Some(conn) => conn.status(),
            None => return,
        };
        match status {
            ConnectionStatus::Connected | ConnectionStatus::ConnectedSecured => {
                if let Some(conn) = self.handshakes.remove(&addr) {
                    self.by_id.insert(conn.remote_id(), addr);
                    self.connections.insert(addr, conn);
                }
            }
            ConnectionStatus::Disconnected => {
                self.handshakes.remove(&addr);
            }
            _ => {}
        }
    }

    fn handle_unconnected_frame(
        &mut self,
        from: SocketAddr,
        header: &FrameHeader,
        payload: &[u8],
        now: Instant,
    ) {
        match MessageKind::from_byte(header.kind) {
            Ok(MessageKind::Connect) => self.handle_unconnected_connect(from, payload, now),
            Ok(MessageKind::ConnectResponse) => {
                // NAT source-port rewrite: match the pending handshake by
                // address, not port, and re-key to the observed endpoint.
                let original = self
                    .handshakes
                    .iter()
                    .find(|(addr, conn)| {
                        addr.ip() == from.ip()
                            && conn.status() == ConnectionStatus::InitiatedConnect
                    })
                    .map(|(addr, _)| *addr);
                let Some(original) = original else {
                    trace!(%from, "connect response without a pending handshake");
                    return;
                };
                if let Some(mut conn) = self.handshakes.remove(&original) {
                    conn.rekey(from);
                    conn.handle_frame(&mut self.ctx, header, payload, now);
                    self.handshakes.insert(from, conn);
                    self.promote(from);
                }
            }
            Ok(MessageKind::Discovery) => {
                let data = payload.to_vec();
                self.ctx
                    .events
                    .emit(IncomingKinds::DISCOVERY_REQUEST, move || {
                        PeerEvent::DiscoveryRequest {
                            from,
                            payload: data,
                        }
                    });
            }
            Ok(MessageKind::DiscoveryResponse) => {
                let data = payload.to_vec();
                self.ctx
                    .events
                    .emit(IncomingKinds::DISCOVERY_RESPONSE, move || {
                        PeerEvent::DiscoveryResponse {
                            from,
                            payload: data,
                        }
                    });
            }
            Ok(MessageKind::Unconnected) => {
                let data = payload.to_vec();
                self.ctx
                    .events
                    .emit(IncomingKinds::UNCONNECTED_DATA, move || {
                        PeerEvent::UnconnectedData {
                            from,
                            payload: data,
                        }
                    });
            }
            Ok(MessageKind::Disconnect) => {}
            Ok(other) => trace!(%from, ?other, "unconnected frame ignored"),
            Err(e) => {
                self.ctx.stats.note_malformed_frame();
                warn!(%from, "dropping unconnected frame: {e}");
            }
        }
    }

    fn handle_unconnected_connect(&mut self, from: SocketAddr, payload: &[u8], now: Instant) {
        if !self.ctx.config.accept_incoming_connections {
            trace!(%from, "rejecting connect: not accepting connections");
            return;
        }
        if self.connections.len() + self.handshakes.len() >= self.ctx.config.maximum_connections {
            let mut body = BitBuffer::new();
            body.write_string("Server full");
            self.ctx
                .send_datagram(from, build_frame(MessageKind::Disconnect, &body));
            return;
        }
        let mut buf = BitBuffer::from_vec(payload.to_vec(), payload.len() * 8);
        let (Ok(magic), Ok(remote_id)) = (buf.read_u16(), buf.read_u64()) else {
            self.ctx.stats.note_malformed_frame();
            warn!(%from, "dropping malformed connect");
            return;
        };
        if magic != MAGIC_VERSION {
            warn!(%from, magic, "rejecting connect with wrong version");
            return;
        }
        // The remaining bytes are the application hail blob; accepted but
        // not interpreted by the transport.
        let conn = Connection::new_inbound(from, remote_id, &mut self.ctx, now);
        self.handshakes.insert(from, conn);
    }

    fn flush_outgoing(&mut self) {
        while let Some(datagram) = self.ctx.out.pop_front() {
            if let Some(size) = datagram.probe_size {
                socket::set_dont_fragment(&self.socket, true);
                let result = self.socket.send_to(&datagram.payload, datagram.to);
                socket::set_dont_fragment(&self.socket, false);
                match result {
                    Ok(sent) => self.ctx.stats.note_sent_packet(sent),
                    Err(e) => {
                        trace!(size, "MTU probe rejected: {e}");
                        let max_fails = self.ctx.config.expand_mtu_fail_attempts;
                        if let Some(conn) = self.connections.get_mut(&datagram.to) {
                            conn.on_probe_send_failure(size, max_fails);
                        }
                    }
                }
                continue;
            }
            match self.socket.send_to(&datagram.payload, datagram.to) {
                Ok(sent) => self.ctx.stats.note_sent_packet(sent),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.ctx.out.push_front(datagram);
                    break;
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::ConnectionReset
                            | std::io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    trace!(to = %datagram.to, "send hit a reset; datagram dropped");
                }
                Err(e) => warn!(to = %datagram.to, "send failed: {e}"),
            }
        }
    }

    fn shutdown_drain(&mut self, reason: &str) {
        debug!(reason, "shutting down");
        let now = self.time.now_instant();
        for conn in self
            .handshakes
            .values_mut()
            .chain(self.connections.values_mut())
        {
            conn.request_disconnect(reason.to_string());
            conn.heartbeat(&mut self.ctx, now);
        }
        self.flush_outgoing();
        // Brief drain so the disconnect frames leave before the socket
        // closes.
        thread::sleep(Duration::from_millis(10));
    }
}
