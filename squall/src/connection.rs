use crate::channel::{CoalesceBuffer, FrameSink, ReceiverChannel, SendOutcome, SenderChannel};
use crate::channel::receiver::Released;
use crate::context::PeerContext;
use crate::event::{IncomingKinds, PeerEvent};
use crate::fragment::{self, ReassemblyTable};
use crate::handshake::{KeyExchange, PayloadCipher, read_big_uint, write_big_uint};
use crate::message::{IncomingMessage, OutgoingMessage};
use crate::mtu::MtuProbe;
use crate::rtt::{RemoteClock, RttTracker};
use rand::rngs::OsRng;
use squall_wire::header::{FRAME_HEADER_BYTES, USER_KIND_LIMIT};
use squall_wire::{BitBuffer, DeliveryMethod, FrameHeader, MessageKind};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Protocol version carried in `Connect` and `ConnectResponse`: 1.000.
pub const MAGIC_VERSION: u16 = 0x03E8;

/// Lifecycle of a connection to one remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    None,
    /// We sent `Connect` and await a response.
    InitiatedConnect,
    /// We answered an inbound `Connect` and await `ConnectionEstablished`.
    RespondedConnect,
    Connected,
    /// Connected with the payload cipher active.
    ConnectedSecured,
    Disconnecting,
    Disconnected,
}

/// Per-peer connection: channel engines, RTT and clock tracking, MTU
/// probing, ack batching and the coalescing buffer.
///
/// All methods are driven by the owning peer's network thread with an
/// explicit `now`; the connection itself never reads a clock or touches a
/// socket.
pub struct Connection {
    remote_endpoint: SocketAddr,
    remote_id: u64,
    status: ConnectionStatus,
    senders: Vec<Option<SenderChannel>>,
    receivers: Vec<Option<ReceiverChannel>>,
    outgoing_acks: VecDeque<(u8, u16)>,
    incoming_acks: VecDeque<(u8, u16)>,
    current_mtu: usize,
    mtu_probe: MtuProbe,
    rtt: RttTracker,
    remote_clock: RemoteClock,
    last_ping_sent: Instant,
    ping_pending: Option<(u8, Instant)>,
    next_ping_number: u8,
    key_exchange: Option<KeyExchange>,
    cipher: Option<Box<dyn PayloadCipher>>,
    coalesce: CoalesceBuffer,
    reassembly: ReassemblyTable,
    timeout_deadline: Instant,
    disconnect_requested: Option<String>,
    handshake_attempts: u32,
    last_handshake_attempt: Instant,
    hail: Option<Vec<u8>>,
}

impl Connection {
    fn new(remote: SocketAddr, remote_id: u64, ctx: &PeerContext, now: Instant) -> Self {
        Self {
            remote_endpoint: remote,
            remote_id,
            status: ConnectionStatus::None,
            senders: (0..USER_KIND_LIMIT).map(|_| None).collect(),
            receivers: (0..USER_KIND_LIMIT).map(|_| None).collect(),
            outgoing_acks: VecDeque::new(),
            incoming_acks: VecDeque::new(),
            current_mtu: ctx.config.maximum_transmission_unit,
            mtu_probe: MtuProbe::new(now),
            rtt: RttTracker::new(),
            remote_clock: RemoteClock::new(),
            last_ping_sent: now,
            ping_pending: None,
            next_ping_number: 0,
            key_exchange: None,
            cipher: None,
            coalesce: CoalesceBuffer::default(),
            reassembly: ReassemblyTable::new(),
            timeout_deadline: now + ctx.config.connection_timeout,
            disconnect_requested: None,
            handshake_attempts: 0,
            last_handshake_attempt: now,
            hail: None,
        }
    }

    /// Starts an outbound handshake: emits `Connect` and awaits the
    /// response.
    pub fn new_outbound(
        remote: SocketAddr,
        ctx: &mut PeerContext,
        now: Instant,
        hail: Option<Vec<u8>>,
    ) -> Self {
        let mut conn = Self::new(remote, 0, ctx, now);
        conn.hail = hail;
        conn.status = ConnectionStatus::InitiatedConnect;
        conn.handshake_attempts = 1;
        conn.last_handshake_attempt = now;
        conn.send_connect(ctx);
        ctx.stats.note_connection_initiated();
        conn
    }

    /// Accepts an inbound `Connect`: emits `ConnectResponse` and awaits
    /// `ConnectionEstablished`.
    pub fn new_inbound(
        remote: SocketAddr,
        remote_id: u64,
        ctx: &mut PeerContext,
        now: Instant,
    ) -> Self {
        let mut conn = Self::new(remote, remote_id, ctx, now);
        conn.status = ConnectionStatus::RespondedConnect;
        conn.handshake_attempts = 1;
        conn.last_handshake_attempt = now;
        conn.send_connect_response(ctx);
        ctx.stats.note_connection_accepted();
        conn
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn remote_endpoint(&self) -> SocketAddr {
        self.remote_endpoint
    }

    pub fn remote_id(&self) -> u64 {
        self.remote_id
    }

    pub fn current_mtu(&self) -> usize {
        self.current_mtu
    }

    pub fn average_rtt(&self) -> Option<std::time::Duration> {
        self.rtt.average()
    }

    pub fn remote_time_offset(&self) -> Option<f64> {
        self.remote_clock.offset_seconds()
    }

    pub fn mtu_probe(&self) -> &MtuProbe {
        &self.mtu_probe
    }

    /// Re-keys the connection to the endpoint actually observed on the wire
    /// (NAT source-port rewrite during the handshake).
    pub fn rekey(&mut self, observed: SocketAddr) {
        if observed != self.remote_endpoint {
            debug!(old = %self.remote_endpoint, new = %observed, "re-keying connection");
            self.remote_endpoint = observed;
        }
    }

    /// Schedules a graceful disconnect; the next heartbeat emits the frame.
    pub fn request_disconnect(&mut self, reason: String) {
        if matches!(
            self.status,
            ConnectionStatus::Disconnecting | ConnectionStatus::Disconnected
        ) {
            return;
        }
        self.status = ConnectionStatus::Disconnecting;
        self.disconnect_requested = Some(reason);
    }

    pub fn on_probe_send_failure(&mut self, size: usize, max_fails: u32) {
        self.mtu_probe.on_send_failure(size, max_fails);
    }

    // ---- outbound path ----

    /// Hands a payload to the right sender channel, fragmenting first when
    /// it cannot fit one datagram.
    pub fn send_message(
        &mut self,
        ctx: &mut PeerContext,
        data: &[u8],
        method: DeliveryMethod,
        channel: u8,
        now: Instant,
    ) -> SendOutcome {
        if !matches!(
            self.status,
            ConnectionStatus::Connected | ConnectionStatus::ConnectedSecured
        ) {
            return SendOutcome::FailedNotConnected;
        }
        let kind = MessageKind::User(method, channel).to_byte();

        let payload: Vec<u8> = match self.cipher.as_mut() {
            Some(cipher) => cipher.encrypt(data),
            None => {
                let mut vec = ctx.pool.take_vec(data.len());
                vec.extend_from_slice(data);
                vec
            }
        };

        let mtu = self.current_mtu;
        let outcome = if FRAME_HEADER_BYTES + payload.len() > mtu {
            let group = ctx.next_fragment_group();
            let chunks = fragment::split_into_chunks(Arc::new(payload), group, mtu);
            trace!(group, chunks = chunks.len(), "fragmenting message");
            let sender = Self::sender_for(&mut self.senders, kind, method);
            let mut outcome = SendOutcome::Queued;
            for chunk in chunks {
                if sender.enqueue(chunk, mtu) == SendOutcome::Dropped {
                    outcome = SendOutcome::Dropped;
                }
            }
            outcome
        } else {
            let bits = payload.len() * 8;
            let msg = OutgoingMessage::inline(BitBuffer::from_vec(payload, bits));
            Self::sender_for(&mut self.senders, kind, method).enqueue(msg, mtu)
        };

        if outcome == SendOutcome::Dropped {
            ctx.stats.note_dropped_message();
            return outcome;
        }

        if ctx.config.auto_flush_send_queue {
            let wrote = self.flush_sends(ctx, now);
            let drained = self.senders[kind as usize]
                .as_ref()
                .is_none_or(|s| s.queued_len() == 0);
            if wrote && drained {
                return SendOutcome::Sent;
            }
        }
        outcome
    }

    fn sender_for<'a>(
        senders: &'a mut [Option<SenderChannel>],
        kind: u8,
        method: DeliveryMethod,
    ) -> &'a mut SenderChannel {
        senders[kind as usize].get_or_insert_with(|| SenderChannel::new(method.is_reliable(), kind))
    }

    /// Pushes every queued message onto the wire and emits the pending
    /// datagram. Used for auto-flush and the shutdown drain.
    pub fn flush_sends(&mut self, ctx: &mut PeerContext, now: Instant) -> bool {
        let Self {
            senders,
            coalesce,
            remote_endpoint,
            current_mtu,
            ..
        } = self;
        let mut sink = FrameSink::new(ctx, coalesce, *remote_endpoint, *current_mtu);
        let mut wrote = false;
        for sender in senders.iter_mut().rev().flatten() {
            wrote |= sender.send_queued(now, &mut sink);
        }
        sink.flush();
        wrote
    }

    // ---- heartbeat ----

    pub fn heartbeat(&mut self, ctx: &mut PeerContext, now: Instant) {
        match self.status {
            ConnectionStatus::InitiatedConnect | ConnectionStatus::RespondedConnect => {
                self.handshake_heartbeat(ctx, now);
                return;
            }
            ConnectionStatus::None | ConnectionStatus::Disconnected => return,
            _ => {}
        }

        if let Some(reason) = self.disconnect_requested.take() {
            self.send_disconnect_frame(ctx, &reason);
            self.set_status(ctx, ConnectionStatus::Disconnected, &reason);
            return;
        }

        if now > self.timeout_deadline {
            self.send_disconnect_frame(ctx, "timed out");
            self.set_status(ctx, ConnectionStatus::Disconnected, "timed out");
            return;
        }

        if now.saturating_duration_since(self.last_ping_sent) >= ctx.config.ping_interval {
            self.send_ping(ctx, now);
        }

        let frequency = ctx.config.expand_mtu_frequency;
        let auto_expand = ctx.config.auto_expand_mtu;
        if let Some(size) = self
            .mtu_probe
            .heartbeat(now, &mut self.current_mtu, auto_expand, frequency)
        {
            self.send_probe(ctx, size);
        }

        self.reassembly.sweep_expired(now);

        let resend_delay = self.rtt.resend_delay();
        let Self {
            senders,
            coalesce,
            outgoing_acks,
            incoming_acks,
            remote_endpoint,
            current_mtu,
            ..
        } = self;
        let mut sink = FrameSink::new(ctx, coalesce, *remote_endpoint, *current_mtu);

        // Pack queued acks into Acknowledge frames, as many triples per
        // frame as the MTU allows.
        let per_frame = ((sink.mtu() - FRAME_HEADER_BYTES) / 3).max(1);
        while !outgoing_acks.is_empty() {
            let count = outgoing_acks.len().min(per_frame);
            let mut payload = BitBuffer::with_capacity(count * 3);
            for _ in 0..count {
                let (kind, sequence) = outgoing_acks
                    .pop_front()
                    .unwrap_or_else(|| unreachable!("count bounded by len"));
                payload.write_u8(kind);
                payload.write_u8((sequence & 0xFF) as u8);
                payload.write_u8((sequence >> 8) as u8);
            }
            sink.write_frame(MessageKind::Acknowledge, 0, &payload);
        }

        // Route received acks to their sender channels.
        while let Some((kind, sequence)) = incoming_acks.pop_front() {
            if let Some(sender) = senders
                .get_mut(kind as usize)
                .and_then(|slot| slot.as_mut())
            {
                sender.handle_ack(sequence, now, resend_delay, &mut sink);
            }
        }

        // Resend overdue messages and drain queues, reliable kinds first so
        // they are packed at the front of the datagram.
        for sender in senders.iter_mut().rev().flatten() {
            sender.heartbeat(now, resend_delay, &mut sink);
            sender.send_queued(now, &mut sink);
        }

        sink.flush();
    }

    fn handshake_heartbeat(&mut self, ctx: &mut PeerContext, now: Instant) {
        if now.saturating_duration_since(self.last_handshake_attempt)
            < ctx.config.handshake_resend_interval
        {
            return;
        }
        if self.handshake_attempts >= ctx.config.handshake_max_attempts {
            self.set_status(
                ctx,
                ConnectionStatus::Disconnected,
                "failed to establish connection",
            );
            return;
        }
        self.handshake_attempts += 1;
        self.last_handshake_attempt = now;
        match self.status {
            ConnectionStatus::InitiatedConnect => self.send_connect(ctx),
            ConnectionStatus::RespondedConnect => self.send_connect_response(ctx),
            _ => {}
        }
    }

    // ---- inbound path ----

    pub fn handle_frame(
        &mut self,
        ctx: &mut PeerContext,
        header: &FrameHeader,
        payload: &[u8],
        now: Instant,
    ) {
        let kind = match MessageKind::from_byte(header.kind) {
            Ok(kind) => kind,
            Err(e) => {
                ctx.stats.note_malformed_frame();
                warn!(endpoint = %self.remote_endpoint, "dropping frame: {e}");
                return;
            }
        };

        match kind {
            MessageKind::User(method, _) => self.handle_user_frame(ctx, method, header, payload, now),
            MessageKind::Acknowledge => {
                for triple in payload.chunks_exact(3) {
                    let sequence = (triple[1] as u16) | ((triple[2] as u16) << 8);
                    self.incoming_acks.push_back((triple[0], sequence & 0x7FFF));
                }
            }
            MessageKind::Ping => self.handle_ping(ctx, payload, now),
            MessageKind::Pong => self.handle_pong(ctx, payload, now),
            MessageKind::Connect => {
                // A retransmission: our response was lost.
                if self.status == ConnectionStatus::RespondedConnect {
                    self.send_connect_response(ctx);
                }
            }
            MessageKind::ConnectResponse => self.handle_connect_response(ctx, payload, now),
            MessageKind::ConnectionEstablished => self.handle_connection_established(ctx, now),
            MessageKind::Disconnect => {
                let mut buf = BitBuffer::from_vec(payload.to_vec(), payload.len() * 8);
                let reason = buf.read_string().unwrap_or_default();
                self.set_status(ctx, ConnectionStatus::Disconnected, &reason);
            }
            MessageKind::ExpandMtuRequest => {
                let received = FRAME_HEADER_BYTES + payload.len();
                let mut body = BitBuffer::with_capacity(4);
                body.write_var_u32(received as u32);
                self.send_frame_now(ctx, MessageKind::ExpandMtuSuccess, &body);
            }
            MessageKind::ExpandMtuSuccess => {
                let mut buf = BitBuffer::from_vec(payload.to_vec(), payload.len() * 8);
                match buf.read_var_u32() {
                    Ok(size) => self
                        .mtu_probe
                        .on_success(size as usize, &mut self.current_mtu),
                    Err(e) => {
                        ctx.stats.note_malformed_frame();
                        warn!("dropping malformed MTU confirmation: {e}");
                    }
                }
            }
            MessageKind::DiffieHellmanRequest => self.handle_dh_request(ctx, payload),
            MessageKind::DiffieHellmanResponse => self.handle_dh_response(ctx, payload),
            MessageKind::Unconnected => {
                let from = self.remote_endpoint;
                let data = payload.to_vec();
                ctx.events.emit(IncomingKinds::UNCONNECTED_DATA, move || {
                    PeerEvent::UnconnectedData { from, payload: data }
                });
            }
            MessageKind::Discovery => {
                let from = self.remote_endpoint;
                let data = payload.to_vec();
                ctx.events.emit(IncomingKinds::DISCOVERY_REQUEST, move || {
                    PeerEvent::DiscoveryRequest { from, payload: data }
                });
            }
            MessageKind::DiscoveryResponse => {
                let from = self.remote_endpoint;
                let data = payload.to_vec();
                ctx.events.emit(IncomingKinds::DISCOVERY_RESPONSE, move || {
                    PeerEvent::DiscoveryResponse { from, payload: data }
                });
            }
        }
    }

    fn handle_user_frame(
        &mut self,
        ctx: &mut PeerContext,
        method: DeliveryMethod,
        header: &FrameHeader,
        payload: &[u8],
        now: Instant,
    ) {
        if !matches!(
            self.status,
            ConnectionStatus::Connected | ConnectionStatus::ConnectedSecured
        ) {
            trace!(endpoint = %self.remote_endpoint, "user frame before connected; dropping");
            return;
        }

        let mut vec = ctx.pool.take_vec(payload.len());
        vec.extend_from_slice(payload);
        let msg = IncomingMessage::new(
            header,
            BitBuffer::from_vec(vec, header.payload_bits as usize),
            self.remote_endpoint,
            self.remote_id,
        );

        let Self {
            receivers,
            outgoing_acks,
            ..
        } = self;
        let channel = receivers[header.kind as usize]
            .get_or_insert_with(|| ReceiverChannel::new(method, header.kind));
        let mut released = Released::new();
        channel.receive(msg, outgoing_acks, &mut released, &ctx.pool);

        for msg in released {
            self.release_incoming(ctx, msg, now);
        }
    }

    fn release_incoming(&mut self, ctx: &mut PeerContext, msg: IncomingMessage, now: Instant) {
        if msg.fragment {
            if let Some(complete) = self.reassembly.insert_chunk(msg, now) {
                self.deliver(ctx, complete);
            }
        } else {
            self.deliver(ctx, msg);
        }
    }

    fn deliver(&mut self, ctx: &mut PeerContext, mut msg: IncomingMessage) {
        if let Some(cipher) = self.cipher.as_mut() {
            let Some(plain) = cipher.decrypt(msg.buffer.as_bytes()) else {
                warn!(endpoint = %self.remote_endpoint, "payload failed to decrypt; dropping");
                ctx.stats.note_dropped_message();
                return;
            };
            let bits = plain.len() * 8;
            msg.buffer = BitBuffer::from_vec(plain, bits);
        }
        ctx.stats.note_received_message();
        ctx.events.emit(IncomingKinds::DATA, move || PeerEvent::Data(msg));
    }

    fn handle_ping(&mut self, ctx: &mut PeerContext, payload: &[u8], now: Instant) {
        let mut buf = BitBuffer::from_vec(payload.to_vec(), payload.len() * 8);
        let Ok(number) = buf.read_u8() else {
            ctx.stats.note_malformed_frame();
            return;
        };
        let mut pong = BitBuffer::with_capacity(9);
        pong.write_u8(number);
        pong.write_f64(ctx.local_seconds(now));
        self.send_frame_now(ctx, MessageKind::Pong, &pong);
    }

    fn handle_pong(&mut self, ctx: &mut PeerContext, payload: &[u8], now: Instant) {
        let mut buf = BitBuffer::from_vec(payload.to_vec(), payload.len() * 8);
        let (Ok(number), Ok(remote_seconds)) = (buf.read_u8(), buf.read_f64()) else {
            ctx.stats.note_malformed_frame();
            return;
        };
        let Some((_, sent_at)) = self.ping_pending.take_if(|(n, _)| *n == number) else {
            trace!(number, "pong without matching ping");
            return;
        };
        let round_trip = now.saturating_duration_since(sent_at);
        self.rtt.update(round_trip);
        self.remote_clock
            .update(remote_seconds, ctx.local_seconds(now), round_trip);
        self.timeout_deadline = now + ctx.config.connection_timeout;

        let endpoint = self.remote_endpoint;
        let remote_id = self.remote_id;
        let average = self.rtt.average().unwrap_or(round_trip);
        ctx.events
            .emit(IncomingKinds::CONNECTION_LATENCY_UPDATED, move || {
                PeerEvent::ConnectionLatencyUpdated {
                    endpoint,
                    remote_id,
                    round_trip: average,
                }
            });
    }

    fn handle_connect_response(&mut self, ctx: &mut PeerContext, payload: &[u8], now: Instant) {
        match self.status {
            ConnectionStatus::InitiatedConnect => {}
            // Our ConnectionEstablished was lost and the response resent.
            ConnectionStatus::Connected | ConnectionStatus::ConnectedSecured => {
                self.send_established(ctx);
                return;
            }
            _ => return,
        }
        let mut buf = BitBuffer::from_vec(payload.to_vec(), payload.len() * 8);
        let (Ok(magic), Ok(remote_id)) = (buf.read_u16(), buf.read_u64()) else {
            ctx.stats.note_malformed_frame();
            return;
        };
        if magic != MAGIC_VERSION {
            warn!(magic, "rejecting connect response with wrong version");
            return;
        }
        self.remote_id = remote_id;
        self.send_established(ctx);
        self.promote_to_connected(ctx, now, "connected");
    }

    fn handle_connection_established(&mut self, ctx: &mut PeerContext, now: Instant) {
        if self.status != ConnectionStatus::RespondedConnect {
            return;
        }
        self.promote_to_connected(ctx, now, "connection established");
        if ctx.config.negotiate_encryption {
            self.begin_key_exchange(ctx);
        }
    }

    fn promote_to_connected(&mut self, ctx: &mut PeerContext, now: Instant, reason: &str) {
        self.timeout_deadline = now + ctx.config.connection_timeout;
        self.last_ping_sent = now;
        let rtt_hint = self.rtt.average().unwrap_or(crate::rtt::RESEND_DELAY_UNSAMPLED);
        self.mtu_probe
            .start(now, ctx.config.expand_mtu_frequency, rtt_hint);
        self.set_status(ctx, ConnectionStatus::Connected, reason);
    }

    // ---- key agreement ----

    fn begin_key_exchange(&mut self, ctx: &mut PeerContext) {
        if ctx.config.cipher_factory.is_none() {
            debug!("encryption negotiation enabled without a cipher factory; skipping");
            return;
        }
        let exchange = KeyExchange::generate(&mut OsRng);
        let mut body = BitBuffer::new();
        write_big_uint(&mut body, exchange.prime());
        write_big_uint(&mut body, exchange.generator());
        write_big_uint(&mut body, exchange.public_value());
        self.send_frame_now(ctx, MessageKind::DiffieHellmanRequest, &body);
        self.key_exchange = Some(exchange);
    }

    fn handle_dh_request(&mut self, ctx: &mut PeerContext, payload: &[u8]) {
        if self.status != ConnectionStatus::Connected {
            return;
        }
        if !ctx.config.enable_encryption {
            debug!("remote offered key agreement but encryption is disabled");
            return;
        }
        let Some(factory) = ctx.config.cipher_factory.clone() else {
            debug!("remote offered key agreement but no cipher factory is set");
            return;
        };

        let mut buf = BitBuffer::from_vec(payload.to_vec(), payload.len() * 8);
        let (Ok(prime), Ok(generator), Ok(peer_public)) = (
            read_big_uint(&mut buf),
            read_big_uint(&mut buf),
            read_big_uint(&mut buf),
        ) else {
            ctx.stats.note_malformed_frame();
            warn!("dropping malformed key agreement request");
            return;
        };

        let exchange = KeyExchange::with_group(prime, generator, &mut OsRng);
        match exchange
            .shared_secret(&peer_public)
            .and_then(|secret| factory.derive(&secret))
        {
            Ok(cipher) => {
                let mut body = BitBuffer::new();
                write_big_uint(&mut body, exchange.public_value());
                self.send_frame_now(ctx, MessageKind::DiffieHellmanResponse, &body);
                self.cipher = Some(cipher);
                self.set_status(
                    ctx,
                    ConnectionStatus::ConnectedSecured,
                    "key agreement complete",
                );
            }
            Err(e) => {
                warn!("key agreement failed, staying plaintext: {e}");
            }
        }
    }

    fn handle_dh_response(&mut self, ctx: &mut PeerContext, payload: &[u8]) {
        if self.status != ConnectionStatus::Connected {
            return;
        }
        let Some(exchange) = self.key_exchange.take() else {
            trace!("key agreement response without a pending request");
            return;
        };
        let Some(factory) = ctx.config.cipher_factory.clone() else {
            return;
        };
        let mut buf = BitBuffer::from_vec(payload.to_vec(), payload.len() * 8);
        let Ok(peer_public) = read_big_uint(&mut buf) else {
            ctx.stats.note_malformed_frame();
            return;
        };
        match exchange
            .shared_secret(&peer_public)
            .and_then(|secret| factory.derive(&secret))
        {
            Ok(cipher) => {
                self.cipher = Some(cipher);
                self.set_status(
                    ctx,
                    ConnectionStatus::ConnectedSecured,
                    "key agreement complete",
                );
            }
            Err(e) => {
                warn!("key agreement failed, staying plaintext: {e}");
            }
        }
    }

    // ---- frame emission ----

    fn send_connect(&self, ctx: &mut PeerContext) {
        let mut body = BitBuffer::new();
        body.write_u16(MAGIC_VERSION);
        body.write_u64(ctx.local_id);
        if let Some(hail) = &self.hail {
            body.write_bytes(hail);
        }
        self.send_frame_now(ctx, MessageKind::Connect, &body);
    }

    fn send_connect_response(&self, ctx: &mut PeerContext) {
        let mut body = BitBuffer::new();
        body.write_u16(MAGIC_VERSION);
        body.write_u64(ctx.local_id);
        self.send_frame_now(ctx, MessageKind::ConnectResponse, &body);
    }

    fn send_established(&self, ctx: &mut PeerContext) {
        self.send_frame_now(ctx, MessageKind::ConnectionEstablished, &BitBuffer::new());
    }

    fn send_ping(&mut self, ctx: &mut PeerContext, now: Instant) {
        self.next_ping_number = self.next_ping_number.wrapping_add(1);
        let mut body = BitBuffer::with_capacity(1);
        body.write_u8(self.next_ping_number);
        self.send_frame_now(ctx, MessageKind::Ping, &body);
        self.ping_pending = Some((self.next_ping_number, now));
        self.last_ping_sent = now;
    }

    fn send_probe(&self, ctx: &mut PeerContext, size: usize) {
        let payload_len = size - FRAME_HEADER_BYTES;
        let mut frame = Vec::with_capacity(size);
        let header = FrameHeader::new(
            MessageKind::ExpandMtuRequest,
            0,
            false,
            (payload_len * 8) as u16,
        );
        header.encode(&mut frame);
        frame.resize(size, 0);
        ctx.send_probe_datagram(self.remote_endpoint, frame, size);
    }

    fn send_disconnect_frame(&self, ctx: &mut PeerContext, reason: &str) {
        let mut body = BitBuffer::new();
        body.write_string(reason);
        self.send_frame_now(ctx, MessageKind::Disconnect, &body);
    }

    /// Emits a frame as its own datagram, outside the coalescing buffer.
    /// Handshake and ping traffic never waits behind user messages.
    fn send_frame_now(&self, ctx: &mut PeerContext, kind: MessageKind, payload: &BitBuffer) {
        let mut frame = Vec::with_capacity(FRAME_HEADER_BYTES + payload.byte_length());
        let header = FrameHeader::new(kind, 0, false, payload.bit_length() as u16);
        header.encode(&mut frame);
        frame.extend_from_slice(payload.as_bytes());
        ctx.send_datagram(self.remote_endpoint, frame);
    }

    fn set_status(&mut self, ctx: &mut PeerContext, status: ConnectionStatus, reason: &str) {
        if self.status == status {
            return;
        }
        debug!(endpoint = %self.remote_endpoint, ?status, reason, "status changed");
        self.status = status;
        let endpoint = self.remote_endpoint;
        let remote_id = self.remote_id;
        let reason = reason.to_string();
        ctx.events.emit(IncomingKinds::STATUS_CHANGED, move || {
            PeerEvent::StatusChanged {
                endpoint,
                remote_id,
                status,
                reason,
            }
        });
    }
}
