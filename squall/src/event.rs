use crate::connection::ConnectionStatus;
use crate::message::IncomingMessage;
use bitflags::bitflags;
use crossbeam_channel::Sender;
use std::net::SocketAddr;
use std::time::Duration;

bitflags! {
    /// Categories of events released to the application queue.
    ///
    /// A category that is not enabled is silently discarded at the source;
    /// the network thread never blocks on the application.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IncomingKinds: u16 {
        const STATUS_CHANGED = 1 << 0;
        const DATA = 1 << 1;
        const UNCONNECTED_DATA = 1 << 2;
        const DISCOVERY_REQUEST = 1 << 3;
        const DISCOVERY_RESPONSE = 1 << 4;
        const CONNECTION_LATENCY_UPDATED = 1 << 5;
        const TEST_MESSAGE = 1 << 6;
        const ERROR = 1 << 7;
    }
}

/// An event delivered to the application's inbound queue.
#[derive(Debug)]
pub enum PeerEvent {
    /// A connection changed status. `reason` is human-readable.
    StatusChanged {
        endpoint: SocketAddr,
        remote_id: u64,
        status: ConnectionStatus,
        reason: String,
    },
    /// A user payload arrived on a channel.
    Data(IncomingMessage),
    /// A kind-0 library datagram from an endpoint without a connection.
    UnconnectedData {
        from: SocketAddr,
        payload: Vec<u8>,
    },
    DiscoveryRequest {
        from: SocketAddr,
        payload: Vec<u8>,
    },
    DiscoveryResponse {
        from: SocketAddr,
        payload: Vec<u8>,
    },
    /// Emitted on every accepted pong.
    ConnectionLatencyUpdated {
        endpoint: SocketAddr,
        remote_id: u64,
        round_trip: Duration,
    },
    /// Loopback event injected by the application, used to exercise the
    /// inbound queue.
    TestMessage { payload: Vec<u8> },
    /// A recoverable error worth surfacing to the application.
    Error { message: String },
}

/// Fans events out to the application, filtered by the configured mask.
pub struct EventSink {
    tx: Sender<PeerEvent>,
    enabled: IncomingKinds,
}

impl EventSink {
    pub fn new(tx: Sender<PeerEvent>, enabled: IncomingKinds) -> Self {
        Self { tx, enabled }
    }

    pub fn is_enabled(&self, kind: IncomingKinds) -> bool {
        self.enabled.contains(kind)
    }

    /// Builds and sends the event only when its category is enabled. A
    /// disconnected receiver means the application dropped the queue; the
    /// event is discarded.
    pub fn emit(&self, kind: IncomingKinds, build: impl FnOnce() -> PeerEvent) {
        if self.enabled.contains(kind) {
            let _ = self.tx.send(build());
        }
    }
}
