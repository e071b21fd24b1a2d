use crate::config::PeerConfig;
use crate::event::EventSink;
use crate::fragment;
use crate::pool::MessagePool;
use crate::stats::PeerStatistics;
use rand::rngs::StdRng;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// A datagram queued for the socket. Probe datagrams carry their size so a
/// send failure can be routed back to the owning connection's MTU probe.
#[derive(Debug)]
pub struct Datagram {
    pub to: SocketAddr,
    pub payload: Vec<u8>,
    pub probe_size: Option<usize>,
}

/// Shared state threaded by reference through the network loop into every
/// connection and channel, in place of any global peer singleton.
pub struct PeerContext {
    pub config: Arc<PeerConfig>,
    pub local_id: u64,
    pub start: Instant,
    pub pool: MessagePool,
    pub stats: Arc<PeerStatistics>,
    pub events: EventSink,
    pub out: VecDeque<Datagram>,
    pub rng: StdRng,
    fragment_group: u16,
}

impl PeerContext {
    pub fn new(
        config: Arc<PeerConfig>,
        local_id: u64,
        start: Instant,
        events: EventSink,
        stats: Arc<PeerStatistics>,
        rng: StdRng,
    ) -> Self {
        let pool = MessagePool::new(
            config.use_message_recycling,
            config.recycled_cache_max_count,
        );
        Self {
            config,
            local_id,
            start,
            pool,
            stats,
            events,
            out: VecDeque::new(),
            rng,
            fragment_group: 0,
        }
    }

    /// Transport-local time in seconds since the peer started; this is what
    /// pings and pongs carry on the wire.
    pub fn local_seconds(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.start).as_secs_f64()
    }

    pub fn send_datagram(&mut self, to: SocketAddr, payload: Vec<u8>) {
        self.out.push_back(Datagram {
            to,
            payload,
            probe_size: None,
        });
    }

    pub fn send_probe_datagram(&mut self, to: SocketAddr, payload: Vec<u8>, size: usize) {
        self.out.push_back(Datagram {
            to,
            payload,
            probe_size: Some(size),
        });
    }

    pub fn next_fragment_group(&mut self) -> u16 {
        fragment::next_group(&mut self.fragment_group)
    }
}
