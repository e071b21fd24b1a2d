use std::sync::atomic::{AtomicU64, Ordering};

/// Per-peer transport counters, shared with the application via `Arc`.
#[derive(Debug, Default)]
pub struct PeerStatistics {
    sent_packets: AtomicU64,
    received_packets: AtomicU64,
    sent_bytes: AtomicU64,
    received_bytes: AtomicU64,
    sent_messages: AtomicU64,
    received_messages: AtomicU64,
    resent_from_delay: AtomicU64,
    resent_from_hole: AtomicU64,
    dropped_messages: AtomicU64,
    malformed_frames: AtomicU64,
    connections_initiated: AtomicU64,
    connections_accepted: AtomicU64,
}

/// Why a reliable message was retransmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendCause {
    /// The resend timer expired without an acknowledgement.
    Delay,
    /// An acknowledgement for a later sequence implied this one was lost.
    HoleInSequence,
}

impl PeerStatistics {
    pub(crate) fn note_sent_packet(&self, bytes: usize) {
        self.sent_packets.fetch_add(1, Ordering::Relaxed);
        self.sent_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn note_received_packet(&self, bytes: usize) {
        self.received_packets.fetch_add(1, Ordering::Relaxed);
        self.received_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn note_sent_message(&self) {
        self.sent_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_received_message(&self) {
        self.received_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_resend(&self, cause: ResendCause) {
        let counter = match cause {
            ResendCause::Delay => &self.resent_from_delay,
            ResendCause::HoleInSequence => &self.resent_from_hole,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_dropped_message(&self) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_connection_initiated(&self) {
        self.connections_initiated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            sent_packets: self.sent_packets.load(Ordering::Relaxed),
            received_packets: self.received_packets.load(Ordering::Relaxed),
            sent_bytes: self.sent_bytes.load(Ordering::Relaxed),
            received_bytes: self.received_bytes.load(Ordering::Relaxed),
            sent_messages: self.sent_messages.load(Ordering::Relaxed),
            received_messages: self.received_messages.load(Ordering::Relaxed),
            resent_from_delay: self.resent_from_delay.load(Ordering::Relaxed),
            resent_from_hole: self.resent_from_hole.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            connections_initiated: self.connections_initiated.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`PeerStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub sent_packets: u64,
    pub received_packets: u64,
    pub sent_bytes: u64,
    pub received_bytes: u64,
    pub sent_messages: u64,
    pub received_messages: u64,
    pub resent_from_delay: u64,
    pub resent_from_hole: u64,
    pub dropped_messages: u64,
    pub malformed_frames: u64,
    pub connections_initiated: u64,
    pub connections_accepted: u64,
}
