use super::{FrameSink, SendOutcome};
use crate::message::OutgoingMessage;
use crate::stats::ResendCause;
use squall_wire::sequence::{
    RELIABLE_WINDOW_SIZE, advance_sequence, in_send_window, relative_sequence,
};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::trace;

/// A reliable message held in the send window until acknowledged.
#[derive(Debug)]
struct StoredMessage {
    msg: OutgoingMessage,
    sent_at: Instant,
    send_count: u32,
}

/// Sender side of a reliable channel: sliding window, resend timers, ack
/// handling. One instance backs each of the reliable-ordered,
/// reliable-sequenced and reliable-unordered kinds.
#[derive(Debug)]
pub struct ReliableSender {
    kind: u8,
    window_size: u16,
    /// Oldest unacknowledged sequence.
    window_start: u16,
    next_sequence: u16,
    queued: VecDeque<OutgoingMessage>,
    stored: Vec<Option<StoredMessage>>,
}

impl ReliableSender {
    pub fn new(kind: u8) -> Self {
        let window_size = RELIABLE_WINDOW_SIZE;
        Self {
            kind,
            window_size,
            window_start: 0,
            next_sequence: 0,
            queued: VecDeque::new(),
            stored: (0..window_size).map(|_| None).collect(),
        }
    }

    pub fn enqueue(&mut self, msg: OutgoingMessage, mtu: usize) -> SendOutcome {
        if msg.encoded_len() > mtu {
            trace!(
                kind = self.kind,
                len = msg.encoded_len(),
                mtu,
                "dropping oversize reliable message"
            );
            return SendOutcome::Dropped;
        }
        self.queued.push_back(msg);
        SendOutcome::Queued
    }

    /// Retransmits stored messages whose resend timer expired.
    pub fn heartbeat(&mut self, now: Instant, resend_delay: Duration, sink: &mut FrameSink<'_>) {
        for slot in self.stored.iter_mut().flatten() {
            if now.saturating_duration_since(slot.sent_at) > resend_delay {
                sink.write_message(self.kind, &slot.msg);
                slot.sent_at = now;
                slot.send_count += 1;
                sink.ctx.stats.note_resend(ResendCause::Delay);
                trace!(
                    kind = self.kind,
                    sequence = slot.msg.sequence,
                    "resending after delay"
                );
            }
        }
    }

    /// Moves queued messages into free window slots and onto the wire.
    /// Returns true when anything was written.
    pub fn send_queued(&mut self, now: Instant, sink: &mut FrameSink<'_>) -> bool {
        let mut wrote = false;
        while !self.queued.is_empty()
            && in_send_window(self.next_sequence, self.window_start, self.window_size)
        {
            let mut msg = self
                .queued
                .pop_front()
                .unwrap_or_else(|| unreachable!("queue checked nonempty"));
            msg.sequence = self.next_sequence;
            self.next_sequence = advance_sequence(self.next_sequence, 1);
            sink.write_message(self.kind, &msg);
            let slot = (msg.sequence % self.window_size) as usize;
            self.stored[slot] = Some(StoredMessage {
                msg,
                sent_at: now,
                send_count: 1,
            });
            wrote = true;
        }
        wrote
    }

    /// Processes one acknowledged sequence. Duplicate and stale acks are
    /// no-ops; an ack ahead of the window base triggers immediate resend of
    /// the holes behind it.
    pub fn handle_ack(
        &mut self,
        sequence: u16,
        now: Instant,
        resend_delay: Duration,
        sink: &mut FrameSink<'_>,
    ) {
        let rel = relative_sequence(sequence, self.window_start);
        if rel < 0 || rel >= self.window_size as i32 {
            return;
        }

        let slot = (sequence % self.window_size) as usize;
        if self.stored[slot]
            .as_ref()
            .is_some_and(|s| s.msg.sequence == sequence)
        {
            let stored = self.stored[slot]
                .take()
                .unwrap_or_else(|| unreachable!("slot checked above"));
            sink.ctx.pool.recycle_outgoing(stored.msg);
        }

        if rel > 0 {
            // The ack skipped sequences still stored below it: holes.
            // The holdoff keeps a burst of acks from resending each hole
            // once per ack.
            let holdoff = resend_delay / 4;
            let mut seq = self.window_start;
            while seq != sequence {
                let idx = (seq % self.window_size) as usize;
                if let Some(stored) = self.stored[idx].as_mut()
                    && stored.msg.sequence == seq
                    && now.saturating_duration_since(stored.sent_at) > holdoff
                {
                    sink.write_message(self.kind, &stored.msg);
                    stored.sent_at = now;
                    stored.send_count += 1;
                    sink.ctx.stats.note_resend(ResendCause::HoleInSequence);
                    trace!(kind = self.kind, sequence = seq, "resending hole");
                }
                seq = advance_sequence(seq, 1);
            }
        }

        while self.window_start != self.next_sequence
            && self.stored[(self.window_start % self.window_size) as usize].is_none()
        {
            self.window_start = advance_sequence(self.window_start, 1);
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn window_start(&self) -> u16 {
        self.window_start
    }

    pub fn stored_count(&self) -> usize {
        self.stored.iter().flatten().count()
    }
}

/// Sender side of the unreliable and unreliable-sequenced kinds: assigns
/// sequence numbers, keeps nothing.
#[derive(Debug)]
pub struct UnreliableSender {
    kind: u8,
    next_sequence: u16,
    queued: VecDeque<OutgoingMessage>,
}

impl UnreliableSender {
    pub fn new(kind: u8) -> Self {
        Self {
            kind,
            next_sequence: 0,
            queued: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, msg: OutgoingMessage, mtu: usize) -> SendOutcome {
        if msg.encoded_len() > mtu {
            trace!(
                kind = self.kind,
                len = msg.encoded_len(),
                mtu,
                "dropping oversize unreliable message"
            );
            return SendOutcome::Dropped;
        }
        self.queued.push_back(msg);
        SendOutcome::Queued
    }

    pub fn send_queued(&mut self, sink: &mut FrameSink<'_>) -> bool {
        let mut wrote = false;
        while let Some(mut msg) = self.queued.pop_front() {
            msg.sequence = self.next_sequence;
            self.next_sequence = advance_sequence(self.next_sequence, 1);
            sink.write_message(self.kind, &msg);
            sink.ctx.pool.recycle_outgoing(msg);
            wrote = true;
        }
        wrote
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }
}

/// Sender channel dispatch, one per active user message kind.
#[derive(Debug)]
pub enum SenderChannel {
    Unreliable(UnreliableSender),
    Reliable(ReliableSender),
}

impl SenderChannel {
    pub fn new(reliable: bool, kind: u8) -> Self {
        if reliable {
            SenderChannel::Reliable(ReliableSender::new(kind))
        } else {
            SenderChannel::Unreliable(UnreliableSender::new(kind))
        }
    }

    pub fn enqueue(&mut self, msg: OutgoingMessage, mtu: usize) -> SendOutcome {
        match self {
            SenderChannel::Unreliable(s) => s.enqueue(msg, mtu),
            SenderChannel::Reliable(s) => s.enqueue(msg, mtu),
        }
    }

    pub fn heartbeat(&mut self, now: Instant, resend_delay: Duration, sink: &mut FrameSink<'_>) {
        if let SenderChannel::Reliable(s) = self {
            s.heartbeat(now, resend_delay, sink);
        }
    }

    pub fn send_queued(&mut self, now: Instant, sink: &mut FrameSink<'_>) -> bool {
        match self {
            SenderChannel::Unreliable(s) => s.send_queued(sink),
            SenderChannel::Reliable(s) => s.send_queued(now, sink),
        }
    }

    pub fn handle_ack(
        &mut self,
        sequence: u16,
        now: Instant,
        resend_delay: Duration,
        sink: &mut FrameSink<'_>,
    ) {
        if let SenderChannel::Reliable(s) = self {
            s.handle_ack(sequence, now, resend_delay, sink);
        }
    }

    pub fn queued_len(&self) -> usize {
        match self {
            SenderChannel::Unreliable(s) => s.queued_len(),
            SenderChannel::Reliable(s) => s.queued_len(),
        }
    }
}
