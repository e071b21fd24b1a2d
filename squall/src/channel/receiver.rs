use crate::message::IncomingMessage;
use crate::pool::MessagePool;
use smallvec::SmallVec;
use squall_wire::sequence::{
    RELIABLE_WINDOW_SIZE, SEQUENCED_RECEIVE_WINDOW, advance_sequence, relative_sequence,
};
use squall_wire::{BitSet, DeliveryMethod};
use std::collections::VecDeque;
use tracing::trace;

/// Messages a receiver released to the application this call.
pub type Released = SmallVec<[IncomingMessage; 4]>;

/// Acknowledgements queued for the next heartbeat: `(kind, sequence)`.
pub type AckQueue = VecDeque<(u8, u16)>;

/// Delivers every message, in arrival order. Acks for symmetry with the
/// reliable kinds; the sender ignores them.
#[derive(Debug)]
pub struct UnreliableReceiver {
    kind: u8,
}

impl UnreliableReceiver {
    fn receive(&mut self, msg: IncomingMessage, acks: &mut AckQueue, released: &mut Released) {
        acks.push_back((self.kind, msg.sequence));
        released.push(msg);
    }
}

/// Keeps only the newest message; anything at or behind the latest delivered
/// sequence is dropped, as is anything claiming to be further ahead than the
/// receive window allows. Backs both sequenced kinds; only the reliable one
/// acknowledges.
#[derive(Debug)]
pub struct SequencedReceiver {
    kind: u8,
    acking: bool,
    window_size: u16,
    latest: Option<u16>,
}

impl SequencedReceiver {
    fn receive(
        &mut self,
        msg: IncomingMessage,
        acks: &mut AckQueue,
        released: &mut Released,
        pool: &MessagePool,
    ) {
        if self.acking {
            acks.push_back((self.kind, msg.sequence));
        }
        let fresh = match self.latest {
            None => true,
            Some(latest) => {
                let rel = relative_sequence(msg.sequence, latest);
                rel > 0 && rel <= self.window_size as i32
            }
        };
        if fresh {
            self.latest = Some(msg.sequence);
            released.push(msg);
        } else {
            trace!(kind = self.kind, sequence = msg.sequence, "dropping stale");
            drop_message(msg, pool);
        }
    }
}

/// Withholds out-of-order arrivals and releases in strict sequence order.
#[derive(Debug)]
pub struct OrderedReceiver {
    kind: u8,
    window_size: u16,
    expected: u16,
    withheld: Vec<Option<IncomingMessage>>,
}

impl OrderedReceiver {
    fn receive(
        &mut self,
        msg: IncomingMessage,
        acks: &mut AckQueue,
        released: &mut Released,
        pool: &MessagePool,
    ) {
        acks.push_back((self.kind, msg.sequence));
        let rel = relative_sequence(msg.sequence, self.expected);
        if rel == 0 {
            released.push(msg);
            self.expected = advance_sequence(self.expected, 1);
            // Drain the contiguous run that was waiting behind this one.
            loop {
                let slot = (self.expected % self.window_size) as usize;
                match self.withheld[slot].take_if(|m| m.sequence == self.expected) {
                    Some(next) => {
                        released.push(next);
                        self.expected = advance_sequence(self.expected, 1);
                    }
                    None => break,
                }
            }
        } else if rel < 0 {
            trace!(
                kind = self.kind,
                sequence = msg.sequence,
                "dropping duplicate"
            );
            drop_message(msg, pool);
        } else if rel < self.window_size as i32 {
            let slot = (msg.sequence % self.window_size) as usize;
            if self.withheld[slot].is_none() {
                self.withheld[slot] = Some(msg);
            } else {
                drop_message(msg, pool);
            }
        } else {
            trace!(
                kind = self.kind,
                sequence = msg.sequence,
                expected = self.expected,
                "dropping out-of-window"
            );
            drop_message(msg, pool);
        }
    }
}

/// Releases everything exactly once, in arrival order, deduplicating with a
/// window-sized bitmap.
#[derive(Debug)]
pub struct UnorderedReceiver {
    kind: u8,
    window_size: u16,
    window_start: u16,
    seen: BitSet<1>,
}

impl UnorderedReceiver {
    fn receive(
        &mut self,
        msg: IncomingMessage,
        acks: &mut AckQueue,
        released: &mut Released,
        pool: &MessagePool,
    ) {
        acks.push_back((self.kind, msg.sequence));
        let rel = relative_sequence(msg.sequence, self.window_start);
        if rel < 0 || rel >= self.window_size as i32 {
            drop_message(msg, pool);
            return;
        }
        let slot = (msg.sequence % self.window_size) as usize;
        if !self.seen.set(slot) {
            trace!(
                kind = self.kind,
                sequence = msg.sequence,
                "dropping duplicate"
            );
            drop_message(msg, pool);
            return;
        }
        released.push(msg);
        // Slide the window over the seen run, freeing slots for reuse.
        while self.seen.get((self.window_start % self.window_size) as usize) {
            self.seen
                .unset((self.window_start % self.window_size) as usize);
            self.window_start = advance_sequence(self.window_start, 1);
        }
    }
}

fn drop_message(mut msg: IncomingMessage, pool: &MessagePool) {
    pool.recycle_incoming(&mut msg);
}

/// Receiver channel dispatch, one per active user message kind.
#[derive(Debug)]
pub enum ReceiverChannel {
    Unreliable(UnreliableReceiver),
    Sequenced(SequencedReceiver),
    Ordered(OrderedReceiver),
    Unordered(UnorderedReceiver),
}

impl ReceiverChannel {
    pub fn new(method: DeliveryMethod, kind: u8) -> Self {
        match method {
            DeliveryMethod::Unreliable => ReceiverChannel::Unreliable(UnreliableReceiver { kind }),
            DeliveryMethod::UnreliableSequenced => ReceiverChannel::Sequenced(SequencedReceiver {
                kind,
                acking: false,
                window_size: SEQUENCED_RECEIVE_WINDOW,
                latest: None,
            }),
            DeliveryMethod::ReliableSequenced => ReceiverChannel::Sequenced(SequencedReceiver {
                kind,
                acking: true,
                // The reliable sender never has more than a window in
                // flight, so a genuine message is never further ahead.
                window_size: RELIABLE_WINDOW_SIZE,
                latest: None,
            }),
            DeliveryMethod::ReliableOrdered => ReceiverChannel::Ordered(OrderedReceiver {
                kind,
                window_size: RELIABLE_WINDOW_SIZE,
                expected: 0,
                withheld: (0..RELIABLE_WINDOW_SIZE).map(|_| None).collect(),
            }),
            DeliveryMethod::ReliableUnordered => ReceiverChannel::Unordered(UnorderedReceiver {
                kind,
                window_size: RELIABLE_WINDOW_SIZE,
                window_start: 0,
                seen: BitSet::new(),
            }),
        }
    }

    pub fn receive(
        &mut self,
        msg: IncomingMessage,
        acks: &mut AckQueue,
        released: &mut Released,
        pool: &MessagePool,
    ) {
        match self {
            ReceiverChannel::Unreliable(r) => r.receive(msg, acks, released),
            ReceiverChannel::Sequenced(r) => r.receive(msg, acks, released, pool),
            ReceiverChannel::Ordered(r) => r.receive(msg, acks, released, pool),
            ReceiverChannel::Unordered(r) => r.receive(msg, acks, released, pool),
        }
    }
}
