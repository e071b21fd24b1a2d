use crossbeam_channel::Receiver;
use rand::SeedableRng;
use rand::rngs::StdRng;
use squall::channel::receiver::{AckQueue, ReceiverChannel, Released};
use squall::channel::sender::{ReliableSender, UnreliableSender};
use squall::channel::{CoalesceBuffer, FrameSink};
use squall::context::PeerContext;
use squall::event::EventSink;
use squall::message::{IncomingMessage, OutgoingMessage};
use squall::stats::PeerStatistics;
use squall::{IncomingKinds, MessagePool, PeerConfig, PeerEvent};
use squall_wire::header::FRAME_HEADER_BYTES;
use squall_wire::{BitBuffer, DeliveryMethod, FrameHeader, MessageKind};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

const KIND_RELIABLE_ORDERED_0: u8 = 67;
const KIND_UNRELIABLE: u8 = 1;

fn remote() -> SocketAddr {
    "10.1.1.1:7000".parse().unwrap()
}

fn test_ctx() -> (PeerContext, Receiver<PeerEvent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let config = Arc::new(PeerConfig::default());
    let events = EventSink::new(tx, IncomingKinds::all());
    let stats = Arc::new(PeerStatistics::default());
    let ctx = PeerContext::new(
        config,
        42,
        Instant::now(),
        events,
        stats,
        StdRng::seed_from_u64(7),
    );
    (ctx, rx)
}

fn payload_msg(byte: u8) -> OutgoingMessage {
    let mut buf = BitBuffer::new();
    buf.write_bytes(&[byte, byte, byte]);
    OutgoingMessage::inline(buf)
}

/// Parses every queued datagram back into `(header, payload)` frames.
fn drain_frames(ctx: &mut PeerContext) -> Vec<(FrameHeader, Vec<u8>)> {
    let mut frames = Vec::new();
    while let Some(datagram) = ctx.out.pop_front() {
        let data = datagram.payload;
        let mut offset = 0;
        while data.len() - offset >= FRAME_HEADER_BYTES {
            let header = FrameHeader::decode(&data[offset..]).unwrap();
            let start = offset + FRAME_HEADER_BYTES;
            let len = header.payload_bytes();
            frames.push((header, data[start..start + len].to_vec()));
            offset = start + len;
        }
    }
    frames
}

fn incoming(kind: u8, sequence: u16) -> IncomingMessage {
    let header = FrameHeader {
        kind,
        sequence,
        fragment: false,
        payload_bits: 16,
    };
    let mut buf = BitBuffer::new();
    buf.write_u16(sequence);
    IncomingMessage::new(&header, buf, remote(), 5)
}

#[test]
fn test_reliable_sender_window_caps_in_flight() {
    let (mut ctx, _rx) = test_ctx();
    let mut coalesce = CoalesceBuffer::default();
    let mut sender = ReliableSender::new(KIND_RELIABLE_ORDERED_0);
    let now = Instant::now();

    for i in 0..80 {
        sender.enqueue(payload_msg(i), 1408);
    }
    {
        let mut sink = FrameSink::new(&mut ctx, &mut coalesce, remote(), 1408);
        sender.send_queued(now, &mut sink);
        sink.flush();
    }
    let frames = drain_frames(&mut ctx);
    assert_eq!(frames.len(), 64, "window admits exactly 64 in flight");
    assert_eq!(sender.stored_count(), 64);
    assert_eq!(sender.queued_len(), 16);
    assert_eq!(frames[0].0.sequence, 0);
    assert_eq!(frames[63].0.sequence, 63);

    // Acking the window base frees slots for the tail.
    let delay = Duration::from_millis(100);
    {
        let mut sink = FrameSink::new(&mut ctx, &mut coalesce, remote(), 1408);
        for seq in 0..16 {
            sender.handle_ack(seq, now, delay, &mut sink);
        }
        sender.send_queued(now, &mut sink);
        sink.flush();
    }
    let frames = drain_frames(&mut ctx);
    assert_eq!(frames.len(), 16);
    assert_eq!(frames[0].0.sequence, 64);
    assert_eq!(sender.queued_len(), 0);
    assert_eq!(sender.window_start(), 16);
}

#[test]
fn test_reliable_sender_resends_after_delay() {
    let (mut ctx, _rx) = test_ctx();
    let mut coalesce = CoalesceBuffer::default();
    let mut sender = ReliableSender::new(KIND_RELIABLE_ORDERED_0);
    let now = Instant::now();
    let delay = Duration::from_millis(100);

    sender.enqueue(payload_msg(1), 1408);
    {
        let mut sink = FrameSink::new(&mut ctx, &mut coalesce, remote(), 1408);
        sender.send_queued(now, &mut sink);
        sink.flush();
    }
    drain_frames(&mut ctx);

    // Under the delay: silence.
    {
        let mut sink = FrameSink::new(&mut ctx, &mut coalesce, remote(), 1408);
        sender.heartbeat(now + Duration::from_millis(50), delay, &mut sink);
        sink.flush();
    }
    assert!(drain_frames(&mut ctx).is_empty());

    // Past the delay: one retransmission.
    {
        let mut sink = FrameSink::new(&mut ctx, &mut coalesce, remote(), 1408);
        sender.heartbeat(now + Duration::from_millis(150), delay, &mut sink);
        sink.flush();
    }
    let frames = drain_frames(&mut ctx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0.sequence, 0);
    assert_eq!(ctx.stats.snapshot().resent_from_delay, 1);
}

#[test]
fn test_ack_clears_slot_and_duplicate_is_noop() {
    let (mut ctx, _rx) = test_ctx();
    let mut coalesce = CoalesceBuffer::default();
    let mut sender = ReliableSender::new(KIND_RELIABLE_ORDERED_0);
    let now = Instant::now();
    let delay = Duration::from_millis(100);

    for i in 0..3 {
        sender.enqueue(payload_msg(i), 1408);
    }
    {
        let mut sink = FrameSink::new(&mut ctx, &mut coalesce, remote(), 1408);
        sender.send_queued(now, &mut sink);
        for _ in 0..2 {
            sender.handle_ack(0, now, delay, &mut sink);
        }
        sink.flush();
    }
    drain_frames(&mut ctx);
    assert_eq!(sender.stored_count(), 2);
    assert_eq!(sender.window_start(), 1);

    // After everything is acked, no timer ever fires again.
    {
        let mut sink = FrameSink::new(&mut ctx, &mut coalesce, remote(), 1408);
        sender.handle_ack(1, now, delay, &mut sink);
        sender.handle_ack(2, now, delay, &mut sink);
        sender.heartbeat(now + Duration::from_secs(10), delay, &mut sink);
        sink.flush();
    }
    assert!(drain_frames(&mut ctx).is_empty());
    assert_eq!(sender.window_start(), 3);
}

#[test]
fn test_hole_in_sequence_triggers_immediate_resend() {
    let (mut ctx, _rx) = test_ctx();
    let mut coalesce = CoalesceBuffer::default();
    let mut sender = ReliableSender::new(KIND_RELIABLE_ORDERED_0);
    let now = Instant::now();
    let delay = Duration::from_millis(100);

    for i in 0..3 {
        sender.enqueue(payload_msg(i), 1408);
    }
    {
        let mut sink = FrameSink::new(&mut ctx, &mut coalesce, remote(), 1408);
        sender.send_queued(now, &mut sink);
        sink.flush();
    }
    drain_frames(&mut ctx);

    // An ack for 2 while 0 and 1 are outstanding implies both were lost.
    let later = now + Duration::from_millis(30);
    {
        let mut sink = FrameSink::new(&mut ctx, &mut coalesce, remote(), 1408);
        sender.handle_ack(2, later, delay, &mut sink);
        sink.flush();
    }
    let frames = drain_frames(&mut ctx);
    let resent: Vec<u16> = frames.iter().map(|(h, _)| h.sequence).collect();
    assert_eq!(resent, vec![0, 1]);
    assert_eq!(ctx.stats.snapshot().resent_from_hole, 2);
    // The base does not move: 0 is still unacked.
    assert_eq!(sender.window_start(), 0);
}

#[test]
fn test_stale_ack_ignored() {
    let (mut ctx, _rx) = test_ctx();
    let mut coalesce = CoalesceBuffer::default();
    let mut sender = ReliableSender::new(KIND_RELIABLE_ORDERED_0);
    let now = Instant::now();
    let delay = Duration::from_millis(100);

    for i in 0..4 {
        sender.enqueue(payload_msg(i), 1408);
    }
    {
        let mut sink = FrameSink::new(&mut ctx, &mut coalesce, remote(), 1408);
        sender.send_queued(now, &mut sink);
        for seq in 0..4 {
            sender.handle_ack(seq, now, delay, &mut sink);
        }
        // Sequence 1020 is far behind the window base of 4.
        sender.handle_ack(1020, now, delay, &mut sink);
        sink.flush();
    }
    drain_frames(&mut ctx);
    assert_eq!(sender.window_start(), 4);
    assert_eq!(sender.stored_count(), 0);
}

#[test]
fn test_oversize_enqueue_dropped() {
    use squall::SendOutcome;
    let mut sender = ReliableSender::new(KIND_RELIABLE_ORDERED_0);
    let mut big = BitBuffer::new();
    big.write_bytes(&vec![0u8; 600]);
    assert_eq!(
        sender.enqueue(OutgoingMessage::inline(big), 512),
        SendOutcome::Dropped
    );
    assert_eq!(sender.queued_len(), 0);
}

#[test]
fn test_unreliable_sender_keeps_nothing() {
    let (mut ctx, _rx) = test_ctx();
    let mut coalesce = CoalesceBuffer::default();
    let mut sender = UnreliableSender::new(KIND_UNRELIABLE);

    for i in 0..3 {
        sender.enqueue(payload_msg(i), 1408);
    }
    {
        let mut sink = FrameSink::new(&mut ctx, &mut coalesce, remote(), 1408);
        sender.send_queued(&mut sink);
        sink.flush();
    }
    let frames = drain_frames(&mut ctx);
    assert_eq!(frames.len(), 3);
    let sequences: Vec<u16> = frames.iter().map(|(h, _)| h.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    assert_eq!(sender.queued_len(), 0);
}

#[test]
fn test_coalescing_splits_at_mtu() {
    let (mut ctx, _rx) = test_ctx();
    let mut coalesce = CoalesceBuffer::default();
    let mut sender = UnreliableSender::new(KIND_UNRELIABLE);

    // Eight messages of ~105 bytes against a 256-byte MTU: two per datagram.
    for _ in 0..8 {
        let mut buf = BitBuffer::new();
        buf.write_bytes(&[7u8; 100]);
        sender.enqueue(OutgoingMessage::inline(buf), 256);
    }
    {
        let mut sink = FrameSink::new(&mut ctx, &mut coalesce, remote(), 256);
        sender.send_queued(&mut sink);
        sink.flush();
    }
    let datagrams: Vec<_> = std::iter::from_fn(|| ctx.out.pop_front()).collect();
    assert_eq!(datagrams.len(), 4);
    for datagram in &datagrams {
        assert!(datagram.payload.len() <= 256);
        assert_eq!(datagram.payload.len(), 2 * (FRAME_HEADER_BYTES + 100));
    }
}

// ---- receivers ----

fn receive(
    channel: &mut ReceiverChannel,
    pool: &MessagePool,
    msg: IncomingMessage,
) -> (Vec<u16>, Vec<(u8, u16)>) {
    let mut acks: AckQueue = AckQueue::new();
    let mut released: Released = Released::new();
    channel.receive(msg, &mut acks, &mut released, pool);
    (
        released.iter().map(|m| m.sequence()).collect(),
        acks.into_iter().collect(),
    )
}

#[test]
fn test_ordered_receiver_releases_in_order() {
    let pool = MessagePool::new(true, 16);
    let mut channel =
        ReceiverChannel::new(DeliveryMethod::ReliableOrdered, KIND_RELIABLE_ORDERED_0);

    let (released, acks) = receive(&mut channel, &pool, incoming(KIND_RELIABLE_ORDERED_0, 0));
    assert_eq!(released, vec![0]);
    assert_eq!(acks, vec![(KIND_RELIABLE_ORDERED_0, 0)]);

    // 2 and 3 are withheld until 1 closes the gap.
    let (released, _) = receive(&mut channel, &pool, incoming(KIND_RELIABLE_ORDERED_0, 2));
    assert!(released.is_empty());
    let (released, _) = receive(&mut channel, &pool, incoming(KIND_RELIABLE_ORDERED_0, 3));
    assert!(released.is_empty());
    let (released, acks) = receive(&mut channel, &pool, incoming(KIND_RELIABLE_ORDERED_0, 1));
    assert_eq!(released, vec![1, 2, 3]);
    assert_eq!(acks, vec![(KIND_RELIABLE_ORDERED_0, 1)]);
}

#[test]
fn test_ordered_receiver_acks_duplicates_without_release() {
    let pool = MessagePool::new(true, 16);
    let mut channel =
        ReceiverChannel::new(DeliveryMethod::ReliableOrdered, KIND_RELIABLE_ORDERED_0);

    receive(&mut channel, &pool, incoming(KIND_RELIABLE_ORDERED_0, 0));
    let (released, acks) = receive(&mut channel, &pool, incoming(KIND_RELIABLE_ORDERED_0, 0));
    assert!(released.is_empty());
    // The duplicate is still acknowledged so the sender stops resending.
    assert_eq!(acks, vec![(KIND_RELIABLE_ORDERED_0, 0)]);
}

#[test]
fn test_ordered_receiver_wraps_sequence_space() {
    let pool = MessagePool::new(true, 16);
    let mut channel =
        ReceiverChannel::new(DeliveryMethod::ReliableOrdered, KIND_RELIABLE_ORDERED_0);

    // Walk expected up to 1023 so the next in-order message is 0 again.
    for seq in 0..1024u16 {
        let (released, _) = receive(&mut channel, &pool, incoming(KIND_RELIABLE_ORDERED_0, seq));
        assert_eq!(released, vec![seq]);
    }
    let (released, _) = receive(&mut channel, &pool, incoming(KIND_RELIABLE_ORDERED_0, 0));
    assert_eq!(released, vec![0]);
}

#[test]
fn test_sequenced_receiver_drops_stale() {
    let pool = MessagePool::new(true, 16);
    let kind = 2; // unreliable-sequenced channel 0
    let mut channel = ReceiverChannel::new(DeliveryMethod::UnreliableSequenced, kind);

    let (released, acks) = receive(&mut channel, &pool, incoming(kind, 5));
    assert_eq!(released, vec![5]);
    assert!(acks.is_empty(), "unreliable-sequenced never acks");

    let (released, _) = receive(&mut channel, &pool, incoming(kind, 3));
    assert!(released.is_empty());
    let (released, _) = receive(&mut channel, &pool, incoming(kind, 5));
    assert!(released.is_empty());
    let (released, _) = receive(&mut channel, &pool, incoming(kind, 6));
    assert_eq!(released, vec![6]);
}

#[test]
fn test_sequenced_receiver_window_bounds_jumps() {
    let pool = MessagePool::new(true, 16);
    let kind = 2;
    let mut channel = ReceiverChannel::new(DeliveryMethod::UnreliableSequenced, kind);

    receive(&mut channel, &pool, incoming(kind, 0));
    // A jump of exactly the 128-wide receive window is still fresh.
    let (released, _) = receive(&mut channel, &pool, incoming(kind, 128));
    assert_eq!(released, vec![128]);
    // One past the window is not credible and is dropped.
    let (released, _) = receive(&mut channel, &pool, incoming(kind, 257));
    assert!(released.is_empty());
    let (released, _) = receive(&mut channel, &pool, incoming(kind, 129));
    assert_eq!(released, vec![129]);
}

#[test]
fn test_reliable_sequenced_receiver_acks_stale() {
    let pool = MessagePool::new(true, 16);
    let kind = 35; // reliable-sequenced channel 0
    let mut channel = ReceiverChannel::new(DeliveryMethod::ReliableSequenced, kind);

    receive(&mut channel, &pool, incoming(kind, 5));
    let (released, acks) = receive(&mut channel, &pool, incoming(kind, 3));
    assert!(released.is_empty());
    assert_eq!(acks, vec![(kind, 3)]);
}

#[test]
fn test_unordered_receiver_releases_immediately_and_dedupes() {
    let pool = MessagePool::new(true, 16);
    let kind = 34; // reliable-unordered
    let mut channel = ReceiverChannel::new(DeliveryMethod::ReliableUnordered, kind);

    let (released, _) = receive(&mut channel, &pool, incoming(kind, 2));
    assert_eq!(released, vec![2]);
    let (released, _) = receive(&mut channel, &pool, incoming(kind, 0));
    assert_eq!(released, vec![0]);
    let (released, acks) = receive(&mut channel, &pool, incoming(kind, 2));
    assert!(released.is_empty(), "duplicate suppressed");
    assert_eq!(acks, vec![(kind, 2)]);
    let (released, _) = receive(&mut channel, &pool, incoming(kind, 1));
    assert_eq!(released, vec![1]);
}

#[test]
fn test_unreliable_receiver_releases_everything() {
    let pool = MessagePool::new(true, 16);
    let mut channel = ReceiverChannel::new(DeliveryMethod::Unreliable, KIND_UNRELIABLE);

    for seq in [3u16, 1, 3, 2] {
        let (released, acks) = receive(&mut channel, &pool, incoming(KIND_UNRELIABLE, seq));
        assert_eq!(released, vec![seq]);
        assert_eq!(acks, vec![(KIND_UNRELIABLE, seq)]);
    }
}
