use crossbeam_channel::Receiver;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use squall::connection::{Connection, ConnectionStatus};
use squall::context::PeerContext;
use squall::event::EventSink;
use squall::stats::PeerStatistics;
use squall::{
    DeliveryMethod, IncomingKinds, Peer, PeerConfig, PeerEvent,
};
use squall_wire::header::FRAME_HEADER_BYTES;
use squall_wire::{BitBuffer, FrameHeader};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn localhost_config() -> PeerConfig {
    let mut config = PeerConfig::default();
    config.local_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.port = 0;
    config
}

#[test]
fn test_garbage_datagrams_never_kill_the_peer() {
    let mut server_config = localhost_config();
    server_config.accept_incoming_connections = true;
    let server = Peer::start(server_config).unwrap();

    let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut rng = StdRng::seed_from_u64(99);

    // Pure noise.
    for _ in 0..32 {
        let mut junk = vec![0u8; (rng.next_u32() % 128) as usize + 1];
        rng.fill_bytes(&mut junk);
        raw.send_to(&junk, server.local_addr()).unwrap();
    }
    // A header whose payload length runs past the datagram.
    let mut lying = Vec::new();
    FrameHeader {
        kind: 67,
        sequence: 1,
        fragment: false,
        payload_bits: u16::MAX,
    }
    .encode(&mut lying);
    lying.extend_from_slice(&[1, 2, 3]);
    raw.send_to(&lying, server.local_addr()).unwrap();
    // An unknown internal kind.
    let mut unknown = Vec::new();
    FrameHeader {
        kind: 200,
        sequence: 0,
        fragment: false,
        payload_bits: 0,
    }
    .encode(&mut unknown);
    raw.send_to(&unknown, server.local_addr()).unwrap();
    // A truncated header.
    raw.send_to(&[128, 1], server.local_addr()).unwrap();

    // The peer shrugged all of it off and still accepts a real handshake.
    let client = Peer::start(localhost_config()).unwrap();
    client.connect(server.local_addr()).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut connected = false;
    while Instant::now() < deadline && !connected {
        if let Some(PeerEvent::StatusChanged { status, .. }) =
            client.recv_timeout(Duration::from_millis(50))
        {
            connected = status == ConnectionStatus::Connected;
        }
    }
    assert!(connected, "peer stopped serving after malformed traffic");
    assert!(server.statistics().snapshot().malformed_frames > 0);
}

// ---- deterministic reordering at the connection level ----

fn make_ctx(config: PeerConfig, id: u64, start: Instant) -> (PeerContext, Receiver<PeerEvent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let events = EventSink::new(tx, IncomingKinds::all());
    let stats = Arc::new(PeerStatistics::default());
    let ctx = PeerContext::new(
        Arc::new(config),
        id,
        start,
        events,
        stats,
        StdRng::seed_from_u64(id),
    );
    (ctx, rx)
}

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

fn addr(last: u8, port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), port)
}

#[test]
fn test_reordered_frames_release_in_order() {
    let start = Instant::now();
    let (mut ctx_a, _rx_a) = make_ctx(PeerConfig::default(), 1, start);
    let (mut ctx_b, rx_b) = make_ctx(PeerConfig::default(), 2, start);

    let mut a = Connection::new_outbound(addr(2, 2000), &mut ctx_a, start, None);
    let connect = drain_frames(&mut ctx_a);
    let mut body = BitBuffer::from_vec(connect[0].1.clone(), connect[0].1.len() * 8);
    body.read_u16().unwrap();
    let remote_id = body.read_u64().unwrap();
    let mut b = Connection::new_inbound(addr(1, 1000), remote_id, &mut ctx_b, start);
    for (header, payload) in drain_frames(&mut ctx_b) {
        a.handle_frame(&mut ctx_a, &header, &payload, start);
    }
    for (header, payload) in drain_frames(&mut ctx_a) {
        b.handle_frame(&mut ctx_b, &header, &payload, start);
    }
    assert_eq!(a.status(), ConnectionStatus::Connected);
    assert_eq!(b.status(), ConnectionStatus::Connected);

    for i in 0..20u8 {
        a.send_message(&mut ctx_a, &[i], DeliveryMethod::ReliableOrdered, 0, start);
    }
    let mut frames = drain_frames(&mut ctx_a);
    frames.shuffle(&mut StdRng::seed_from_u64(4));
    for (header, payload) in frames {
        b.handle_frame(&mut ctx_b, &header, &payload, start);
    }

    let mut released = Vec::new();
    while let Ok(event) = rx_b.try_recv() {
        if let PeerEvent::Data(msg) = event {
            released.push(msg.data()[0]);
        }
    }
    assert_eq!(released, (0..20u8).collect::<Vec<_>>());
}
