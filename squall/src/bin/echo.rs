//! Minimal echo demo: one process listens, another connects and sends a
//! line of text over a reliable-ordered channel.
//!
//! ```text
//! echo --listen 14242
//! echo --connect 127.0.0.1:14242 --message "through the storm"
//! ```

use clap::Parser;
use squall::{
    ConnectionStatus, DeliveryMethod, IncomingKinds, Peer, PeerConfig, PeerEvent,
};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(about = "squall reliable-UDP echo demo")]
struct Args {
    /// Accept connections on this port and echo every payload back.
    #[arg(long)]
    listen: Option<u16>,

    /// Connect to a listening peer.
    #[arg(long)]
    connect: Option<SocketAddr>,

    /// Payload to send once connected.
    #[arg(long, default_value = "hello over squall")]
    message: String,

    /// Seconds to wait for the round trip before giving up.
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

fn main() {
    let args = Args::parse();
    match (args.listen, args.connect) {
        (Some(port), None) => listen(port),
        (None, Some(remote)) => send(remote, &args.message, args.timeout),
        _ => {
            eprintln!("pass exactly one of --listen <port> or --connect <addr>");
            std::process::exit(2);
        }
    }
}

fn listen(port: u16) {
    let mut config = PeerConfig::default();
    config.port = port;
    config.accept_incoming_connections = true;
    config.enabled_incoming_kinds = IncomingKinds::all();

    let peer = Peer::start(config).expect("failed to start peer");
    println!(
        "listening on {} (peer id {:#018x})",
        peer.local_addr(),
        peer.local_peer_id()
    );

    loop {
        let Some(event) = peer.recv_timeout(Duration::from_secs(1)) else {
            continue;
        };
        match event {
            PeerEvent::StatusChanged {
                endpoint,
                status,
                reason,
                ..
            } => {
                println!("{endpoint}: {status:?} ({reason})");
            }
            PeerEvent::Data(msg) => {
                println!(
                    "{} sent {} bytes; echoing",
                    msg.sender(),
                    msg.data().len()
                );
                let _ = peer.send(
                    msg.sender(),
                    msg.data().to_vec(),
                    DeliveryMethod::ReliableOrdered,
                    0,
                );
            }
            other => println!("{other:?}"),
        }
    }
}

fn send(remote: SocketAddr, message: &str, timeout_secs: u64) {
    let mut config = PeerConfig::default();
    config.enabled_incoming_kinds = IncomingKinds::all();

    let peer = Peer::start(config).expect("failed to start peer");
    peer.connect(remote).expect("peer thread running");

    let deadline = std::time::Instant::now() + Duration::from_secs(timeout_secs);
    let mut sent = false;
    while std::time::Instant::now() < deadline {
        let Some(event) = peer.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        match event {
            PeerEvent::StatusChanged {
                status: ConnectionStatus::Connected,
                ..
            } if !sent => {
                println!("connected; sending {} bytes", message.len());
                peer.send(
                    remote,
                    message.as_bytes().to_vec(),
                    DeliveryMethod::ReliableOrdered,
                    0,
                )
                .expect("peer thread running");
                sent = true;
            }
            PeerEvent::StatusChanged { status, reason, .. } => {
                println!("status {status:?} ({reason})");
                if status == ConnectionStatus::Disconnected {
                    std::process::exit(1);
                }
            }
            PeerEvent::Data(msg) => {
                println!("echo: {}", String::from_utf8_lossy(msg.data()));
                peer.shutdown("done");
                return;
            }
            _ => {}
        }
    }
    eprintln!("timed out waiting for the echo");
    std::process::exit(1);
}
