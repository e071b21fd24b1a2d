//! # Squall
//!
//! A reliable, fragmented, optionally-encrypted message transport over a
//! single connectionless UDP socket, multiplexed across many remote peers.
//!
//! ## Architecture
//!
//! - **Peer runtime**: one network thread owns the socket, every connection
//!   and all channel bookkeeping; applications talk to it through
//!   thread-safe queues ([`Peer`] commands in, [`PeerEvent`]s out).
//! - **Connections**: a per-endpoint state machine (handshake -> connected
//!   -> secured -> disconnected) with RTT tracking, MTU discovery, ack
//!   batching and a coalescing buffer that packs messages into MTU-sized
//!   datagrams.
//! - **Channels**: five delivery methods (unreliable, unreliable-sequenced,
//!   reliable-unordered, reliable-sequenced, reliable-ordered), 32
//!   sub-channels for the sequenced and ordered kinds.
//! - **Fragmentation**: payloads larger than the MTU are split into chunks
//!   and reassembled per sender and group.
//! - **Key agreement**: an accepting peer can bootstrap a Diffie-Hellman
//!   exchange; the derived secret feeds an application-supplied cipher that
//!   wraps user payloads from then on.

pub mod channel;
pub mod config;
pub mod connection;
pub mod context;
pub mod discovery;
pub mod error;
pub mod event;
pub mod fragment;
pub mod handshake;
pub mod identity;
pub mod message;
pub mod mtu;
pub mod peer;
pub mod pool;
pub mod rtt;
pub mod stats;
pub mod time;

mod socket;
mod small_map;

pub use channel::SendOutcome;
pub use config::PeerConfig;
pub use connection::{Connection, ConnectionStatus};
pub use error::{ConfigError, PeerError, SendError};
pub use event::{IncomingKinds, PeerEvent};
pub use handshake::{CipherError, CipherFactory, KeyExchange, PayloadCipher};
pub use message::IncomingMessage;
pub use mtu::{MtuProbe, ProbeStatus};
pub use peer::{MessageTarget, Peer};
pub use pool::MessagePool;
pub use rtt::{RemoteClock, RttTracker};
pub use stats::{PeerStatistics, StatisticsSnapshot};
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};

pub use squall_wire::{BitBuffer, DeliveryMethod, NUM_SEQUENCE_CHANNELS};
