use crate::error::ConfigError;
use crate::event::IncomingKinds;
use crate::handshake::CipherFactory;
use crate::mtu::{MINIMUM_MTU, PROTOCOL_MAX_MTU};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

/// Peer configuration. Immutable once the peer has started.
///
/// The defaults describe a small client: 32 connection seats, no incoming
/// connections accepted, a 1408-byte MTU and automatic MTU expansion off.
#[derive(Clone)]
pub struct PeerConfig {
    pub local_address: IpAddr,
    /// Port to bind; 0 picks an ephemeral port.
    pub port: u16,
    pub maximum_connections: usize,
    pub accept_incoming_connections: bool,
    /// Starting datagram budget per connection. MTU expansion can grow the
    /// effective value past this, never beyond [`PROTOCOL_MAX_MTU`].
    pub maximum_transmission_unit: usize,
    pub auto_expand_mtu: bool,
    /// Interval between MTU probe attempts.
    pub expand_mtu_frequency: Duration,
    /// Probe send failures tolerated before the probe finalizes.
    pub expand_mtu_fail_attempts: u32,
    pub ping_interval: Duration,
    pub connection_timeout: Duration,
    pub receive_buffer_size: usize,
    pub send_buffer_size: usize,
    pub use_message_recycling: bool,
    pub recycled_cache_max_count: usize,
    /// When set, sends are pushed onto the wire during the same command
    /// instead of waiting for the next heartbeat.
    pub auto_flush_send_queue: bool,
    /// Accept an encrypted payload channel when the remote negotiates one.
    pub enable_encryption: bool,
    /// Initiate key agreement on connections this peer accepts.
    pub negotiate_encryption: bool,
    /// Which event categories are released to the application queue.
    pub enabled_incoming_kinds: IncomingKinds,
    pub handshake_max_attempts: u32,
    pub handshake_resend_interval: Duration,
    /// Turns a negotiated shared secret into a payload cipher. The concrete
    /// cipher is supplied by the application.
    pub cipher_factory: Option<Arc<dyn CipherFactory>>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            local_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            maximum_connections: 32,
            accept_incoming_connections: false,
            maximum_transmission_unit: 1408,
            auto_expand_mtu: false,
            expand_mtu_frequency: Duration::from_secs(2),
            expand_mtu_fail_attempts: 5,
            ping_interval: Duration::from_secs(4),
            connection_timeout: Duration::from_secs(25),
            receive_buffer_size: 131_071,
            send_buffer_size: 131_071,
            use_message_recycling: true,
            recycled_cache_max_count: 64,
            auto_flush_send_queue: true,
            enable_encryption: false,
            negotiate_encryption: false,
            enabled_incoming_kinds: IncomingKinds::STATUS_CHANGED
                | IncomingKinds::DATA
                | IncomingKinds::ERROR,
            handshake_max_attempts: 5,
            handshake_resend_interval: Duration::from_secs(3),
            cipher_factory: None,
        }
    }
}

impl PeerConfig {
    /// Validates the configuration. Any error here is fatal to peer start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MINIMUM_MTU..=PROTOCOL_MAX_MTU).contains(&self.maximum_transmission_unit) {
            return Err(ConfigError::InvalidMtu(self.maximum_transmission_unit));
        }
        if self.receive_buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize("receive"));
        }
        if self.send_buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize("send"));
        }
        if self.maximum_connections == 0 {
            return Err(ConfigError::InvalidConnectionLimit);
        }
        if self.ping_interval.is_zero() || self.ping_interval >= self.connection_timeout {
            return Err(ConfigError::InvalidPingInterval);
        }
        if (self.negotiate_encryption || self.enable_encryption) && self.cipher_factory.is_none() {
            return Err(ConfigError::MissingCipherFactory);
        }
        Ok(())
    }
}

impl std::fmt::Debug for PeerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConfig")
            .field("local_address", &self.local_address)
            .field("port", &self.port)
            .field("maximum_connections", &self.maximum_connections)
            .field(
                "accept_incoming_connections",
                &self.accept_incoming_connections,
            )
            .field(
                "maximum_transmission_unit",
                &self.maximum_transmission_unit,
            )
            .field("auto_expand_mtu", &self.auto_expand_mtu)
            .field("ping_interval", &self.ping_interval)
            .field("connection_timeout", &self.connection_timeout)
            .field("enable_encryption", &self.enable_encryption)
            .field("negotiate_encryption", &self.negotiate_encryption)
            .field("has_cipher_factory", &self.cipher_factory.is_some())
            .finish_non_exhaustive()
    }
}
