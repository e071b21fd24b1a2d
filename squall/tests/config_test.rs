use squall::error::ConfigError;
use squall::handshake::{CipherError, CipherFactory, PayloadCipher};
use squall::{IncomingKinds, PeerConfig};
use std::sync::Arc;
use std::time::Duration;

struct NullFactory;

impl CipherFactory for NullFactory {
    fn derive(&self, _secret: &[u8]) -> Result<Box<dyn PayloadCipher>, CipherError> {
        Err(CipherError::Derivation("test factory".into()))
    }
}

#[test]
fn test_default_config_is_valid() {
    assert_eq!(PeerConfig::default().validate(), Ok(()));
}

#[test]
fn test_invalid_mtu_rejected() {
    let mut config = PeerConfig::default();
    config.maximum_transmission_unit = 64;
    assert_eq!(config.validate(), Err(ConfigError::InvalidMtu(64)));

    config.maximum_transmission_unit = 20_000;
    assert_eq!(config.validate(), Err(ConfigError::InvalidMtu(20_000)));
}

#[test]
fn test_zero_buffers_rejected() {
    let mut config = PeerConfig::default();
    config.receive_buffer_size = 0;
    assert_eq!(
        config.validate(),
        Err(ConfigError::InvalidBufferSize("receive"))
    );

    let mut config = PeerConfig::default();
    config.send_buffer_size = 0;
    assert_eq!(config.validate(), Err(ConfigError::InvalidBufferSize("send")));
}

#[test]
fn test_zero_connections_rejected() {
    let mut config = PeerConfig::default();
    config.maximum_connections = 0;
    assert_eq!(config.validate(), Err(ConfigError::InvalidConnectionLimit));
}

#[test]
fn test_ping_must_undercut_timeout() {
    let mut config = PeerConfig::default();
    config.ping_interval = Duration::from_secs(30);
    config.connection_timeout = Duration::from_secs(25);
    assert_eq!(config.validate(), Err(ConfigError::InvalidPingInterval));

    let mut config = PeerConfig::default();
    config.ping_interval = Duration::ZERO;
    assert_eq!(config.validate(), Err(ConfigError::InvalidPingInterval));
}

#[test]
fn test_negotiation_requires_cipher_factory() {
    let mut config = PeerConfig::default();
    config.negotiate_encryption = true;
    assert_eq!(config.validate(), Err(ConfigError::MissingCipherFactory));

    config.cipher_factory = Some(Arc::new(NullFactory));
    assert_eq!(config.validate(), Ok(()));
}

#[test]
fn test_default_event_mask() {
    let config = PeerConfig::default();
    assert!(config.enabled_incoming_kinds.contains(IncomingKinds::DATA));
    assert!(
        config
            .enabled_incoming_kinds
            .contains(IncomingKinds::STATUS_CHANGED)
    );
    assert!(
        !config
            .enabled_incoming_kinds
            .contains(IncomingKinds::DISCOVERY_REQUEST)
    );
}
