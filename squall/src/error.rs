use thiserror::Error;

/// Fatal configuration problems, surfaced once at peer start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("maximum transmission unit {0} outside the supported range")]
    InvalidMtu(usize),
    #[error("{0} buffer size must be nonzero")]
    InvalidBufferSize(&'static str),
    #[error("maximum connections must be at least 1")]
    InvalidConnectionLimit,
    #[error("ping interval must be nonzero and shorter than the connection timeout")]
    InvalidPingInterval,
    #[error("encryption negotiation requires a cipher factory")]
    MissingCipherFactory,
}

/// Errors returned by the application-facing send and control calls.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("peer has shut down")]
    PeerShutDown,
    #[error("channel index {0} outside the sequenced channel range")]
    InvalidChannel(u8),
    #[error("message of {0} bytes exceeds the largest fragmentable payload")]
    MessageTooLarge(usize),
}

/// Errors raised while starting a peer.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("socket setup failed: {0}")]
    Io(#[from] std::io::Error),
}
