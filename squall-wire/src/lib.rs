//! # Squall Wire
//!
//! The wire layer of the squall reliable-UDP transport.
//!
//! This crate owns everything that is visible on the wire and nothing that
//! requires a socket: the bit-granular message buffer, the 5-byte frame
//! header and its message-kind code points, sequence arithmetic modulo the
//! 1024-entry sequence space, and the bit vectors the reliability and
//! fragmentation engines build on.
//!
//! ## Framing
//!
//! Every message on the wire is a 5-byte header followed by a payload of
//! `ceil(payload_bits / 8)` bytes. Multiple messages are concatenated into a
//! single datagram; receivers loop while at least a header remains.

pub mod bitset;
pub mod buffer;
pub mod header;
pub mod sequence;

pub use bitset::{BitSet, ChunkBits};
pub use buffer::BitBuffer;
pub use header::{DeliveryMethod, FrameHeader, MessageKind, NUM_SEQUENCE_CHANNELS};
pub use sequence::{SEQUENCE_SPACE, relative_sequence};

use thiserror::Error;

/// Errors raised while encoding or decoding wire data.
///
/// Decode failures are recoverable by design: a malformed frame is logged
/// and dropped by the transport, it never tears down the peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("buffer ended before {needed} bits could be read")]
    UnexpectedEnd { needed: usize },
    #[error("variable-length integer exceeds 64 bits")]
    VarIntTooLong,
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("frame header truncated ({0} bytes)")]
    TruncatedHeader(usize),
    #[error("payload length {got} exceeds the {have} bytes remaining in the datagram")]
    PayloadBeyondDatagram { got: usize, have: usize },
}
