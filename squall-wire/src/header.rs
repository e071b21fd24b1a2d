use crate::WireError;

/// Number of sequenced sub-channels per user delivery method.
pub const NUM_SEQUENCE_CHANNELS: u8 = 32;

/// Bytes in the fixed frame header.
pub const FRAME_HEADER_BYTES: usize = 5;

const KIND_UNCONNECTED: u8 = 0;
const KIND_USER_UNRELIABLE: u8 = 1;
const KIND_USER_SEQUENCED: u8 = 2; // ..=33
const KIND_USER_RELIABLE_UNORDERED: u8 = 34;
const KIND_USER_RELIABLE_SEQUENCED: u8 = 35; // ..=66
const KIND_USER_RELIABLE_ORDERED: u8 = 67; // ..=98
const KIND_INTERNAL_BASE: u8 = 128;

/// Exclusive upper bound of the user message-kind band.
pub const USER_KIND_LIMIT: u8 = KIND_USER_RELIABLE_ORDERED + NUM_SEQUENCE_CHANNELS;

/// Ordering and retransmission policy for a user channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMethod {
    Unreliable,
    UnreliableSequenced,
    ReliableUnordered,
    ReliableSequenced,
    ReliableOrdered,
}

impl DeliveryMethod {
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            DeliveryMethod::ReliableUnordered
                | DeliveryMethod::ReliableSequenced
                | DeliveryMethod::ReliableOrdered
        )
    }

    /// Whether the method carries more than one sub-channel.
    pub fn is_multi_channel(self) -> bool {
        matches!(
            self,
            DeliveryMethod::UnreliableSequenced
                | DeliveryMethod::ReliableSequenced
                | DeliveryMethod::ReliableOrdered
        )
    }
}

/// Decoded form of the wire message-type byte.
///
/// The single byte encodes both the category and, for user channels, the
/// sequenced sub-channel index. Code points below 128 are user traffic,
/// 128 and above are transport-internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Library traffic outside any connection.
    Unconnected,
    User(DeliveryMethod, u8),
    Connect,
    ConnectResponse,
    ConnectionEstablished,
    Disconnect,
    Acknowledge,
    Ping,
    Pong,
    ExpandMtuRequest,
    ExpandMtuSuccess,
    Discovery,
    DiscoveryResponse,
    DiffieHellmanRequest,
    DiffieHellmanResponse,
}

impl MessageKind {
    pub fn to_byte(self) -> u8 {
        match self {
            MessageKind::Unconnected => KIND_UNCONNECTED,
            MessageKind::User(method, channel) => {
                debug_assert!(channel < NUM_SEQUENCE_CHANNELS);
                match method {
                    DeliveryMethod::Unreliable => KIND_USER_UNRELIABLE,
                    DeliveryMethod::UnreliableSequenced => KIND_USER_SEQUENCED + channel,
                    DeliveryMethod::ReliableUnordered => KIND_USER_RELIABLE_UNORDERED,
                    DeliveryMethod::ReliableSequenced => KIND_USER_RELIABLE_SEQUENCED + channel,
                    DeliveryMethod::ReliableOrdered => KIND_USER_RELIABLE_ORDERED + channel,
                }
            }
            MessageKind::Connect => KIND_INTERNAL_BASE,
            MessageKind::ConnectResponse => KIND_INTERNAL_BASE + 1,
            MessageKind::ConnectionEstablished => KIND_INTERNAL_BASE + 2,
            MessageKind::Disconnect => KIND_INTERNAL_BASE + 3,
            MessageKind::Acknowledge => KIND_INTERNAL_BASE + 4,
            MessageKind::Ping => KIND_INTERNAL_BASE + 5,
            MessageKind::Pong => KIND_INTERNAL_BASE + 6,
            MessageKind::ExpandMtuRequest => KIND_INTERNAL_BASE + 7,
            MessageKind::ExpandMtuSuccess => KIND_INTERNAL_BASE + 8,
            MessageKind::Discovery => KIND_INTERNAL_BASE + 9,
            MessageKind::DiscoveryResponse => KIND_INTERNAL_BASE + 10,
            MessageKind::DiffieHellmanRequest => KIND_INTERNAL_BASE + 11,
            MessageKind::DiffieHellmanResponse => KIND_INTERNAL_BASE + 12,
        }
    }

    pub fn from_byte(byte: u8) -> Result<MessageKind, WireError> {
        let kind = match byte {
            KIND_UNCONNECTED => MessageKind::Unconnected,
            KIND_USER_UNRELIABLE => MessageKind::User(DeliveryMethod::Unreliable, 0),
            b if (KIND_USER_SEQUENCED..KIND_USER_RELIABLE_UNORDERED).contains(&b) => {
                MessageKind::User(DeliveryMethod::UnreliableSequenced, b - KIND_USER_SEQUENCED)
            }
            KIND_USER_RELIABLE_UNORDERED => MessageKind::User(DeliveryMethod::ReliableUnordered, 0),
            b if (KIND_USER_RELIABLE_SEQUENCED..KIND_USER_RELIABLE_ORDERED).contains(&b) => {
                MessageKind::User(
                    DeliveryMethod::ReliableSequenced,
                    b - KIND_USER_RELIABLE_SEQUENCED,
                )
            }
            b if (KIND_USER_RELIABLE_ORDERED..USER_KIND_LIMIT).contains(&b) => MessageKind::User(
                DeliveryMethod::ReliableOrdered,
                b - KIND_USER_RELIABLE_ORDERED,
            ),
            b if b == KIND_INTERNAL_BASE => MessageKind::Connect,
            b if b == KIND_INTERNAL_BASE + 1 => MessageKind::ConnectResponse,
            b if b == KIND_INTERNAL_BASE + 2 => MessageKind::ConnectionEstablished,
            b if b == KIND_INTERNAL_BASE + 3 => MessageKind::Disconnect,
            b if b == KIND_INTERNAL_BASE + 4 => MessageKind::Acknowledge,
            b if b == KIND_INTERNAL_BASE + 5 => MessageKind::Ping,
            b if b == KIND_INTERNAL_BASE + 6 => MessageKind::Pong,
            b if b == KIND_INTERNAL_BASE + 7 => MessageKind::ExpandMtuRequest,
            b if b == KIND_INTERNAL_BASE + 8 => MessageKind::ExpandMtuSuccess,
            b if b == KIND_INTERNAL_BASE + 9 => MessageKind::Discovery,
            b if b == KIND_INTERNAL_BASE + 10 => MessageKind::DiscoveryResponse,
            b if b == KIND_INTERNAL_BASE + 11 => MessageKind::DiffieHellmanRequest,
            b if b == KIND_INTERNAL_BASE + 12 => MessageKind::DiffieHellmanResponse,
            other => return Err(WireError::UnknownKind(other)),
        };
        Ok(kind)
    }

    pub fn is_user(self) -> bool {
        matches!(self, MessageKind::User(..))
    }
}

/// The 5-byte header that precedes every message in a datagram.
///
/// Layout: byte 0 is the message kind; bytes 1-2 (little endian) carry the
/// fragment flag in the low bit and the 15-bit sequence number above it;
/// bytes 3-4 (little endian) are the payload length in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: u8,
    pub sequence: u16,
    pub fragment: bool,
    pub payload_bits: u16,
}

impl FrameHeader {
    pub fn new(kind: MessageKind, sequence: u16, fragment: bool, payload_bits: u16) -> Self {
        Self {
            kind: kind.to_byte(),
            sequence,
            fragment,
            payload_bits,
        }
    }

    pub fn payload_bytes(&self) -> usize {
        (self.payload_bits as usize).div_ceil(8)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.kind);
        let seq_field = ((self.sequence & 0x7FFF) << 1) | self.fragment as u16;
        out.extend_from_slice(&seq_field.to_le_bytes());
        out.extend_from_slice(&self.payload_bits.to_le_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Result<FrameHeader, WireError> {
        if bytes.len() < FRAME_HEADER_BYTES {
            return Err(WireError::TruncatedHeader(bytes.len()));
        }
        let seq_field = u16::from_le_bytes([bytes[1], bytes[2]]);
        let payload_bits = u16::from_le_bytes([bytes[3], bytes[4]]);
        Ok(FrameHeader {
            kind: bytes[0],
            sequence: seq_field >> 1,
            fragment: seq_field & 1 != 0,
            payload_bits,
        })
    }
}
