use squall_wire::buffer::var_u64_len;
use squall_wire::header::FRAME_HEADER_BYTES;
use squall_wire::{BitBuffer, DeliveryMethod, FrameHeader, MessageKind, WireError};
use std::net::SocketAddr;
use std::sync::Arc;

/// Fragmentation descriptor carried at the start of a chunk payload as four
/// variable-length integers: `(group, total_bits, chunk_size, chunk_number)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentInfo {
    /// Group id, nonzero on the wire. Wraps 65535 -> 1.
    pub group: u16,
    /// Bit length of the pre-fragmentation payload.
    pub total_bits: u32,
    /// Byte size of every chunk except possibly the last.
    pub chunk_size: u32,
    pub chunk_number: u32,
}

impl FragmentInfo {
    pub fn encoded_len(&self) -> usize {
        var_u64_len(self.group as u64)
            + var_u64_len(self.total_bits as u64)
            + var_u64_len(self.chunk_size as u64)
            + var_u64_len(self.chunk_number as u64)
    }

    pub fn write_to(&self, out: &mut BitBuffer) {
        out.write_var_u32(self.group as u32);
        out.write_var_u32(self.total_bits);
        out.write_var_u32(self.chunk_size);
        out.write_var_u32(self.chunk_number);
    }

    pub fn read_from(buf: &mut BitBuffer) -> Result<Self, WireError> {
        let group = buf.read_var_u32()?;
        let total_bits = buf.read_var_u32()?;
        let chunk_size = buf.read_var_u32()?;
        let chunk_number = buf.read_var_u32()?;
        Ok(Self {
            group: (group & 0xFFFF) as u16,
            total_bits,
            chunk_size,
            chunk_number,
        })
    }
}

/// Payload storage of an outgoing message.
///
/// Fragment chunks of one logical message share the encrypted/encoded parent
/// buffer through an `Arc`; only the chunk envelopes are pooled, the shared
/// buffer is freed when the last chunk releases it.
#[derive(Debug)]
pub enum OutgoingBody {
    Inline(BitBuffer),
    Chunk {
        data: Arc<Vec<u8>>,
        offset: usize,
        len: usize,
    },
}

/// An outgoing message envelope, owned by a sender channel until
/// acknowledged (reliable) or written (unreliable).
#[derive(Debug)]
pub struct OutgoingMessage {
    pub body: OutgoingBody,
    pub fragment: Option<FragmentInfo>,
    /// Assigned by the sender channel when the message enters the window.
    pub sequence: u16,
}

impl OutgoingMessage {
    pub fn inline(buffer: BitBuffer) -> Self {
        Self {
            body: OutgoingBody::Inline(buffer),
            fragment: None,
            sequence: 0,
        }
    }

    pub fn chunk(data: Arc<Vec<u8>>, offset: usize, len: usize, info: FragmentInfo) -> Self {
        Self {
            body: OutgoingBody::Chunk { data, offset, len },
            fragment: Some(info),
            sequence: 0,
        }
    }

    pub fn payload_bits(&self) -> usize {
        match &self.body {
            OutgoingBody::Inline(buf) => buf.bit_length(),
            OutgoingBody::Chunk { len, .. } => {
                let info = self.fragment.as_ref().map_or(0, |f| f.encoded_len());
                (info + len) * 8
            }
        }
    }

    /// Full on-wire size of the message, header included.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_BYTES + self.payload_bits().div_ceil(8)
    }

    /// Appends the framed message to a datagram under construction.
    pub fn write_frame(&self, kind: u8, out: &mut Vec<u8>) {
        let header = FrameHeader {
            kind,
            sequence: self.sequence,
            fragment: self.fragment.is_some(),
            payload_bits: self.payload_bits() as u16,
        };
        header.encode(out);
        match &self.body {
            OutgoingBody::Inline(buf) => out.extend_from_slice(buf.as_bytes()),
            OutgoingBody::Chunk { data, offset, len } => {
                let mut scratch = BitBuffer::with_capacity(16);
                if let Some(info) = &self.fragment {
                    info.write_to(&mut scratch);
                }
                out.extend_from_slice(scratch.as_bytes());
                out.extend_from_slice(&data[*offset..*offset + *len]);
            }
        }
    }
}

/// An inbound message envelope, surfaced to the application through the
/// `Data` event once its channel releases it.
#[derive(Debug)]
pub struct IncomingMessage {
    pub(crate) kind: u8,
    pub(crate) sequence: u16,
    pub(crate) fragment: bool,
    pub(crate) buffer: BitBuffer,
    pub(crate) sender: SocketAddr,
    pub(crate) sender_id: u64,
    pub(crate) recycled: bool,
}

impl IncomingMessage {
    pub fn new(
        header: &FrameHeader,
        buffer: BitBuffer,
        sender: SocketAddr,
        sender_id: u64,
    ) -> Self {
        Self {
            kind: header.kind,
            sequence: header.sequence,
            fragment: header.fragment,
            buffer,
            sender,
            sender_id,
            recycled: false,
        }
    }

    pub fn sender(&self) -> SocketAddr {
        self.sender
    }

    pub fn sender_id(&self) -> u64 {
        self.sender_id
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// True while the payload is still a fragment chunk.
    pub fn is_fragment(&self) -> bool {
        self.fragment
    }

    /// The delivery method and channel index this message arrived on.
    pub fn delivery(&self) -> Option<(DeliveryMethod, u8)> {
        match MessageKind::from_byte(self.kind) {
            Ok(MessageKind::User(method, channel)) => Some((method, channel)),
            _ => None,
        }
    }

    /// Payload bytes. The read cursor in [`Self::reader`] is unaffected.
    pub fn data(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    /// Bit-granular reader over the payload.
    pub fn reader(&mut self) -> &mut BitBuffer {
        &mut self.buffer
    }
}
