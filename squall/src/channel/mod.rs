pub mod receiver;
pub mod sender;

use crate::context::PeerContext;
use squall_wire::header::FRAME_HEADER_BYTES;
use squall_wire::{BitBuffer, FrameHeader, MessageKind};
use std::net::SocketAddr;

pub use receiver::ReceiverChannel;
pub use sender::SenderChannel;

/// Result of handing a message to a sender channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the connection's coalescing buffer.
    Sent,
    /// Queued for the next heartbeat.
    Queued,
    /// The connection is not in a connected state.
    FailedNotConnected,
    /// The encoded message exceeds the current MTU; the fragmentation
    /// engine should have pre-split it.
    Dropped,
}

/// Per-connection staging area packing messages into MTU-sized datagrams.
#[derive(Debug, Default)]
pub struct CoalesceBuffer {
    pub buf: Vec<u8>,
    pub messages: usize,
}

impl CoalesceBuffer {
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Writes frames for one connection, flushing a datagram whenever the next
/// frame would push the coalescing buffer past the MTU.
pub struct FrameSink<'a> {
    pub ctx: &'a mut PeerContext,
    coalesce: &'a mut CoalesceBuffer,
    remote: SocketAddr,
    mtu: usize,
}

impl<'a> FrameSink<'a> {
    pub fn new(
        ctx: &'a mut PeerContext,
        coalesce: &'a mut CoalesceBuffer,
        remote: SocketAddr,
        mtu: usize,
    ) -> Self {
        Self {
            ctx,
            coalesce,
            remote,
            mtu,
        }
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    fn make_room(&mut self, frame_len: usize) {
        if !self.coalesce.buf.is_empty() && self.coalesce.buf.len() + frame_len > self.mtu {
            self.flush();
        }
    }

    /// Appends a user message frame.
    pub fn write_message(&mut self, kind: u8, msg: &crate::message::OutgoingMessage) {
        self.make_room(msg.encoded_len());
        msg.write_frame(kind, &mut self.coalesce.buf);
        self.coalesce.messages += 1;
        self.ctx.stats.note_sent_message();
    }

    /// Appends an internal frame with an explicit payload.
    pub fn write_frame(&mut self, kind: MessageKind, sequence: u16, payload: &BitBuffer) {
        let frame_len = FRAME_HEADER_BYTES + payload.byte_length();
        self.make_room(frame_len);
        let header = FrameHeader::new(kind, sequence, false, payload.bit_length() as u16);
        header.encode(&mut self.coalesce.buf);
        self.coalesce.buf.extend_from_slice(payload.as_bytes());
        self.coalesce.messages += 1;
    }

    /// Emits the pending datagram, if any.
    pub fn flush(&mut self) {
        if !self.coalesce.buf.is_empty() {
            let payload = std::mem::take(&mut self.coalesce.buf);
            self.coalesce.messages = 0;
            self.ctx.send_datagram(self.remote, payload);
        }
    }
}
