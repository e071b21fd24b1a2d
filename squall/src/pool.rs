use crate::message::{IncomingMessage, OutgoingBody, OutgoingMessage};
use parking_lot::Mutex;
use squall_wire::BitBuffer;
use std::sync::Arc;
use tracing::trace;

/// Recycles payload buffers to keep the steady-state allocation rate near
/// zero.
///
/// The pool holds at most `recycled_cache_max_count` buffers; beyond that it
/// lets the allocator reclaim them. A disabled pool degrades to plain
/// allocation. Fragment chunks share their parent buffer through an `Arc`,
/// so only their envelopes pass through here and the shared buffer is never
/// pooled.
#[derive(Debug, Clone)]
pub struct MessagePool {
    inner: Option<Arc<PoolInner>>,
}

#[derive(Debug)]
struct PoolInner {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_count: usize,
}

impl MessagePool {
    pub fn new(enabled: bool, max_count: usize) -> Self {
        Self {
            inner: enabled.then(|| {
                Arc::new(PoolInner {
                    buffers: Mutex::new(Vec::new()),
                    max_count,
                })
            }),
        }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Takes a backing vector with at least `capacity` bytes of room,
    /// reusing a recycled one when available.
    pub fn take_vec(&self, capacity: usize) -> Vec<u8> {
        if let Some(inner) = &self.inner
            && let Some(mut buf) = inner.buffers.lock().pop()
        {
            buf.clear();
            buf.reserve(capacity);
            return buf;
        }
        Vec::with_capacity(capacity)
    }

    /// Builds a writable buffer over a pooled allocation.
    pub fn take_buffer(&self, capacity: usize) -> BitBuffer {
        BitBuffer::from_vec(self.take_vec(capacity), 0)
    }

    pub fn recycle_vec(&self, buf: Vec<u8>) {
        if let Some(inner) = &self.inner {
            let mut buffers = inner.buffers.lock();
            if buffers.len() < inner.max_count {
                buffers.push(buf);
            }
            // Over capacity: fall through and let the allocator take it.
        }
    }

    pub fn recycle_buffer(&self, buf: BitBuffer) {
        self.recycle_vec(buf.into_vec());
    }

    /// Returns an incoming envelope's buffer to the pool. Recycling an
    /// already-recycled envelope is a no-op.
    pub fn recycle_incoming(&self, msg: &mut IncomingMessage) {
        if msg.recycled {
            trace!("incoming message recycled twice");
            return;
        }
        msg.recycled = true;
        self.recycle_buffer(std::mem::take(&mut msg.buffer));
    }

    pub fn recycle_outgoing(&self, msg: OutgoingMessage) {
        match msg.body {
            OutgoingBody::Inline(buf) => self.recycle_buffer(buf),
            // Chunks only drop their reference; the shared buffer frees
            // itself with the last chunk.
            OutgoingBody::Chunk { .. } => {}
        }
    }
}
