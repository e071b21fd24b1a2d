use crate::message::{FragmentInfo, IncomingMessage, OutgoingMessage};
use crate::small_map::SmallMap;
use squall_wire::ChunkBits;
use squall_wire::buffer::var_u64_len;
use squall_wire::header::FRAME_HEADER_BYTES;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Incomplete reassemblies older than this are discarded, which also guards
/// group-id reuse after the 65535 -> 1 wrap.
pub const REASSEMBLY_TTL: Duration = Duration::from_secs(30);

/// Upper bound on a reassembled message; larger groups are rejected.
pub const MAX_ASSEMBLED_BYTES: usize = 8 * 1024 * 1024;

/// Advances the process-wide fragment group counter: monotically increasing
/// modulo 65535, wrapping to 1, never 0.
pub fn next_group(counter: &mut u16) -> u16 {
    *counter = if *counter >= u16::MAX { 1 } else { *counter + 1 };
    *counter
}

/// Largest chunk payload such that header plus fragment descriptor plus
/// chunk still fits the MTU.
pub fn best_chunk_size(group: u16, total_bytes: usize, mtu: usize) -> usize {
    let overhead = |chunk: usize| {
        let chunks = total_bytes.div_ceil(chunk.max(1));
        FRAME_HEADER_BYTES
            + var_u64_len(group as u64)
            + var_u64_len(total_bytes as u64 * 8)
            + var_u64_len(chunk as u64)
            + var_u64_len(chunks.saturating_sub(1) as u64)
    };

    let mut chunk = mtu.saturating_sub(overhead(mtu)).max(1);
    // The descriptor's varints shrink with the chunk size, so a couple of
    // refinement passes reach a fixpoint.
    for _ in 0..4 {
        if overhead(chunk) + chunk <= mtu || chunk == 1 {
            break;
        }
        chunk = mtu.saturating_sub(overhead(chunk)).max(1);
    }
    chunk
}

/// Splits an encoded payload into chunk envelopes sharing the same buffer.
pub fn split_into_chunks(
    data: Arc<Vec<u8>>,
    group: u16,
    mtu: usize,
) -> Vec<OutgoingMessage> {
    let total_bytes = data.len();
    let chunk_size = best_chunk_size(group, total_bytes, mtu);
    let count = total_bytes.div_ceil(chunk_size);

    let mut chunks = Vec::with_capacity(count);
    for number in 0..count {
        let offset = number * chunk_size;
        let len = chunk_size.min(total_bytes - offset);
        let info = FragmentInfo {
            group,
            total_bits: (total_bytes * 8) as u32,
            chunk_size: chunk_size as u32,
            chunk_number: number as u32,
        };
        chunks.push(OutgoingMessage::chunk(Arc::clone(&data), offset, len, info));
    }
    chunks
}

/// One in-progress reassembly.
#[derive(Debug)]
struct FragmentAssembly {
    total_bits: u32,
    chunk_size: u32,
    data: Vec<u8>,
    received: ChunkBits,
    last_activity: Instant,
}

/// Per-connection reassembly state, keyed by fragment group.
#[derive(Debug, Default)]
pub struct ReassemblyTable {
    groups: SmallMap<u16, FragmentAssembly>,
}

impl ReassemblyTable {
    pub fn new() -> Self {
        Self {
            groups: SmallMap::new(),
        }
    }

    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }

    /// Feeds one released chunk. Returns the assembled message once the
    /// group completes; malformed chunks are dropped with a warning.
    pub fn insert_chunk(
        &mut self,
        mut msg: IncomingMessage,
        now: Instant,
    ) -> Option<IncomingMessage> {
        let info = match FragmentInfo::read_from(&mut msg.buffer) {
            Ok(info) => info,
            Err(e) => {
                warn!("dropping chunk with malformed descriptor: {e}");
                return None;
            }
        };

        let total_bytes = (info.total_bits as usize).div_ceil(8);
        if info.group == 0
            || info.chunk_size == 0
            || total_bytes == 0
            || total_bytes > MAX_ASSEMBLED_BYTES
        {
            warn!(
                group = info.group,
                total_bytes, "dropping chunk with invalid descriptor"
            );
            return None;
        }
        let chunk_count = total_bytes.div_ceil(info.chunk_size as usize);
        if info.chunk_number as usize >= chunk_count {
            warn!(
                group = info.group,
                chunk = info.chunk_number,
                of = chunk_count,
                "dropping chunk beyond its group"
            );
            return None;
        }

        // A lingering record with a different shape is a stale group id
        // from a previous wrap; restart the group.
        if self
            .groups
            .get(&info.group)
            .is_some_and(|a| a.total_bits != info.total_bits || a.chunk_size != info.chunk_size)
        {
            trace!(group = info.group, "replacing stale reassembly record");
            self.groups.remove(&info.group);
        }

        if self.groups.get(&info.group).is_none() {
            self.groups.insert(
                info.group,
                FragmentAssembly {
                    total_bits: info.total_bits,
                    chunk_size: info.chunk_size,
                    data: vec![0; total_bytes],
                    received: ChunkBits::new(chunk_count),
                    last_activity: now,
                },
            );
        }
        let assembly = self
            .groups
            .get_mut(&info.group)
            .unwrap_or_else(|| unreachable!("group inserted above"));

        let offset = info.chunk_number as usize * info.chunk_size as usize;
        let expected = if info.chunk_number as usize == chunk_count - 1 {
            total_bytes - offset
        } else {
            info.chunk_size as usize
        };
        let chunk = match msg.buffer.read_bytes(expected) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(group = info.group, "dropping short chunk: {e}");
                return None;
            }
        };

        assembly.last_activity = now;
        if assembly.received.set(info.chunk_number as usize) {
            assembly.data[offset..offset + expected].copy_from_slice(&chunk);
        }

        if assembly.received.is_complete() {
            let assembly = self
                .groups
                .remove(&info.group)
                .unwrap_or_else(|| unreachable!("assembly checked above"));
            msg.fragment = false;
            msg.buffer = squall_wire::BitBuffer::from_vec(
                assembly.data,
                assembly.total_bits as usize,
            );
            return Some(msg);
        }
        None
    }

    /// Drops reassemblies that have been idle past [`REASSEMBLY_TTL`].
    pub fn sweep_expired(&mut self, now: Instant) {
        self.groups.retain(|group, assembly| {
            let keep =
                now.saturating_duration_since(assembly.last_activity) < REASSEMBLY_TTL;
            if !keep {
                trace!(group, "discarding expired reassembly");
            }
            keep
        });
    }
}
