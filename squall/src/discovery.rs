use squall_wire::{BitBuffer, WireError};

/// Census data a responding peer prepends to its discovery response: how
/// many seats it has filled and how many it offers. The trailing blob is
/// opaque to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCensus {
    pub connections: u32,
    pub capacity: u32,
    pub payload: Vec<u8>,
}

pub(crate) fn encode_response(connections: u32, capacity: u32, payload: &[u8]) -> BitBuffer {
    let mut buf = BitBuffer::with_capacity(payload.len() + 8);
    buf.write_var_u32(connections);
    buf.write_var_u32(capacity);
    buf.write_bytes(payload);
    buf
}

/// Splits a discovery-response payload into census values and the opaque
/// application blob.
pub fn decode_response(payload: &[u8]) -> Result<PeerCensus, WireError> {
    let mut buf = BitBuffer::from_slice(payload);
    let connections = buf.read_var_u32()?;
    let capacity = buf.read_var_u32()?;
    let payload = buf.read_remaining_bytes()?;
    Ok(PeerCensus {
        connections,
        capacity,
        payload,
    })
}
