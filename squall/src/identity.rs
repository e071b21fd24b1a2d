use rand::RngCore;
use sha2::{Digest, Sha256};
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

/// Derives the 64-bit peer identifier from the bound endpoint and a
/// hardware-address stand-in.
///
/// The id is `|first 8 bytes of SHA-256(endpoint-hash ‖ mac)|` interpreted
/// as a big-endian signed integer. Eight random bytes stand in for the MAC
/// address, which keeps ids distinct across peers on one host.
pub fn derive_peer_id(endpoint: &SocketAddr, rng: &mut dyn RngCore) -> u64 {
    let mut endpoint_hasher = std::hash::DefaultHasher::new();
    endpoint.hash(&mut endpoint_hasher);

    let mut mac = [0u8; 8];
    rng.fill_bytes(&mut mac);

    let mut hasher = Sha256::new();
    hasher.update(endpoint_hasher.finish().to_le_bytes());
    hasher.update(mac);
    let digest = hasher.finalize();

    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(head).unsigned_abs()
}
