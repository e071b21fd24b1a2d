use num_bigint::BigUint;
use num_traits::One;
use rand::{CryptoRng, RngCore};
use squall_wire::{BitBuffer, WireError};
use thiserror::Error;

/// 1024-bit MODP group from RFC 2409 (Oakley group 2), generator 2.
const MODP_1024_HEX: &[u8] = b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08\
8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7EDEE386BFB\
5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF";

const PRIVATE_KEY_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("peer public value outside the valid group range")]
    InvalidPublicValue,
    #[error("key derivation failed: {0}")]
    Derivation(String),
}

/// Symmetric payload cipher derived from the agreed shared secret.
///
/// The transport only consumes this capability; concrete ciphers are
/// supplied by the application through a [`CipherFactory`].
pub trait PayloadCipher: Send {
    fn encrypt(&mut self, plain: &[u8]) -> Vec<u8>;
    /// Returns `None` when the ciphertext does not authenticate/decode; the
    /// transport drops such messages.
    fn decrypt(&mut self, cipher: &[u8]) -> Option<Vec<u8>>;
}

/// Builds a [`PayloadCipher`] from the Diffie-Hellman shared secret.
pub trait CipherFactory: Send + Sync {
    fn derive(&self, shared_secret: &[u8]) -> Result<Box<dyn PayloadCipher>, CipherError>;
}

fn standard_prime() -> BigUint {
    BigUint::parse_bytes(MODP_1024_HEX, 16).expect("well-known prime parses")
}

/// Diffie-Hellman state for one connection's key agreement.
///
/// The requesting side generates over the standard group and sends
/// `(P, G, public)`; the responding side reuses the received parameters.
/// Private exponents are 256 bits from a cryptographic RNG.
pub struct KeyExchange {
    prime: BigUint,
    generator: BigUint,
    private_key: BigUint,
    public_key: BigUint,
}

impl KeyExchange {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::with_group(standard_prime(), BigUint::from(2u32), rng)
    }

    pub fn with_group<R: RngCore + CryptoRng>(
        prime: BigUint,
        generator: BigUint,
        rng: &mut R,
    ) -> Self {
        let mut secret = [0u8; PRIVATE_KEY_BYTES];
        rng.fill_bytes(&mut secret);
        // Force the exponent nonzero.
        secret[PRIVATE_KEY_BYTES - 1] |= 1;
        let private_key = BigUint::from_bytes_be(&secret);
        let public_key = generator.modpow(&private_key, &prime);
        Self {
            prime,
            generator,
            private_key,
            public_key,
        }
    }

    pub fn prime(&self) -> &BigUint {
        &self.prime
    }

    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    pub fn public_value(&self) -> &BigUint {
        &self.public_key
    }

    /// Derives the shared secret from the peer's public value.
    pub fn shared_secret(&self, peer_public: &BigUint) -> Result<Vec<u8>, CipherError> {
        let one = BigUint::one();
        if peer_public <= &one || *peer_public >= self.prime.clone() - &one {
            return Err(CipherError::InvalidPublicValue);
        }
        Ok(peer_public.modpow(&self.private_key, &self.prime).to_bytes_be())
    }
}

impl std::fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchange")
            .field("prime_bits", &self.prime.bits())
            .field("generator", &self.generator)
            .finish_non_exhaustive()
    }
}

/// Writes a big integer as a length-prefixed byte string in two's-complement
/// big-endian form. Values are nonnegative, so a leading zero byte is added
/// when the top bit is set.
pub(crate) fn write_big_uint(buf: &mut BitBuffer, value: &BigUint) {
    let bytes = value.to_bytes_be();
    if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        let mut padded = Vec::with_capacity(bytes.len() + 1);
        padded.push(0);
        padded.extend_from_slice(&bytes);
        buf.write_bytes_prefixed(&padded);
    } else {
        buf.write_bytes_prefixed(&bytes);
    }
}

pub(crate) fn read_big_uint(buf: &mut BitBuffer) -> Result<BigUint, WireError> {
    let bytes = buf.read_bytes_prefixed()?;
    Ok(BigUint::from_bytes_be(&bytes))
}
