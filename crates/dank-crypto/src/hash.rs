use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::ecdh::SharedSecret;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    arr
}

/// Keccak-256 (the pre-standard SHA-3 variant) used as the signing prehash.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut h = Keccak256::new();
    h.update(data);
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    arr
}

/// Blind search index: SHA-256 over the raw shared secret bytes.
///
/// Sender and receiver compute this independently from their respective
/// halves of the ECDH exchange and obtain the same value.
pub fn search_index(secret: &SharedSecret) -> [u8; 32] {
    sha256(secret.as_bytes())
}
