//! AES-256-GCM sealing of plaintext payloads.
//!
//! Every call to [`encrypt`] draws a fresh random 96-bit IV which travels
//! with the ciphertext. The key is derived from the ECDH secret with
//! HKDF-SHA256 so that it is independent of the public search index, which
//! is itself SHA-256 of the same secret.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::ecdh::SharedSecret;

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const KEY_INFO: &[u8] = b"dankchat/aes-256-gcm/v1";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AeadError {
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("invalid iv length: expected 12, got {0}")]
    InvalidIv(usize),
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("random number generator unavailable")]
    Rng,
}

/// AES-256 key bound to one shared secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Ciphertext (with appended GCM tag) plus the IV it was sealed under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
}

/// Deterministic, one-way key derivation: both parties holding the same
/// ECDH secret obtain the same key without further negotiation.
pub fn derive_symmetric_key(secret: &SharedSecret) -> Result<SymmetricKey, AeadError> {
    let hk = Hkdf::<Sha256>::new(None, secret.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(KEY_INFO, &mut key)
        .map_err(|_| AeadError::KeyDerivation)?;
    Ok(SymmetricKey(key))
}

pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> Result<Sealed, AeadError> {
    let mut iv = [0u8; IV_LEN];
    getrandom::getrandom(&mut iv).map_err(|_| AeadError::Rng)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| AeadError::EncryptionFailed)?;

    Ok(Sealed { ciphertext, iv })
}

/// Open a ciphertext. A wrong key or any tampering fails the tag check with
/// [`AeadError::DecryptionFailed`]; while scanning this is the common case.
pub fn decrypt(ciphertext: &[u8], iv: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, AeadError> {
    if iv.len() != IV_LEN {
        return Err(AeadError::InvalidIv(iv.len()));
    }
    if ciphertext.len() < TAG_LEN {
        return Err(AeadError::DecryptionFailed);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| AeadError::DecryptionFailed)
}
