//! Identity and ephemeral secp256k1 keypairs.
//!
//! The identity keypair is created once at registration and its public half
//! is the user's durable address. Ephemeral keypairs are created per outgoing
//! message and consumed by the single ECDH derivation they exist for.

use std::fmt;

use secp256k1::rand::thread_rng;
use secp256k1::{PublicKey, SecretKey, SECP256K1};
use zeroize::Zeroizing;

use crate::ecdh::{derive_shared_secret, SharedSecret};

/// Hex length of a public key on the wire: X || Y, 64 bytes, no SEC1 prefix.
pub const PUBLIC_KEY_HEX_LEN: usize = 128;

/// Error type for key parsing and derivation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("public key is not a valid secp256k1 point")]
    InvalidPoint,
    #[error("invalid secret key")]
    InvalidSecretKey,
}

/// Parse a wire-format public key.
///
/// Accepts 128 hex chars (X || Y), optionally prefixed with `0x` and/or the
/// uncompressed SEC1 tag `04`. Fails with [`KeyError::InvalidPoint`] when the
/// coordinates are not on the curve.
pub fn parse_public_key(s: &str) -> Result<PublicKey, KeyError> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|_| KeyError::InvalidHex)?;

    let mut sec1 = [0u8; 65];
    match bytes.len() {
        64 => {
            sec1[0] = 0x04;
            sec1[1..].copy_from_slice(&bytes);
        }
        65 if bytes[0] == 0x04 => sec1.copy_from_slice(&bytes),
        got => return Err(KeyError::InvalidKeyLength { expected: 64, got }),
    }

    PublicKey::from_slice(&sec1).map_err(|_| KeyError::InvalidPoint)
}

/// Encode a public key in wire format (128 lowercase hex chars, X || Y).
pub fn public_key_hex(pk: &PublicKey) -> String {
    hex::encode(&pk.serialize_uncompressed()[1..])
}

/// The durable identity of a user.
///
/// The secret half never leaves the device; it is erased when dropped.
pub struct IdentityKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl IdentityKeyPair {
    /// Generate a new random identity.
    pub fn generate() -> Self {
        let (secret, public) = SECP256K1.generate_keypair(&mut thread_rng());
        Self { secret, public }
    }

    /// Rebuild an identity from its 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != 32 {
            return Err(KeyError::InvalidKeyLength {
                expected: 32,
                got: bytes.len(),
            });
        }
        let secret = SecretKey::from_slice(bytes).map_err(|_| KeyError::InvalidSecretKey)?;
        let public = PublicKey::from_secret_key_global(&secret);
        Ok(Self { secret, public })
    }

    /// Rebuild an identity from a hex-encoded secret (optionally `0x`-prefixed).
    pub fn from_secret_hex(s: &str) -> Result<Self, KeyError> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = Zeroizing::new(hex::decode(s).map_err(|_| KeyError::InvalidHex)?);
        Self::from_secret_bytes(&bytes)
    }

    /// Hex encoding of the secret scalar, for local persistence only.
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.secret.secret_bytes()))
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Wire-format address of this identity.
    pub fn public_key_hex(&self) -> String {
        public_key_hex(&self.public)
    }

    /// ECDH against a peer's public key (receiver side of a message).
    pub fn shared_secret(&self, peer: &PublicKey) -> SharedSecret {
        derive_shared_secret(&self.secret, peer)
    }
}

impl Drop for IdentityKeyPair {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// A single-use keypair for one outgoing message.
///
/// Deriving the shared secret consumes the pair, so the private half cannot
/// be reused or stored.
pub struct EphemeralKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let (secret, public) = SECP256K1.generate_keypair(&mut thread_rng());
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Sender side ECDH with the recipient's identity key. Consumes `self`.
    pub fn derive_shared_secret(mut self, recipient: &PublicKey) -> (PublicKey, SharedSecret) {
        let secret = derive_shared_secret(&self.secret, recipient);
        self.secret.non_secure_erase();
        (self.public, secret)
    }
}

impl Drop for EphemeralKeyPair {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &public_key_hex(&self.public))
            .finish_non_exhaustive()
    }
}

/// One-time identity generation at registration.
pub fn generate_identity_keypair() -> IdentityKeyPair {
    IdentityKeyPair::generate()
}

/// Fresh keypair for a single outgoing message.
pub fn generate_ephemeral_keypair() -> EphemeralKeyPair {
    EphemeralKeyPair::generate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_hex_is_128_chars() {
        let id = generate_identity_keypair();
        let hex = id.public_key_hex();
        assert_eq!(hex.len(), PUBLIC_KEY_HEX_LEN);
        assert_eq!(parse_public_key(&hex).unwrap(), *id.public_key());
    }

    #[test]
    fn test_parse_accepts_prefixes() {
        let id = generate_identity_keypair();
        let bare = id.public_key_hex();

        assert_eq!(parse_public_key(&format!("0x{bare}")).unwrap(), *id.public_key());
        assert_eq!(parse_public_key(&format!("04{bare}")).unwrap(), *id.public_key());
        assert_eq!(parse_public_key(&format!("0x04{bare}")).unwrap(), *id.public_key());
    }

    #[test]
    fn test_parse_rejects_off_curve_point() {
        // x = 0, y = 0 is not on secp256k1
        let zeros = "00".repeat(64);
        assert_eq!(parse_public_key(&zeros), Err(KeyError::InvalidPoint));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(parse_public_key("zz"), Err(KeyError::InvalidHex));
        assert_eq!(
            parse_public_key("0x1"),
            Err(KeyError::InvalidHex),
        );
        assert_eq!(
            parse_public_key(&"ab".repeat(32)),
            Err(KeyError::InvalidKeyLength { expected: 64, got: 32 })
        );
    }

    #[test]
    fn test_secret_hex_round_trip() {
        let id = generate_identity_keypair();
        let restored = IdentityKeyPair::from_secret_hex(&id.secret_hex()).unwrap();
        assert_eq!(restored.public_key(), id.public_key());
    }

    #[test]
    fn test_zero_secret_rejected() {
        let zero = [0u8; 32];
        assert_eq!(
            IdentityKeyPair::from_secret_bytes(&zero).unwrap_err(),
            KeyError::InvalidSecretKey
        );
    }

    #[test]
    fn test_ephemeral_keys_are_fresh() {
        let a = generate_ephemeral_keypair();
        let b = generate_ephemeral_keypair();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let id = generate_identity_keypair();
        let dbg = format!("{id:?}");
        assert!(!dbg.contains(id.secret_hex().as_str()));
    }
}
