//! secp256k1 Diffie-Hellman.
//!
//! The shared secret is the 32-byte big-endian X coordinate of
//! `private * peer_public`, symmetric between the two halves of an exchange:
//! `(ephemeral_priv, identity_pub)` on the sender side yields the same bytes
//! as `(identity_priv, ephemeral_pub)` on the receiver side.

use std::fmt;

use secp256k1::{PublicKey, SecretKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hash::search_index;
use crate::keys::{parse_public_key, KeyError};

/// ECDH output. Never persisted; recomputed per message and per scan attempt.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The blind search index under which ciphertexts for this secret live.
    pub fn search_index(&self) -> [u8; 32] {
        search_index(self)
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// Point multiplication `secret * peer`, keeping the X coordinate.
pub fn derive_shared_secret(secret: &SecretKey, peer: &PublicKey) -> SharedSecret {
    let mut point = secp256k1::ecdh::shared_secret_point(peer, secret);
    let mut x = [0u8; 32];
    x.copy_from_slice(&point[..32]);
    point.zeroize();
    SharedSecret(x)
}

/// Like [`derive_shared_secret`] but takes the peer key in wire format.
///
/// Fails with [`KeyError::InvalidPoint`] when the peer key is not a curve
/// point; during scanning this is an expected "not ours" outcome.
pub fn derive_shared_secret_hex(secret: &SecretKey, peer_hex: &str) -> Result<SharedSecret, KeyError> {
    let peer = parse_public_key(peer_hex)?;
    Ok(derive_shared_secret(secret, &peer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_ephemeral_keypair, generate_identity_keypair};

    #[test]
    fn test_shared_secret_symmetry() {
        let bob = generate_identity_keypair();
        let eph = generate_ephemeral_keypair();
        let eph_pub = *eph.public_key();

        let (_, sender_side) = eph.derive_shared_secret(bob.public_key());
        let receiver_side = bob.shared_secret(&eph_pub);

        assert_eq!(sender_side, receiver_side);
        assert_eq!(sender_side.search_index(), receiver_side.search_index());
    }

    #[test]
    fn test_third_party_gets_different_secret() {
        let bob = generate_identity_keypair();
        let eve = generate_identity_keypair();
        let eph = generate_ephemeral_keypair();
        let eph_pub = *eph.public_key();

        let (_, sender_side) = eph.derive_shared_secret(bob.public_key());
        let eve_side = eve.shared_secret(&eph_pub);

        assert_ne!(sender_side, eve_side);
    }

    #[test]
    fn test_hex_derivation_rejects_invalid_point() {
        let bob = generate_identity_keypair();
        let garbage = "11".repeat(64);
        assert!(matches!(
            derive_shared_secret_hex(bob.secret_key(), &garbage),
            Err(KeyError::InvalidPoint)
        ));
    }
}
