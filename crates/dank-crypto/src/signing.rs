//! Recoverable ECDSA signatures over Keccak-256 message hashes.
//!
//! Signatures are 65 bytes `r(32) || s(32) || recovery_id(1)` and travel as
//! 130 lowercase hex chars inside the encrypted payload. The recovered public
//! key is the authenticated sender identity.

use std::fmt;

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

use crate::hash::keccak256;
use crate::keys::parse_public_key;

pub const SIGNATURE_LEN: usize = 65;
pub const SIGNATURE_HEX_LEN: usize = SIGNATURE_LEN * 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed signature: {0}")]
    Malformed(&'static str),
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("public key recovery failed")]
    RecoveryFailed,
}

/// A 65-byte recoverable signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MessageSignature([u8; SIGNATURE_LEN]);

impl MessageSignature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        let arr: [u8; SIGNATURE_LEN] = bytes
            .try_into()
            .map_err(|_| SignatureError::Malformed("expected 65 bytes"))?;
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self, SignatureError> {
        if s.len() != SIGNATURE_HEX_LEN {
            return Err(SignatureError::Malformed("expected 130 hex chars"));
        }
        let bytes = hex::decode(s).map_err(|_| SignatureError::Malformed("invalid hex"))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    /// Raw recovery byte as carried on the wire.
    pub fn recovery_byte(&self) -> u8 {
        self.0[64]
    }

    fn to_recoverable(self) -> Result<RecoverableSignature, SignatureError> {
        // Some signers emit Ethereum-style v = 27/28
        let v = match self.0[64] {
            v @ 0..=3 => v,
            v @ 27..=30 => v - 27,
            _ => return Err(SignatureError::Malformed("recovery id out of range")),
        };
        let recid = RecoveryId::from_i32(i32::from(v))
            .map_err(|_| SignatureError::Malformed("recovery id out of range"))?;
        RecoverableSignature::from_compact(&self.0[..64], recid)
            .map_err(|_| SignatureError::Malformed("invalid r/s"))
    }
}

impl fmt::Debug for MessageSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageSignature({})", self.to_hex())
    }
}

fn message_digest(message: &[u8]) -> Message {
    Message::from_digest(keccak256(message))
}

/// Sign `keccak256(message)` with the identity key. Produces low-S signatures.
pub fn sign_message(message: &[u8], secret: &SecretKey) -> MessageSignature {
    let sig = SECP256K1.sign_ecdsa_recoverable(&message_digest(message), secret);
    let (recid, compact) = sig.serialize_compact();

    let mut out = [0u8; SIGNATURE_LEN];
    out[..64].copy_from_slice(&compact);
    // recovery ids are 0..=3
    out[64] = recid.to_i32() as u8;
    MessageSignature(out)
}

/// Recover the signer's public key from a message and its signature.
pub fn recover_signer(message: &[u8], signature: &MessageSignature) -> Result<PublicKey, SignatureError> {
    let sig = signature.to_recoverable()?;
    SECP256K1
        .recover_ecdsa(&message_digest(message), &sig)
        .map_err(|_| SignatureError::RecoveryFailed)
}

/// Hex-string form of [`recover_signer`].
pub fn recover_public_key(message: &[u8], signature_hex: &str) -> Result<PublicKey, SignatureError> {
    let signature = MessageSignature::from_hex(signature_hex)?;
    recover_signer(message, &signature)
}

/// Check `(r, s)` against `public_key`, independently of recovery.
pub fn verify(message: &[u8], signature: &MessageSignature, public_key: &PublicKey) -> Result<(), SignatureError> {
    let mut standard = signature.to_recoverable()?.to_standard();
    standard.normalize_s();
    SECP256K1
        .verify_ecdsa(&message_digest(message), &standard, public_key)
        .map_err(|_| SignatureError::SignatureInvalid)
}

/// Returns false for any malformed input as well as for a mismatch.
pub fn verify_signature(message: &[u8], signature_hex: &str, public_key_hex: &str) -> bool {
    let Ok(signature) = MessageSignature::from_hex(signature_hex) else {
        return false;
    };
    let Ok(public_key) = parse_public_key(public_key_hex) else {
        return false;
    };
    verify(message, &signature, &public_key).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_identity_keypair, public_key_hex};

    #[test]
    fn test_sign_recover_round_trip() {
        let alice = generate_identity_keypair();
        let sig = sign_message(b"hello", alice.secret_key());

        assert_eq!(sig.to_hex().len(), SIGNATURE_HEX_LEN);
        assert!(sig.recovery_byte() <= 3);

        let recovered = recover_public_key(b"hello", &sig.to_hex()).unwrap();
        assert_eq!(recovered, *alice.public_key());
    }

    #[test]
    fn test_verify_signature_hex() {
        let alice = generate_identity_keypair();
        let sig = sign_message(b"hello", alice.secret_key());

        assert!(verify_signature(b"hello", &sig.to_hex(), &alice.public_key_hex()));
        assert!(!verify_signature(b"hello!", &sig.to_hex(), &alice.public_key_hex()));
    }

    #[test]
    fn test_altered_message_breaks_binding() {
        let alice = generate_identity_keypair();
        let sig = sign_message(b"pay bob 1", alice.secret_key());

        assert!(!verify_signature(b"pay bob 9", &sig.to_hex(), &alice.public_key_hex()));
        match recover_public_key(b"pay bob 9", &sig.to_hex()) {
            Ok(pk) => assert_ne!(pk, *alice.public_key()),
            Err(_) => {}
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let alice = generate_identity_keypair();
        let mallory = generate_identity_keypair();
        let sig = sign_message(b"hello", alice.secret_key());

        assert_eq!(
            verify(b"hello", &sig, mallory.public_key()),
            Err(SignatureError::SignatureInvalid)
        );
    }

    #[test]
    fn test_ethereum_style_recovery_byte() {
        let alice = generate_identity_keypair();
        let sig = sign_message(b"hello", alice.secret_key());
        let mut bytes = *sig.as_bytes();
        bytes[64] += 27;
        let eth = MessageSignature::from_bytes(&bytes).unwrap();

        let recovered = recover_signer(b"hello", &eth).unwrap();
        assert_eq!(public_key_hex(&recovered), alice.public_key_hex());
    }

    #[test]
    fn test_malformed_signatures() {
        assert!(matches!(
            MessageSignature::from_hex("abcd"),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            MessageSignature::from_hex(&"zz".repeat(65)),
            Err(SignatureError::Malformed(_))
        ));

        let mut bad_v = [1u8; SIGNATURE_LEN];
        bad_v[64] = 9;
        let sig = MessageSignature::from_bytes(&bad_v).unwrap();
        assert!(matches!(
            recover_signer(b"x", &sig),
            Err(SignatureError::Malformed(_))
        ));
    }
}
