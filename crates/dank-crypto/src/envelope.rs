//! Envelope codec.
//!
//! Sealing: sign the message with the sender's identity key, wrap it as a
//! [`PlaintextPayload`], derive the shared secret from a fresh ephemeral key
//! and the recipient's identity key, encrypt, and publish under the blind
//! search index.
//!
//! Opening is the reverse and is attempted for many candidates during a scan,
//! most of which are not addressed to us. Those outcomes are classified by
//! [`EnvelopeError::is_not_for_us`].

use secp256k1::PublicKey;

use crate::aead::{self, AeadError, IV_LEN};
use crate::ecdh::SharedSecret;
use crate::keys::{public_key_hex, EphemeralKeyPair, IdentityKeyPair, KeyError};
use crate::payload::{PayloadError, PlaintextPayload};
use crate::signing::{recover_signer, sign_message, verify, SignatureError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Aead(#[from] AeadError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] PayloadError),
}

impl EnvelopeError {
    /// True for the failures that mean "this candidate is not a message for
    /// us": invalid point, tag mismatch, bad signature, unparseable payload.
    pub fn is_not_for_us(&self) -> bool {
        match self {
            EnvelopeError::Key(KeyError::InvalidPoint) => true,
            EnvelopeError::Key(_) => false,
            EnvelopeError::Aead(AeadError::DecryptionFailed | AeadError::InvalidIv(_)) => true,
            EnvelopeError::Aead(_) => false,
            EnvelopeError::Signature(_) => true,
            EnvelopeError::MalformedPayload(_) => true,
        }
    }
}

/// What gets published to the relay for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub ephemeral_pubkey: PublicKey,
    pub search_index: [u8; 32],
}

impl Envelope {
    pub fn ephemeral_pubkey_hex(&self) -> String {
        public_key_hex(&self.ephemeral_pubkey)
    }

    pub fn search_index_hex(&self) -> String {
        hex::encode(self.search_index)
    }

    pub fn iv_hex(&self) -> String {
        hex::encode(self.iv)
    }
}

/// A decrypted and signature-checked message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedMessage {
    /// Recovered from the inner signature; unrelated to the ephemeral key.
    pub sender: PublicKey,
    pub message: String,
}

impl OpenedMessage {
    pub fn sender_hex(&self) -> String {
        public_key_hex(&self.sender)
    }
}

/// Build the envelope for `message` from `sender` to `recipient`.
///
/// The ephemeral keypair is consumed; its private half is erased once the
/// shared secret has been derived.
pub fn pack_outgoing(
    message: &str,
    sender: &IdentityKeyPair,
    ephemeral: EphemeralKeyPair,
    recipient: &PublicKey,
) -> Result<Envelope, EnvelopeError> {
    let signature = sign_message(message.as_bytes(), sender.secret_key());
    let payload = PlaintextPayload::new(signature, message).encode();

    let (ephemeral_pubkey, secret) = ephemeral.derive_shared_secret(recipient);
    let key = aead::derive_symmetric_key(&secret)?;
    let sealed = aead::encrypt(payload.as_bytes(), &key)?;

    Ok(Envelope {
        ciphertext: sealed.ciphertext,
        iv: sealed.iv,
        ephemeral_pubkey,
        search_index: secret.search_index(),
    })
}

/// Decrypt and authenticate one ciphertext under a candidate shared secret.
///
/// The signer is recovered from the signature and then cross-checked with a
/// plain verification against the recovered key.
pub fn open_incoming(ciphertext: &[u8], iv: &[u8], secret: &SharedSecret) -> Result<OpenedMessage, EnvelopeError> {
    let key = aead::derive_symmetric_key(secret)?;
    let plaintext = aead::decrypt(ciphertext, iv, &key)?;
    let payload = PlaintextPayload::decode_bytes(&plaintext)?;

    let sender = recover_signer(payload.message.as_bytes(), &payload.signature)?;
    verify(payload.message.as_bytes(), &payload.signature, &sender)?;

    Ok(OpenedMessage {
        sender,
        message: payload.message,
    })
}

/// [`open_incoming`] with every failure collapsed to `None`.
pub fn unpack_incoming(ciphertext: &[u8], iv: &[u8], secret: &SharedSecret) -> Option<OpenedMessage> {
    match open_incoming(ciphertext, iv, secret) {
        Ok(opened) => Some(opened),
        Err(e) => {
            tracing::trace!(error = %e, "candidate ciphertext rejected");
            None
        }
    }
}

/// Receiver-side convenience: derive the secret from our identity and the
/// envelope's ephemeral key, then open.
pub fn open_envelope(envelope: &Envelope, recipient: &IdentityKeyPair) -> Result<OpenedMessage, EnvelopeError> {
    let secret = recipient.shared_secret(&envelope.ephemeral_pubkey);
    open_incoming(&envelope.ciphertext, &envelope.iv, &secret)
}
