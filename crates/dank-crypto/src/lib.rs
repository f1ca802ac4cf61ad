#![forbid(unsafe_code)]

pub mod hash;
pub mod keys;
pub mod ecdh;

pub mod aead;
pub mod signing;
pub mod payload;
pub mod envelope;

#[cfg(test)]
mod proptests;

pub use secp256k1::{PublicKey, SecretKey};

pub use ecdh::SharedSecret;
pub use envelope::{
    open_envelope, open_incoming, pack_outgoing, unpack_incoming, Envelope, EnvelopeError,
    OpenedMessage,
};
pub use keys::{
    generate_ephemeral_keypair, generate_identity_keypair, parse_public_key, public_key_hex,
    EphemeralKeyPair, IdentityKeyPair, KeyError,
};
