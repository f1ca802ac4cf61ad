//! The plaintext inside every ciphertext: `<signature hex> ": " <message>`.
//!
//! The signature is always exactly 130 hex chars, so parsing splits at a
//! fixed offset. The message itself may contain `": "`.

use crate::signing::{MessageSignature, SignatureError, SIGNATURE_HEX_LEN};

const SEPARATOR: &str = ": ";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload too short")]
    TooShort,
    #[error("missing separator after signature")]
    MissingSeparator,
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaintextPayload {
    pub signature: MessageSignature,
    pub message: String,
}

impl PlaintextPayload {
    pub fn new(signature: MessageSignature, message: impl Into<String>) -> Self {
        Self {
            signature,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(SIGNATURE_HEX_LEN + SEPARATOR.len() + self.message.len());
        out.push_str(&self.signature.to_hex());
        out.push_str(SEPARATOR);
        out.push_str(&self.message);
        out
    }

    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        let text = std::str::from_utf8(bytes).map_err(|_| PayloadError::NotUtf8)?;
        Self::decode(text)
    }

    pub fn decode(text: &str) -> Result<Self, PayloadError> {
        // get() also rejects a split inside a multi-byte char
        let sig_hex = text.get(..SIGNATURE_HEX_LEN).ok_or(PayloadError::TooShort)?;
        let message = text[SIGNATURE_HEX_LEN..]
            .strip_prefix(SEPARATOR)
            .ok_or(PayloadError::MissingSeparator)?;

        Ok(Self {
            signature: MessageSignature::from_hex(sig_hex)?,
            message: message.to_owned(),
        })
    }
}
