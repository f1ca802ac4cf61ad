//! JSON bodies exchanged with the relay.
//!
//! Ciphertext is standard base64; keys, indices and IVs are lowercase hex;
//! timestamps are RFC 3339 UTC with millisecond precision.

use base64::Engine as _;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use dank_crypto::aead::IV_LEN;
use dank_crypto::Envelope;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("invalid base64 in {0}")]
    Base64(&'static str),
    #[error("invalid hex in {0}")]
    Hex(&'static str),
    #[error("invalid length for {field}: expected {expected} bytes, got {got}")]
    Length {
        field: &'static str,
        expected: usize,
        got: usize,
    },
}

/// Body of `POST /messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMessageRequest {
    /// Base64 ciphertext (GCM tag appended).
    pub message: String,
    pub iv: String,
    pub ephemeral_pubkey: String,
    pub search_index: String,
}

impl From<&Envelope> for PublishMessageRequest {
    fn from(env: &Envelope) -> Self {
        Self {
            message: base64::engine::general_purpose::STANDARD.encode(&env.ciphertext),
            iv: env.iv_hex(),
            ephemeral_pubkey: env.ephemeral_pubkey_hex(),
            search_index: env.search_index_hex(),
        }
    }
}

impl PublishMessageRequest {
    pub fn ciphertext(&self) -> Result<Vec<u8>, WireError> {
        decode_base64(&self.message, "message")
    }

    pub fn iv_bytes(&self) -> Result<[u8; IV_LEN], WireError> {
        decode_hex_array(&self.iv, "iv")
    }

    pub fn search_index_bytes(&self) -> Result<[u8; 32], WireError> {
        decode_hex_array(&self.search_index, "search_index")
    }

    pub fn ephemeral_pubkey_bytes(&self) -> Result<[u8; 64], WireError> {
        decode_hex_array(&self.ephemeral_pubkey, "ephemeral_pubkey")
    }
}

/// One element of `GET /keys`.
///
/// Accepts both the bare hex string older relays return and the
/// `{ ephemeral_pubkey, submit_time }` object. Bare entries have no submit
/// time, so a listing made of them cannot be paged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "KeyEntry")]
pub struct PublishedKey {
    pub ephemeral_pubkey: String,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "rfc3339_millis_opt::serialize")]
    pub submit_time: Option<DateTime<Utc>>,
}

impl PublishedKey {
    pub fn new(ephemeral_pubkey: impl Into<String>, submit_time: DateTime<Utc>) -> Self {
        Self {
            ephemeral_pubkey: ephemeral_pubkey.into(),
            submit_time: Some(submit_time),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyEntry {
    Bare(String),
    Dated {
        ephemeral_pubkey: String,
        #[serde(default, with = "rfc3339_millis_opt")]
        submit_time: Option<DateTime<Utc>>,
    },
}

impl From<KeyEntry> for PublishedKey {
    fn from(entry: KeyEntry) -> Self {
        match entry {
            KeyEntry::Bare(ephemeral_pubkey) => Self {
                ephemeral_pubkey,
                submit_time: None,
            },
            KeyEntry::Dated {
                ephemeral_pubkey,
                submit_time,
            } => Self {
                ephemeral_pubkey,
                submit_time,
            },
        }
    }
}

/// One element of `GET /messages/{index}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message: String,
    /// Absent on entries written by clients that predate per-message IVs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(with = "rfc3339_millis")]
    pub submit_time: DateTime<Utc>,
}

impl StoredMessage {
    pub fn ciphertext(&self) -> Result<Vec<u8>, WireError> {
        decode_base64(&self.message, "message")
    }

    pub fn iv_bytes(&self) -> Result<Option<[u8; IV_LEN]>, WireError> {
        self.iv.as_deref().map(|iv| decode_hex_array(iv, "iv")).transpose()
    }
}

/// Truncate to the millisecond precision timestamps carry on the wire.
pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(ts)
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn decode_base64(s: &str, field: &'static str) -> Result<Vec<u8>, WireError> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|_| WireError::Base64(field))
}

fn decode_hex_array<const N: usize>(s: &str, field: &'static str) -> Result<[u8; N], WireError> {
    let bytes = hex::decode(s).map_err(|_| WireError::Hex(field))?;
    let got = bytes.len();
    bytes.try_into().map_err(|_| WireError::Length {
        field,
        expected: N,
        got,
    })
}

pub mod rfc3339_millis {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid RFC 3339 timestamp: {raw}")))
    }
}

pub mod rfc3339_millis_opt {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => super::rfc3339_millis::serialize(ts, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) => super::parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid RFC 3339 timestamp: {raw}"))),
            None => Ok(None),
        }
    }
}
