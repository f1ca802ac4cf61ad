//! Name directory: human-readable names ↔ identity public keys.

use std::collections::HashMap;

use async_trait::async_trait;
use dank_crypto::{parse_public_key, public_key_hex, KeyError, PublicKey};

#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("invalid directory entry for {name}: {source}")]
    InvalidEntry { name: String, source: KeyError },
}

#[async_trait]
pub trait NameDirectory: Send + Sync {
    /// Public key registered for `name`, if any.
    async fn resolve_name(&self, name: &str) -> Result<Option<PublicKey>, DirectoryError>;

    /// Reverse lookup: a display name for `public_key`, if any.
    async fn resolve_public_key(&self, public_key: &PublicKey) -> Result<Option<String>, DirectoryError>;
}

/// Flat in-memory mapping, typically loaded from configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    by_name: HashMap<String, PublicKey>,
    by_key: HashMap<PublicKey, String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, public key hex)` pairs.
    pub fn from_entries<I, N, K>(entries: I) -> Result<Self, DirectoryError>
    where
        I: IntoIterator<Item = (N, K)>,
        N: Into<String>,
        K: AsRef<str>,
    {
        let mut dir = Self::new();
        for (name, key) in entries {
            let name = name.into();
            let pk = parse_public_key(key.as_ref()).map_err(|source| DirectoryError::InvalidEntry {
                name: name.clone(),
                source,
            })?;
            dir.insert(name, pk);
        }
        Ok(dir)
    }

    pub fn insert(&mut self, name: impl Into<String>, public_key: PublicKey) {
        let name = name.into();
        self.by_key.insert(public_key, name.clone());
        self.by_name.insert(name, public_key);
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[async_trait]
impl NameDirectory for StaticDirectory {
    async fn resolve_name(&self, name: &str) -> Result<Option<PublicKey>, DirectoryError> {
        Ok(self.by_name.get(name).copied())
    }

    async fn resolve_public_key(&self, public_key: &PublicKey) -> Result<Option<String>, DirectoryError> {
        Ok(self.by_key.get(public_key).cloned())
    }
}

/// Short form of an address: `0x` + first 4 and last 4 hex chars.
pub fn truncate_address(public_key_hex: &str) -> String {
    let hex = public_key_hex.strip_prefix("0x").unwrap_or(public_key_hex);
    match (hex.get(..4), hex.len().checked_sub(4).and_then(|start| hex.get(start..))) {
        (Some(head), Some(tail)) if hex.len() > 8 => format!("0x{head}...{tail}"),
        _ => format!("0x{hex}"),
    }
}

/// Directory name for `public_key`, or the truncated address when the
/// directory has none or cannot be reached.
pub async fn display_name_for(directory: &dyn NameDirectory, public_key: &PublicKey) -> String {
    match directory.resolve_public_key(public_key).await {
        Ok(Some(name)) => name,
        Ok(None) => truncate_address(&public_key_hex(public_key)),
        Err(e) => {
            tracing::debug!(error = %e, "directory lookup failed, using address");
            truncate_address(&public_key_hex(public_key))
        }
    }
}
