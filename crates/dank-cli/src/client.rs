//! Wiring of the core services from a loaded [`Config`].
//!
//! Every command except `init` starts here: load the identity key (absent
//! key means not registered), open the outbox database, and point the relay
//! client at the configured URL.

use std::sync::Arc;

use anyhow::Context;
use tracing::debug;

use dank_core::directory::StaticDirectory;
use dank_core::http_relay::HttpRelayClient;
use dank_core::keystore::IdentityFile;
use dank_core::messenger::Messenger;
use dank_core::reconcile::Reconciler;
use dank_core::sqlite_store::SqliteStore;
use dank_core::timeline::TimelineHandle;
use dank_crypto::IdentityKeyPair;

use crate::config::Config;

/// A registered client ready to talk to the relay.
pub struct Client {
    identity: Arc<IdentityKeyPair>,
    relay: Arc<HttpRelayClient>,
    store: Arc<SqliteStore>,
    directory: Arc<StaticDirectory>,
    config: Config,
}

impl Client {
    /// Open the client described by `config`.
    ///
    /// Fails with [`dank_core::CoreError::NotRegistered`] when there is no
    /// identity key yet.
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let identity = IdentityFile::new(config.key_path()?).load()?;

        let db_path = config.db_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }
        let store = SqliteStore::new(&db_path).map_err(dank_core::CoreError::from)?;

        let relay = HttpRelayClient::with_timeout(config.relay.url.clone(), config.relay_timeout())
            .map_err(dank_core::CoreError::from)?;

        let directory = StaticDirectory::from_entries(
            config.directory.names.iter().map(|(name, key)| (name.as_str(), key.as_str())),
        )
        .map_err(dank_core::CoreError::from)?;

        debug!(relay = %relay.base_url(), db = %db_path.display(), names = directory.len(), "client opened");

        Ok(Self {
            identity: Arc::new(identity),
            relay: Arc::new(relay),
            store: Arc::new(store),
            directory: Arc::new(directory),
            config,
        })
    }

    pub fn identity(&self) -> &IdentityKeyPair {
        &self.identity
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn directory(&self) -> &StaticDirectory {
        &self.directory
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn messenger(&self, timeline: Option<TimelineHandle>) -> Messenger {
        let messenger = Messenger::new(
            self.identity.clone(),
            self.relay.clone(),
            self.store.clone(),
            self.directory.clone(),
            self.config.retry_policy(),
        );
        match timeline {
            Some(timeline) => messenger.with_timeline(timeline),
            None => messenger,
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.identity.clone(),
            self.relay.clone(),
            self.store.clone(),
            self.directory.clone(),
            self.config.scan_config(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dank_core::CoreError;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.identity.key_path = Some(dir.path().join("identity.key"));
        config.storage.db_path = Some(dir.path().join("data").join("client.db"));
        config
    }

    #[test]
    fn test_open_requires_identity() {
        let dir = TempDir::new().unwrap();
        let err = Client::open(config_in(&dir)).err().unwrap();
        assert!(matches!(err.downcast_ref::<CoreError>(), Some(CoreError::NotRegistered)));
    }

    #[test]
    fn test_open_after_init() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let created = IdentityFile::new(config.key_path().unwrap()).create(false).unwrap();

        let client = Client::open(config).unwrap();
        assert_eq!(client.identity().public_key(), created.public_key());
        assert!(dir.path().join("data").join("client.db").exists());
    }

    #[test]
    fn test_open_rejects_bad_directory_entry() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        IdentityFile::new(config.key_path().unwrap()).create(false).unwrap();
        config.directory.names.insert("bob".to_string(), "zz".to_string());

        let err = Client::open(config).err().unwrap();
        assert!(matches!(err.downcast_ref::<CoreError>(), Some(CoreError::Directory(_))));
    }
}
