//! On-disk identity key.
//!
//! The secret scalar is stored as a single line of hex. On Unix the file is
//! created with mode 0600.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use dank_crypto::IdentityKeyPair;
use tracing::info;
use zeroize::Zeroizing;

use crate::errors::CoreError;

#[derive(Debug, Clone)]
pub struct IdentityFile {
    path: PathBuf,
}

impl IdentityFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the identity. A missing file means the user has not registered.
    pub fn load(&self) -> Result<IdentityKeyPair, CoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(s) => Zeroizing::new(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(CoreError::NotRegistered),
            Err(e) => return Err(CoreError::Io(e)),
        };
        if raw.trim().is_empty() {
            return Err(CoreError::NotRegistered);
        }
        Ok(IdentityKeyPair::from_secret_hex(raw.trim())?)
    }

    /// Generate and persist a new identity.
    ///
    /// Refuses to replace an existing identity unless `force` is set, since
    /// the old key is the only way to read messages sent to it.
    pub fn create(&self, force: bool) -> Result<IdentityKeyPair, CoreError> {
        if self.exists() && !force {
            return Err(CoreError::AlreadyRegistered(self.path.clone()));
        }
        let identity = IdentityKeyPair::generate();
        self.save(&identity)?;
        info!(path = %self.path.display(), public_key = %identity.public_key_hex(), "identity created");
        Ok(identity)
    }

    pub fn save(&self, identity: &IdentityKeyPair) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = open_private(&self.path)?;
        let secret = identity.secret_hex();
        file.write_all(secret.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
