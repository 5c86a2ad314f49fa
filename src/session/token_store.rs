//! Credential persistence
//!
//! A credential saved with "remember me" goes to durable storage and
//! survives restarts. Otherwise it lives in a process-scoped slot and
//! disappears with the process. Two durable backends are provided: a JSON
//! file in the user's data directory and the OS keyring.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::config::{CredentialBackend, SessionConfig};
use crate::error::{Result, ReviewSyncError};

/// A credential together with the persistence choice it was saved with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredential {
    /// Opaque bearer credential
    pub credential: String,
    /// `true` if it was saved to durable storage
    pub remember_me: bool,
}

/// Where the session credential lives between calls.
pub trait TokenStore: Send + Sync + fmt::Debug {
    /// Saves `credential`, durably when `remember_me` is set.
    ///
    /// Saving replaces whatever was stored before in either slot.
    fn save(&self, credential: &str, remember_me: bool) -> Result<()>;

    /// Returns the stored credential, if any. The session slot wins when
    /// both are populated.
    fn load(&self) -> Result<Option<StoredCredential>>;

    /// Removes the credential from every slot.
    fn clear(&self) -> Result<()>;
}

/// A single durable value.
pub trait DurableSlot: Send + Sync + fmt::Debug {
    /// Reads the value, `None` when nothing was written.
    fn read(&self) -> Result<Option<String>>;
    /// Replaces the value.
    fn write(&self, value: &str) -> Result<()>;
    /// Removes the value. No-op when absent.
    fn erase(&self) -> Result<()>;
}

/// Token store with a durable slot and a process-scoped slot.
#[derive(Debug)]
pub struct TieredTokenStore<D: DurableSlot> {
    durable: D,
    session: Mutex<Option<String>>,
}

/// Durable slot backed by a JSON file.
pub type FileTokenStore = TieredTokenStore<FileSlot>;
/// Durable slot backed by the OS keyring.
pub type KeyringTokenStore = TieredTokenStore<KeyringSlot>;
/// Durable slot kept in memory; useful for tests and embedded hosts.
pub type MemoryTokenStore = TieredTokenStore<MemorySlot>;

impl<D: DurableSlot> TieredTokenStore<D> {
    /// Wraps a durable slot.
    pub fn with_slot(durable: D) -> Self {
        Self {
            durable,
            session: Mutex::new(None),
        }
    }

    fn session_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<D: DurableSlot> TokenStore for TieredTokenStore<D> {
    fn save(&self, credential: &str, remember_me: bool) -> Result<()> {
        if remember_me {
            let stored = StoredCredential {
                credential: credential.to_string(),
                remember_me: true,
            };
            self.durable.write(&serde_json::to_string(&stored)?)?;
            *self.session_slot() = None;
        } else {
            self.durable.erase()?;
            *self.session_slot() = Some(credential.to_string());
        }
        tracing::debug!(remember_me, "Saved session credential");
        Ok(())
    }

    fn load(&self) -> Result<Option<StoredCredential>> {
        if let Some(credential) = self.session_slot().clone() {
            return Ok(Some(StoredCredential {
                credential,
                remember_me: false,
            }));
        }
        match self.durable.read()? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn clear(&self) -> Result<()> {
        *self.session_slot() = None;
        self.durable.erase()?;
        tracing::debug!("Cleared session credential");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File slot
// ---------------------------------------------------------------------------

/// Stores the durable credential as `<namespace>.json` in a directory.
#[derive(Debug, Clone)]
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    /// Slot at `<dir>/<namespace>.json`.
    pub fn new(dir: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", namespace)),
        }
    }

    /// Slot in the platform data directory.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewSyncError::Storage`] when no home directory can be
    /// determined.
    pub fn in_data_dir(namespace: &str) -> Result<Self> {
        let dirs = ProjectDirs::from("com", "reviewsync", namespace).ok_or_else(|| {
            ReviewSyncError::Storage("Could not determine data directory".to_string())
        })?;
        Ok(Self::new(dirs.data_dir(), namespace))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DurableSlot for FileSlot {
    fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, value: &str) -> Result<()> {
        let dir = self.path.parent().ok_or_else(|| {
            ReviewSyncError::Storage(format!("Invalid credential path {:?}", self.path))
        })?;
        fs::create_dir_all(dir)?;

        // Write to a sibling and rename so a crash never leaves a torn file.
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        restrict_permissions(&tmp)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn erase(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Keyring slot
// ---------------------------------------------------------------------------

/// Stores the durable credential in the OS keyring under `<namespace>-session`.
#[derive(Debug, Clone)]
pub struct KeyringSlot {
    service: String,
    user: String,
}

impl KeyringSlot {
    /// Slot for the given namespace.
    pub fn new(namespace: &str) -> Self {
        Self {
            service: format!("{}-session", namespace),
            user: namespace.to_string(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        Ok(keyring::Entry::new(&self.service, &self.user)?)
    }
}

impl DurableSlot for KeyringSlot {
    fn read(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, value: &str) -> Result<()> {
        self.entry()?.set_password(value)?;
        Ok(())
    }

    fn erase(&self) -> Result<()> {
        match self.entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Memory slot
// ---------------------------------------------------------------------------

/// Durable slot that only lives as long as the value itself.
#[derive(Debug, Default)]
pub struct MemorySlot {
    value: Mutex<Option<String>>,
}

impl DurableSlot for MemorySlot {
    fn read(&self) -> Result<Option<String>> {
        Ok(self
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn write(&self, value: &str) -> Result<()> {
        *self
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(value.to_string());
        Ok(())
    }

    fn erase(&self) -> Result<()> {
        *self
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}

impl MemoryTokenStore {
    /// An empty in-memory store.
    pub fn new() -> Self {
        Self::with_slot(MemorySlot::default())
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the token store selected by `config.backend`.
///
/// # Errors
///
/// Returns [`ReviewSyncError::Storage`] when the file backend has no
/// `storage_dir` and no platform data directory exists.
pub fn open_token_store(config: &SessionConfig) -> Result<Arc<dyn TokenStore>> {
    match config.backend {
        CredentialBackend::File => {
            let slot = match &config.storage_dir {
                Some(dir) => FileSlot::new(dir, &config.namespace),
                None => FileSlot::in_data_dir(&config.namespace)?,
            };
            tracing::debug!(path = ?slot.path(), "Using file credential store");
            Ok(Arc::new(TieredTokenStore::with_slot(slot)))
        }
        CredentialBackend::Keyring => {
            tracing::debug!(namespace = %config.namespace, "Using keyring credential store");
            Ok(Arc::new(TieredTokenStore::with_slot(KeyringSlot::new(
                &config.namespace,
            ))))
        }
    }
}
