//! Persistence backends for the credential set.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;

use super::session::StoredCredentials;

/// Keychain service name used by [`KeyringBackend`]
pub const KEYRING_SERVICE: &str = "redock-console";

/// Credentials file name in the cache directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// Durable storage behind a [`CredentialStore`](super::CredentialStore).
///
/// Errors are reported to the store, which logs them; they never reach
/// request callers.
pub trait CredentialBackend: Send + Sync {
    fn load(&self) -> Result<Option<StoredCredentials>>;
    fn save(&self, credentials: &StoredCredentials) -> Result<()>;
    fn clear(&self) -> Result<()>;
    fn describe(&self) -> String;
}

/// JSON file in the cache directory.
pub struct FileBackend {
    cache_dir: PathBuf,
}

impl FileBackend {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn path(&self) -> PathBuf {
        self.cache_dir.join(CREDENTIALS_FILE)
    }
}

impl CredentialBackend for FileBackend {
    fn load(&self) -> Result<Option<StoredCredentials>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&path).context("Failed to read credentials file")?;
        let credentials: StoredCredentials =
            serde_json::from_str(&contents).context("Failed to parse credentials file")?;
        Ok(Some(credentials))
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<()> {
        let path = self.path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(credentials)?;
        std::fs::write(&path, contents).context("Failed to write credentials file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to restrict credentials file permissions")?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file ({})", self.path().display())
    }
}

/// OS keychain entry holding the serialized credential set.
pub struct KeyringBackend {
    account: String,
}

impl KeyringBackend {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(KEYRING_SERVICE, &self.account).context("Failed to create keyring entry")
    }
}

impl CredentialBackend for KeyringBackend {
    fn load(&self) -> Result<Option<StoredCredentials>> {
        match self.entry()?.get_password() {
            Ok(secret) => {
                let credentials: StoredCredentials = serde_json::from_str(&secret)
                    .context("Failed to parse credentials from keychain")?;
                Ok(Some(credentials))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve credentials from keychain"),
        }
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<()> {
        let secret = serde_json::to_string(credentials)?;
        self.entry()?
            .set_password(&secret)
            .context("Failed to store credentials in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credentials from keychain"),
        }
    }

    fn describe(&self) -> String {
        format!("keyring ({}/{})", KEYRING_SERVICE, self.account)
    }
}

/// Volatile storage; nothing survives the process.
#[derive(Default)]
pub struct MemoryBackend {
    saved: Mutex<Option<StoredCredentials>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialBackend for MemoryBackend {
    fn load(&self) -> Result<Option<StoredCredentials>> {
        let saved = self
            .saved
            .lock()
            .map_err(|_| anyhow::anyhow!("memory backend lock poisoned"))?;
        Ok(saved.clone())
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<()> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|_| anyhow::anyhow!("memory backend lock poisoned"))?;
        *saved = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|_| anyhow::anyhow!("memory backend lock poisoned"))?;
        *saved = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
