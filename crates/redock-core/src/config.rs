//! Console configuration management.
//!
//! This module handles loading and saving the configuration, which holds
//! the instance base URL, request timeout, credential backend and the last
//! used login email. Environment variables override the file.
//!
//! Configuration is stored at `~/.config/redock-console/config.json`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::{ApiClient, ReqwestTransport};
use crate::auth::{
    CredentialBackend, CredentialStore, FileBackend, KeyringBackend, MemoryBackend, Navigator,
};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "redock-console";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default instance address (the backend listens on 6001)
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:6001";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Environment overrides
pub const ENV_BASE_URL: &str = "REDOCK_BASE_URL";
pub const ENV_EMAIL: &str = "REDOCK_EMAIL";
pub const ENV_PASSWORD: &str = "REDOCK_PASSWORD";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub credential_backend: BackendKind,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            credential_backend: BackendKind::default(),
            last_email: None,
        }
    }
}

impl Config {
    /// Load the config file (defaults if absent) and apply env overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Some(url) = std::env::var(ENV_BASE_URL).ok().filter(|v| !v.is_empty()) {
            self.base_url = url;
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Keychain account: one entry per instance
    fn keyring_account(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }

    pub fn credential_backend(&self) -> Result<Box<dyn CredentialBackend>> {
        Ok(match self.credential_backend {
            BackendKind::File => Box::new(FileBackend::new(self.cache_dir()?)),
            BackendKind::Keyring => Box::new(KeyringBackend::new(self.keyring_account())),
            BackendKind::Memory => Box::new(MemoryBackend::new()),
        })
    }

    /// Build a client against the configured instance
    pub fn build_client(&self, navigator: Arc<dyn Navigator>) -> Result<ApiClient> {
        let transport = ReqwestTransport::new(&self.base_url, self.request_timeout())
            .context("Failed to build HTTP client")?;
        let store = CredentialStore::open(self.credential_backend()?);
        Ok(ApiClient::new(Arc::new(transport), Arc::new(store), navigator))
    }
}
