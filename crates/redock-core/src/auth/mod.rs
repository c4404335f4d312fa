//! Credential management for the console.
//!
//! This module provides:
//! - `CredentialStore`: process-wide holder of the session pair, tunnel
//!   credentials and the selected federation peer
//! - Storage backends: JSON file, OS keychain (via keyring), memory
//! - `SessionRedirector`: sends the user back to login when the session
//!   cannot be recovered

pub mod credentials;
pub mod redirect;
pub mod session;
pub mod storage;

pub use credentials::{CredentialKey, CredentialScope, CredentialStore};
pub use redirect::{LogNavigator, Navigator, SessionRedirector};
pub use session::{StoredCredentials, TokenPair, TunnelServerContext};
pub use storage::{CredentialBackend, FileBackend, KeyringBackend, MemoryBackend};
