use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::{debug, warn};

use super::session::{non_empty, StoredCredentials, TokenPair, TunnelServerContext};
use super::storage::CredentialBackend;

/// A single credential value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKey {
    Access,
    Refresh,
    Tunnel,
    TunnelServer,
}

/// A group of credentials that is cleared as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScope {
    /// Access and refresh tokens together
    Session,
    Tunnel,
    TunnelServer,
    All,
}

#[derive(Default)]
struct State {
    stored: StoredCredentials,
    peer: Option<TunnelServerContext>,
}

/// Process-wide credential holder.
///
/// Reads are served from memory; every write goes to memory first and is
/// then persisted through the backend. Persistence failures are logged and
/// swallowed so that `get`/`set`/`clear` never fail.
pub struct CredentialStore {
    state: RwLock<State>,
    backend: Box<dyn CredentialBackend>,
    /// Bumped every time a new access token is installed
    generation: AtomicU64,
}

impl CredentialStore {
    /// Open the store, loading whatever the backend has persisted
    pub fn open(backend: Box<dyn CredentialBackend>) -> Self {
        let stored = match backend.load() {
            Ok(Some(stored)) => {
                debug!(backend = %backend.describe(), "Credentials loaded");
                stored
            }
            Ok(None) => StoredCredentials::default(),
            Err(e) => {
                warn!(error = %e, backend = %backend.describe(), "Failed to load credentials, starting empty");
                StoredCredentials::default()
            }
        };

        Self {
            state: RwLock::new(State { stored, peer: None }),
            backend,
            generation: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: CredentialKey) -> Option<String> {
        let state = self.read();
        let stored = &state.stored;
        match key {
            CredentialKey::Access => stored.session.access.clone(),
            CredentialKey::Refresh => stored.session.refresh.clone(),
            CredentialKey::Tunnel => stored.tunnel_token.clone(),
            CredentialKey::TunnelServer => stored.tunnel_server_token.clone(),
        }
    }

    /// Store a credential. An empty value clears that key.
    pub fn set(&self, key: CredentialKey, value: impl Into<String>) {
        let value = non_empty(value.into());
        self.write_with(|stored| {
            let slot = match key {
                CredentialKey::Access => &mut stored.session.access,
                CredentialKey::Refresh => &mut stored.session.refresh,
                CredentialKey::Tunnel => &mut stored.tunnel_token,
                CredentialKey::TunnelServer => &mut stored.tunnel_server_token,
            };
            *slot = value;
        });
    }

    pub fn clear(&self, scope: CredentialScope) {
        debug!(?scope, "Clearing credentials");
        self.write_with(|stored| match scope {
            CredentialScope::Session => stored.session = TokenPair::default(),
            CredentialScope::Tunnel => stored.tunnel_token = None,
            CredentialScope::TunnelServer => stored.tunnel_server_token = None,
            CredentialScope::All => *stored = StoredCredentials::default(),
        });
    }

    pub fn session(&self) -> TokenPair {
        self.read().stored.session.clone()
    }

    /// Replace the session pair in one write
    pub fn set_session(&self, pair: TokenPair) {
        self.write_with(|stored| stored.session = pair);
    }

    /// Install a renewed access token, keeping the refresh token unless the
    /// server rotated it.
    ///
    /// `used_refresh` is the refresh token the renewal was made with. If the
    /// session no longer holds it (logout, or a new sign-in happened while
    /// the renewal was in flight) nothing is written and `false` is returned.
    pub fn renew_session(&self, used_refresh: &str, access: String, refresh: Option<String>) -> bool {
        let access = non_empty(access);
        let refresh = refresh.and_then(non_empty);
        self.write_if(|stored| {
            if stored.session.refresh.as_deref() != Some(used_refresh) {
                return false;
            }
            stored.session.access = access;
            if let Some(refresh) = refresh {
                stored.session.refresh = Some(refresh);
            }
            true
        })
    }

    /// Clear the session only if it still holds `used_refresh`
    pub fn clear_session_if(&self, used_refresh: &str) -> bool {
        self.write_if(|stored| {
            if stored.session.refresh.as_deref() != Some(used_refresh) {
                return false;
            }
            stored.session = TokenPair::default();
            true
        })
    }

    /// Changes whenever a new access token is installed, by sign-in,
    /// renewal or a direct write. Clearing does not change it.
    pub fn session_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StoredCredentials {
        self.read().stored.clone()
    }

    pub fn tunnel_server_context(&self) -> Option<TunnelServerContext> {
        self.read().peer.clone()
    }

    pub fn set_tunnel_server_context(&self, context: TunnelServerContext) {
        self.write().peer = Some(context);
    }

    /// Drop the selected federation peer, returning it if one was set
    pub fn clear_tunnel_server_context(&self) -> Option<TunnelServerContext> {
        self.write().peer.take()
    }

    pub fn backend_description(&self) -> String {
        self.backend.describe()
    }

    fn write_with(&self, mutate: impl FnOnce(&mut StoredCredentials)) {
        self.write_if(|stored| {
            mutate(stored);
            true
        });
    }

    /// Apply `mutate` and persist if it reports a change
    fn write_if(&self, mutate: impl FnOnce(&mut StoredCredentials) -> bool) -> bool {
        let mut state = self.write();
        let previous_access = state.stored.session.access.clone();
        if !mutate(&mut state.stored) {
            return false;
        }
        state.stored.saved_at = Some(Utc::now());
        if state.stored.session.access.is_some() && state.stored.session.access != previous_access {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }

        // Persist under the lock so the backend sees writes in order
        let result = if state.stored.is_empty() {
            self.backend.clear()
        } else {
            self.backend.save(&state.stored)
        };
        if let Err(e) = result {
            warn!(error = %e, backend = %self.backend.describe(), "Failed to persist credentials");
        }
        true
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::{FileBackend, MemoryBackend};

    fn store() -> CredentialStore {
        CredentialStore::open(Box::new(MemoryBackend::new()))
    }

    #[test]
    fn test_read_after_write() {
        let store = store();
        assert_eq!(store.get(CredentialKey::Access), None);

        store.set(CredentialKey::Access, "a1");
        store.set(CredentialKey::Tunnel, "t1");
        assert_eq!(store.get(CredentialKey::Access).as_deref(), Some("a1"));
        assert_eq!(store.get(CredentialKey::Tunnel).as_deref(), Some("t1"));

        store.set(CredentialKey::Access, "");
        assert_eq!(store.get(CredentialKey::Access), None);
    }

    #[test]
    fn test_clear_session_clears_both_tokens() {
        let store = store();
        store.set_session(TokenPair::new("a1", "r1"));
        store.set(CredentialKey::TunnelServer, "ts1");

        store.clear(CredentialScope::Session);
        assert_eq!(store.get(CredentialKey::Access), None);
        assert_eq!(store.get(CredentialKey::Refresh), None);
        assert_eq!(store.get(CredentialKey::TunnelServer).as_deref(), Some("ts1"));
    }

    #[test]
    fn test_renew_keeps_refresh_unless_rotated() {
        let store = store();
        store.set_session(TokenPair::new("a1", "r1"));

        assert!(store.renew_session("r1", "a2".to_string(), None));
        assert_eq!(store.session(), TokenPair::new("a2", "r1"));

        assert!(store.renew_session("r1", "a3".to_string(), Some("r2".to_string())));
        assert_eq!(store.session(), TokenPair::new("a3", "r2"));
    }

    #[test]
    fn test_renew_after_logout_writes_nothing() {
        let store = store();
        store.set_session(TokenPair::new("a1", "r1"));
        store.clear(CredentialScope::Session);

        assert!(!store.renew_session("r1", "a2".to_string(), None));
        assert!(store.session().is_empty());
    }

    #[test]
    fn test_renew_does_not_overwrite_newer_sign_in() {
        let store = store();
        store.set_session(TokenPair::new("b1", "r9"));

        assert!(!store.renew_session("r1", "a2".to_string(), None));
        assert!(!store.clear_session_if("r1"));
        assert_eq!(store.session(), TokenPair::new("b1", "r9"));

        assert!(store.clear_session_if("r9"));
        assert!(store.session().is_empty());
    }

    #[test]
    fn test_generation_tracks_installed_access() {
        let store = store();
        let start = store.session_generation();

        store.set_session(TokenPair::new("a1", "r1"));
        let signed_in = store.session_generation();
        assert!(signed_in > start);

        store.set(CredentialKey::Tunnel, "t1");
        store.clear(CredentialScope::Session);
        assert_eq!(store.session_generation(), signed_in);

        store.set(CredentialKey::Access, "a2");
        assert!(store.session_generation() > signed_in);
    }

    #[test]
    fn test_peer_context_is_not_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CredentialStore::open(Box::new(FileBackend::new(dir.path().to_path_buf())));
        store.set_session(TokenPair::new("a1", "r1"));
        store.set_tunnel_server_context(TunnelServerContext::new("https://peer", None));
        assert!(store.tunnel_server_context().is_some());

        let reopened = CredentialStore::open(Box::new(FileBackend::new(dir.path().to_path_buf())));
        assert_eq!(reopened.session(), TokenPair::new("a1", "r1"));
        assert!(reopened.tunnel_server_context().is_none());
    }

    #[test]
    fn test_clear_all_removes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path().to_path_buf());
        let path = backend.path();
        let store = CredentialStore::open(Box::new(backend));

        store.set(CredentialKey::Tunnel, "t1");
        assert!(path.exists());
        store.clear(CredentialScope::All);
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_backend_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("credentials.json"), "garbage").expect("write");
        let store = CredentialStore::open(Box::new(FileBackend::new(dir.path().to_path_buf())));
        assert!(store.session().is_empty());
    }

    #[test]
    fn test_visible_across_threads() {
        let store = Arc::new(store());
        let writer = Arc::clone(&store);
        std::thread::spawn(move || writer.set(CredentialKey::Access, "a9"))
            .join()
            .expect("join");
        assert_eq!(store.get(CredentialKey::Access).as_deref(), Some("a9"));
    }
}
