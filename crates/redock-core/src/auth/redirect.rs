use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::api::ApiRequest;

/// Takes the user to the login surface.
pub trait Navigator: Send + Sync {
    fn navigate_to_login(&self);
}

/// Navigator that only logs; used when no interactive surface exists.
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate_to_login(&self) {
        info!("Session ended, login required");
    }
}

/// Sends the user back to login when the session cannot be recovered.
///
/// Once a navigation has happened, further triggers for the same session
/// are no-ops, so a burst of terminal failures produces a single
/// navigation. A session is identified by the credential store's
/// generation; installing a new access token by any route re-arms the
/// redirect, as does [`mark_authenticated`](Self::mark_authenticated).
pub struct SessionRedirector {
    navigator: Arc<dyn Navigator>,
    login_path: String,
    /// Generation of the session that was last sent to login
    on_login: Mutex<Option<u64>>,
    navigations: AtomicU64,
}

impl SessionRedirector {
    pub fn new(navigator: Arc<dyn Navigator>, login_path: impl Into<String>) -> Self {
        Self {
            navigator,
            login_path: login_path.into(),
            on_login: Mutex::new(None),
            navigations: AtomicU64::new(0),
        }
    }

    /// Redirect for a request that failed terminally under session
    /// `generation`. Returns whether a navigation actually happened.
    pub fn redirect_to_login(&self, request: &ApiRequest, generation: u64) -> bool {
        if request.options.skip_auth_policy {
            debug!(path = %request.path, "Skipping login redirect for silent request");
            return false;
        }
        if request.path_without_query() == self.login_path {
            return false;
        }
        {
            let mut on_login = self.on_login.lock().unwrap_or_else(PoisonError::into_inner);
            if *on_login == Some(generation) {
                return false;
            }
            *on_login = Some(generation);
        }

        self.navigations.fetch_add(1, Ordering::SeqCst);
        self.navigator.navigate_to_login();
        true
    }

    /// The user has signed in again; the next terminal failure may redirect.
    pub fn mark_authenticated(&self) {
        *self.on_login.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_on_login(&self) -> bool {
        self.on_login.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Number of navigations performed so far
    pub fn navigations(&self) -> u64 {
        self.navigations.load(Ordering::SeqCst)
    }
}
