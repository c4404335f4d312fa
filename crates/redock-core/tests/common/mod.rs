#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use redock_core::api::{ApiClient, ApiError, ApiRequest, ApiResponse, Transport, RENEW_PATH};
use redock_core::auth::{CredentialStore, MemoryBackend, Navigator, TokenPair};
use reqwest::StatusCode;

/// How the fake server answers `/token/renew`.
#[derive(Clone)]
pub enum Renewal {
    Issue { access: String, refresh: Option<String> },
    Reject,
}

/// In-process stand-in for the backend.
///
/// Protected paths answer 200 when the request carries the currently valid
/// bearer and 401 otherwise. A successful renewal makes the issued token
/// valid unless `accept_renewed` is turned off.
pub struct FakeBackend {
    valid_access: Mutex<Option<String>>,
    renewal: Mutex<Renewal>,
    renew_delay: Duration,
    pub accept_renewed: AtomicBool,
    pub renew_calls: AtomicUsize,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeBackend {
    pub fn new(renewal: Renewal) -> Arc<Self> {
        Arc::new(Self {
            valid_access: Mutex::new(None),
            renewal: Mutex::new(renewal),
            renew_delay: Duration::from_millis(50),
            accept_renewed: AtomicBool::new(true),
            renew_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set_valid_access(&self, access: Option<&str>) {
        *self.valid_access.lock().expect("lock") = access.map(str::to_string);
    }

    pub fn set_renewal(&self, renewal: Renewal) {
        *self.renewal.lock().expect("lock") = renewal;
    }

    pub fn renew_calls(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().expect("lock").clone()
    }

    /// Non-renewal requests sent with the given path
    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    async fn renew(&self, request: &ApiRequest) -> ApiResponse {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        assert!(request.bearer().is_none(), "renewal must not carry a bearer");
        tokio::time::sleep(self.renew_delay).await;

        let renewal = self.renewal.lock().expect("lock").clone();
        match renewal {
            Renewal::Issue { access, refresh } => {
                if self.accept_renewed.load(Ordering::SeqCst) {
                    self.set_valid_access(Some(&access));
                }
                let tokens = match refresh {
                    Some(refresh) => serde_json::json!({ "access": access, "refresh": refresh }),
                    None => serde_json::json!({ "access": access }),
                };
                ApiResponse::new(
                    StatusCode::OK,
                    serde_json::json!({ "error": false, "msg": null, "tokens": tokens }).to_string(),
                )
            }
            Renewal::Reject => ApiResponse::new(
                StatusCode::UNAUTHORIZED,
                r#"{"error":true,"msg":"unauthorized, your session was ended earlier"}"#,
            ),
        }
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.requests.lock().expect("lock").push(request.clone());
        // Let concurrent callers interleave like real network I/O would
        tokio::task::yield_now().await;

        if request.path == RENEW_PATH {
            return Ok(self.renew(request).await);
        }

        let valid = self.valid_access.lock().expect("lock").clone();
        if valid.is_some() && request.bearer() == valid.as_deref() {
            let body = serde_json::json!({ "path": request.path, "auth": request.bearer() });
            Ok(ApiResponse::new(StatusCode::OK, body.to_string()))
        } else {
            Ok(ApiResponse::new(
                StatusCode::UNAUTHORIZED,
                r#"{"error":true,"msg":"Token is expired"}"#,
            ))
        }
    }
}

/// Navigator that counts navigations.
#[derive(Default)]
pub struct CountingNavigator {
    count: AtomicUsize,
}

impl CountingNavigator {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Navigator for CountingNavigator {
    fn navigate_to_login(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub client: ApiClient,
    pub backend: Arc<FakeBackend>,
    pub navigator: Arc<CountingNavigator>,
}

/// Client with session `(access, refresh)` stored and the fake backend
/// currently rejecting every bearer.
pub fn harness(session: TokenPair, renewal: Renewal) -> Harness {
    let backend = FakeBackend::new(renewal);
    let navigator = Arc::new(CountingNavigator::default());
    let store = Arc::new(CredentialStore::open(Box::new(MemoryBackend::new())));
    store.set_session(session);
    let client = ApiClient::new(backend.clone(), store, navigator.clone());
    Harness {
        client,
        backend,
        navigator,
    }
}

pub fn issue(access: &str) -> Renewal {
    Renewal::Issue {
        access: access.to_string(),
        refresh: None,
    }
}
