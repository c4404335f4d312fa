//! Recovery from authorization failures.
//!
//! A burst of concurrent 401s against a valid refresh token turns into a
//! single renewal round-trip; every failed request is then replayed once
//! with the new access token.
//!
//! The decision for a failed response is the pure [`decide`] function. The
//! [`RefreshCoordinator`] executes it: it owns the pending-cycle slot,
//! writes renewed credentials, replays requests and triggers the login
//! redirect on terminal failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::error::ApiError;
use super::request::{ApiRequest, ApiResponse, RequestOptions};
use super::scope::{Scope, RENEW_PATH};
use super::transport::Transport;
use crate::auth::{CredentialKey, CredentialScope, CredentialStore, SessionRedirector};

/// What to do with a failed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Not recoverable here; hand the error to the caller as-is
    Propagate,
    /// Federation peer credential rejected: drop the peer context, then
    /// report a scope failure
    InvalidateContext,
    /// Tunnel credential rejected; the session is not involved
    ScopeFailure,
    /// Clear the session, redirect to login, report the failure
    Terminal,
    /// The credential was already replaced since this request was sent;
    /// replay with the current one
    ReplayWithCurrent(String),
    /// Join or start a refresh cycle, then replay
    Recover,
}

/// Everything [`decide`] looks at.
#[derive(Debug, Clone, Copy)]
pub struct FailureContext<'a> {
    pub status: StatusCode,
    pub scope: Scope,
    pub retried: bool,
    pub targets_renewal: bool,
    pub refresh_available: bool,
    /// Bearer the failed request carried
    pub sent_access: Option<&'a str>,
    /// Access token in the store right now
    pub current_access: Option<&'a str>,
}

pub fn decide(ctx: &FailureContext<'_>) -> AuthDecision {
    if ctx.status != StatusCode::UNAUTHORIZED {
        return AuthDecision::Propagate;
    }
    match ctx.scope {
        Scope::TunnelClientOrServer => return AuthDecision::InvalidateContext,
        Scope::TunnelGeneric => return AuthDecision::ScopeFailure,
        Scope::Primary | Scope::Unscoped => {}
    }
    if ctx.retried || ctx.targets_renewal {
        return AuthDecision::Terminal;
    }
    if ctx.scope == Scope::Unscoped {
        return AuthDecision::Propagate;
    }
    if let Some(current) = ctx.current_access {
        if ctx.sent_access != Some(current) {
            return AuthDecision::ReplayWithCurrent(current.to_string());
        }
    }
    if !ctx.refresh_available {
        return AuthDecision::Terminal;
    }
    AuthDecision::Recover
}

/// Why a refresh cycle failed. Shared by every waiter of the cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("refresh token rejected with status {0}")]
    Rejected(StatusCode),

    #[error("renewal response did not contain an access token")]
    MissingToken,

    #[error("renewal request failed: {0}")]
    Network(String),

    #[error("refresh task aborted: {0}")]
    Aborted(String),

    /// The session was cleared or replaced while the renewal was in flight;
    /// the renewed tokens were discarded
    #[error("session changed during renewal")]
    Superseded,
}

#[derive(Debug, Serialize)]
struct RenewRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RenewResponse {
    tokens: RenewedTokens,
}

#[derive(Debug, Deserialize)]
struct RenewedTokens {
    #[serde(default)]
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

type CycleOutcome = Shared<BoxFuture<'static, Result<String, RefreshFailure>>>;

struct PendingCycle {
    id: u64,
    outcome: CycleOutcome,
}

type PendingSlot = Arc<Mutex<Option<PendingCycle>>>;

fn lock(slot: &PendingSlot) -> MutexGuard<'_, Option<PendingCycle>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    redirector: Arc<SessionRedirector>,
    pending: PendingSlot,
    cycles: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        redirector: Arc<SessionRedirector>,
    ) -> Self {
        Self {
            transport,
            store,
            redirector,
            pending: Arc::new(Mutex::new(None)),
            cycles: AtomicU64::new(0),
        }
    }

    /// Number of refresh cycles started so far
    pub fn cycles_started(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub fn is_refreshing(&self) -> bool {
        lock(&self.pending).is_some()
    }

    /// Handle a non-success response for `request`. Returns the successful
    /// replay response, or the error the caller should see.
    pub async fn recover(
        &self,
        request: &ApiRequest,
        scope: Scope,
        response: ApiResponse,
    ) -> Result<ApiResponse, ApiError> {
        let mut request = request.clone();
        let mut response = response;

        loop {
            let original = ApiError::from_status(response.status, &response.body);
            let session = self.store.session();
            let ctx = FailureContext {
                status: response.status,
                scope,
                retried: request.is_retried(),
                targets_renewal: request.path_without_query() == RENEW_PATH,
                refresh_available: session.refresh.is_some(),
                sent_access: request.bearer(),
                current_access: session.access.as_deref(),
            };

            let decision = decide(&ctx);
            debug!(path = %request.path, status = %response.status, %scope, ?decision, "Request failed");

            match decision {
                AuthDecision::Propagate => return Err(original),
                AuthDecision::InvalidateContext => {
                    if let Some(peer) = self.store.clear_tunnel_server_context() {
                        warn!(peer = %peer.base_url, "Federation peer rejected credential, context dropped");
                    }
                    return Err(scope_failure(scope, original));
                }
                AuthDecision::ScopeFailure => return Err(scope_failure(scope, original)),
                AuthDecision::Terminal => return Err(self.terminate(&request, original)),
                AuthDecision::ReplayWithCurrent(access) => {
                    debug!(path = %request.path, "Credential already renewed, replaying");
                    request = request.replay_with(&access)?;
                }
                AuthDecision::Recover => {
                    let outcome = self.join_or_start(request.bearer());
                    match outcome.await {
                        Ok(access) => request = request.replay_with(&access)?,
                        Err(failure) => {
                            // A sign-in landed while the cycle ran; replay with it
                            let current = self.store.get(CredentialKey::Access);
                            if current.is_some() && current.as_deref() != request.bearer() {
                                debug!(path = %request.path, error = %failure, "Session replaced during renewal");
                                continue;
                            }
                            warn!(error = %failure, path = %request.path, "Token refresh failed");
                            return Err(self.terminate(&request, original));
                        }
                    }
                }
            }

            let replayed = self.transport.send(&request).await?;
            if replayed.is_success() {
                return Ok(replayed);
            }
            response = replayed;
        }
    }

    /// Renew now, joining a pending cycle if there is one
    pub async fn refresh(&self) -> Result<String, RefreshFailure> {
        let current = self.store.get(CredentialKey::Access);
        let outcome = self.join_or_start(current.as_deref());
        outcome.await
    }

    /// Return the pending cycle, or start one. Not async: the check and the
    /// install happen under one lock with no await in between.
    ///
    /// `sent_access` is the bearer the failed request carried. If a cycle
    /// settled since then, the store already holds a different token and
    /// that token is handed back without another renewal.
    fn join_or_start(&self, sent_access: Option<&str>) -> CycleOutcome {
        let mut pending = lock(&self.pending);
        if let Some(cycle) = pending.as_ref() {
            debug!(cycle = cycle.id, "Joining pending refresh cycle");
            return cycle.outcome.clone();
        }

        let session = self.store.session();
        if let Some(current) = session.access {
            if sent_access != Some(current.as_str()) {
                return ready(Ok(current));
            }
        }
        let Some(refresh_token) = session.refresh else {
            return ready(Err(RefreshFailure::Rejected(StatusCode::UNAUTHORIZED)));
        };

        let id = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        info!(cycle = id, "Starting token refresh cycle");

        // Spawned so that waiters going away never abort the renewal. The
        // task clears the slot when it settles, which needs this lock, so it
        // cannot observe the slot before the cycle is installed below.
        let task = tokio::spawn(run_cycle(
            id,
            Arc::clone(&self.transport),
            Arc::clone(&self.store),
            Arc::clone(&self.pending),
            refresh_token,
        ));
        let outcome = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(RefreshFailure::Aborted(e.to_string())),
            }
        }
        .boxed()
        .shared();

        *pending = Some(PendingCycle {
            id,
            outcome: outcome.clone(),
        });
        outcome
    }

    fn terminate(&self, request: &ApiRequest, original: ApiError) -> ApiError {
        info!(path = %request.path, "Session cannot be recovered, clearing");
        self.store.clear(CredentialScope::Session);
        self.redirector
            .redirect_to_login(request, self.store.session_generation());
        ApiError::SessionExpired(original.message())
    }
}

async fn run_cycle(
    id: u64,
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    pending: PendingSlot,
    refresh_token: String,
) -> Result<String, RefreshFailure> {
    let result = renew(transport.as_ref(), &refresh_token).await;

    // Credentials are written before the slot is cleared, so a failure seen
    // after settlement finds the new token instead of starting a new cycle.
    // Both writes only apply while the session still holds the refresh
    // token this cycle used.
    let result = match result {
        Ok(tokens) => {
            let rotated = tokens.refresh.is_some();
            if store.renew_session(&refresh_token, tokens.access.clone(), tokens.refresh) {
                info!(cycle = id, rotated, "Token refresh succeeded");
                Ok(tokens.access)
            } else {
                warn!(cycle = id, "Session changed during renewal, renewed tokens discarded");
                Err(RefreshFailure::Superseded)
            }
        }
        Err(e) => {
            warn!(cycle = id, error = %e, "Token refresh cycle failed");
            store.clear_session_if(&refresh_token);
            Err(e)
        }
    };

    let mut slot = lock(&pending);
    if slot.as_ref().map(|c| c.id) == Some(id) {
        *slot = None;
    }
    drop(slot);

    result
}

async fn renew(transport: &dyn Transport, refresh_token: &str) -> Result<RenewedTokens, RefreshFailure> {
    let request = ApiRequest::new(Method::POST, RENEW_PATH)
        .with_options(RequestOptions::bypass_auth())
        .with_json(&RenewRequest { refresh_token })
        .map_err(|e| RefreshFailure::Network(e.to_string()))?;

    let response = transport
        .send(&request)
        .await
        .map_err(|e| RefreshFailure::Network(e.to_string()))?;
    if !response.is_success() {
        return Err(RefreshFailure::Rejected(response.status));
    }

    let parsed: RenewResponse =
        serde_json::from_str(&response.body).map_err(|_| RefreshFailure::MissingToken)?;
    if parsed.tokens.access.trim().is_empty() {
        return Err(RefreshFailure::MissingToken);
    }
    Ok(parsed.tokens)
}

fn ready(result: Result<String, RefreshFailure>) -> CycleOutcome {
    futures::future::ready(result).boxed().shared()
}

fn scope_failure(scope: Scope, original: ApiError) -> ApiError {
    ApiError::ScopeUnauthorized {
        scope,
        message: original.message(),
    }
}
