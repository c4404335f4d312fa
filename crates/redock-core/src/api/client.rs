//! API client for the Redock backend.
//!
//! Every call goes through the same pipeline: classify the path, attach
//! credentials for its scope, send, and on failure let the
//! [`RefreshCoordinator`] decide between propagating, renewing and
//! replaying, or ending the session.

use std::sync::Arc;

use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, warn};

use super::authenticator::RequestAuthenticator;
use super::error::ApiError;
use super::refresh::{RefreshCoordinator, RefreshFailure};
use super::request::{ApiRequest, ApiResponse, RequestOptions};
use super::scope::{RouteTable, Scope, AUTH_ME_PATH, SIGN_IN_PATH, SIGN_OUT_PATH, TUNNEL_LOGIN_PATH};
use super::transport::Transport;
use crate::auth::{
    CredentialKey, CredentialScope, CredentialStore, Navigator, SessionRedirector, TokenPair,
    TunnelServerContext,
};
use crate::models::{Envelope, SignInResponse, TunnelLoginData, UserInfo};

/// Authenticated API client.
/// Clone is cheap - all state is behind Arc and shared between clones,
/// including the pending refresh cycle.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    authenticator: Arc<RequestAuthenticator>,
    coordinator: Arc<RefreshCoordinator>,
    redirector: Arc<SessionRedirector>,
}

impl ApiClient {
    /// Create a client with the default route table
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self::with_routes(transport, store, navigator, RouteTable::default())
    }

    pub fn with_routes(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
        routes: RouteTable,
    ) -> Self {
        let redirector = Arc::new(SessionRedirector::new(navigator, SIGN_IN_PATH));
        let authenticator = Arc::new(RequestAuthenticator::new(routes, Arc::clone(&store)));
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            Arc::clone(&redirector),
        ));

        Self {
            transport,
            store,
            authenticator,
            coordinator,
            redirector,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn redirector(&self) -> &SessionRedirector {
        &self.redirector
    }

    pub fn classify(&self, path: &str) -> Scope {
        self.authenticator.classify(path)
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.get(CredentialKey::Access).is_some()
    }

    /// Run one request through the full pipeline. Returns only successful
    /// responses.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let scope = self.authenticator.authenticate(&mut request)?;
        let response = self.transport.send(&request).await?;
        if response.is_success() {
            return Ok(response);
        }
        self.coordinator.recover(&request, scope, response).await
    }

    async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let path = request.path.clone();
        let response = self.send(request).await?;
        parse_body(&response.body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", path, e)))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, opts: RequestOptions) -> Result<T, ApiError> {
        self.call(ApiRequest::new(Method::GET, path).with_options(opts)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        opts: RequestOptions,
    ) -> Result<T, ApiError> {
        let request = ApiRequest::new(Method::POST, path).with_json(body)?.with_options(opts);
        self.call(request).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        opts: RequestOptions,
    ) -> Result<T, ApiError> {
        let request = ApiRequest::new(Method::PUT, path).with_json(body)?.with_options(opts);
        self.call(request).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        opts: RequestOptions,
    ) -> Result<T, ApiError> {
        let request = ApiRequest::new(Method::PATCH, path).with_json(body)?.with_options(opts);
        self.call(request).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str, opts: RequestOptions) -> Result<T, ApiError> {
        self.call(ApiRequest::new(Method::DELETE, path).with_options(opts)).await
    }

    // ===== Identity =====

    /// Sign in and store the issued session pair
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, ApiError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let response: SignInResponse = self.post(SIGN_IN_PATH, &body, RequestOptions::default()).await?;

        let pair = TokenPair::new(response.tokens.access, response.tokens.refresh);
        if pair.access.is_none() {
            return Err(ApiError::InvalidResponse("sign in returned no access token".into()));
        }
        self.store.set_session(pair.clone());
        self.redirector.mark_authenticated();
        info!(email = email, "Login successful");
        Ok(pair)
    }

    /// Sign out on the server (best effort) and drop the local session
    pub async fn logout(&self) {
        if self.is_authenticated() {
            let result: Result<serde_json::Value, ApiError> = self
                .post(SIGN_OUT_PATH, &serde_json::json!({}), RequestOptions::skip_auth_policy())
                .await;
            if let Err(e) = result {
                warn!(error = %e, "Server sign out failed, clearing local session anyway");
            }
        }
        self.store.clear(CredentialScope::Session);
        self.store.clear_tunnel_server_context();
        info!("Logged out");
    }

    /// Identity check. Allowed to fail without sending the user to login.
    pub async fn me(&self) -> Result<UserInfo, ApiError> {
        let envelope: Envelope<UserInfo> = self.get(AUTH_ME_PATH, RequestOptions::skip_auth_policy()).await?;
        envelope
            .data
            .ok_or_else(|| ApiError::InvalidResponse("auth/me returned no data".into()))
    }

    /// Log in to this instance's tunnel server; stores the tunnel-server token
    pub async fn tunnel_login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let body = serde_json::json!({ "username": username, "password": password });
        let envelope: Envelope<TunnelLoginData> =
            self.post(TUNNEL_LOGIN_PATH, &body, RequestOptions::default()).await?;
        let data = envelope.data.ok_or_else(|| {
            ApiError::InvalidResponse(envelope.msg.unwrap_or_else(|| "tunnel login returned no token".into()))
        })?;
        self.store.set(CredentialKey::TunnelServer, data.token);
        info!(username = username, "Tunnel login successful");
        Ok(())
    }

    /// Renew the session now, sharing a pending cycle if one is running
    pub async fn refresh_session(&self) -> Result<(), RefreshFailure> {
        self.coordinator.refresh().await.map(|_| ())
    }

    // ===== Federation peer =====

    /// Proxy pass-through requests go to this peer, carrying its token when
    /// no session is present, until the peer rejects a credential.
    pub fn select_peer(&self, base_url: &str, token: Option<String>) {
        let context = TunnelServerContext::new(base_url, token);
        info!(peer = %context.base_url, "Federation peer selected");
        self.store.set_tunnel_server_context(context);
    }

    pub fn peer(&self) -> Option<TunnelServerContext> {
        self.store.tunnel_server_context()
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> serde_json::Result<T> {
    if body.trim().is_empty() {
        serde_json::from_str("null")
    } else {
        serde_json::from_str(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_body_as_null() {
        let _unit: () = parse_body("").expect("unit");
        let value: serde_json::Value = parse_body("  ").expect("value");
        assert!(value.is_null());
    }

    #[test]
    fn test_parse_body_error() {
        assert!(parse_body::<Vec<i32>>("{}").is_err());
    }
}
