//! Attaches credentials to outbound requests, one rule per scope.

use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use tracing::trace;

use super::error::ApiError;
use super::request::{bearer_value, ApiRequest};
use super::scope::{RouteTable, Scope, PROXY_PREFIX};
use crate::auth::{CredentialKey, CredentialStore};

/// Side-channel header for legacy tunnel endpoints
pub const TUNNEL_TOKEN_HEADER: &str = "x-tunnel-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// `X-Tunnel-Token: <token>`
    TunnelToken,
}

/// A header and the credentials that may fill it, in precedence order.
struct Rule {
    slot: Slot,
    sources: &'static [CredentialKey],
}

const PRIMARY: &[Rule] = &[Rule {
    slot: Slot::Bearer,
    sources: &[CredentialKey::Access],
}];

// Primary identity supersedes the federation identity
const TUNNEL_CLIENT_OR_SERVER: &[Rule] = &[Rule {
    slot: Slot::Bearer,
    sources: &[CredentialKey::Access, CredentialKey::TunnelServer],
}];

const TUNNEL_GENERIC: &[Rule] = &[
    Rule {
        slot: Slot::Bearer,
        sources: &[CredentialKey::Access],
    },
    Rule {
        slot: Slot::TunnelToken,
        sources: &[CredentialKey::Tunnel],
    },
];

fn rules_for(scope: Scope) -> &'static [Rule] {
    match scope {
        Scope::Primary => PRIMARY,
        Scope::TunnelClientOrServer => TUNNEL_CLIENT_OR_SERVER,
        Scope::TunnelGeneric => TUNNEL_GENERIC,
        Scope::Unscoped => &[],
    }
}

pub struct RequestAuthenticator {
    routes: RouteTable,
    store: Arc<CredentialStore>,
}

impl RequestAuthenticator {
    pub fn new(routes: RouteTable, store: Arc<CredentialStore>) -> Self {
        Self { routes, store }
    }

    pub fn classify(&self, path: &str) -> Scope {
        self.routes.classify(path)
    }

    /// Attach the headers for the request's scope and return that scope.
    pub fn authenticate(&self, request: &mut ApiRequest) -> Result<Scope, ApiError> {
        let scope = self.classify(&request.path);
        if request.options.bypass_auth {
            return Ok(scope);
        }

        for rule in rules_for(scope) {
            let Some(token) = rule.sources.iter().find_map(|key| self.store.get(*key)) else {
                continue;
            };
            match rule.slot {
                Slot::Bearer => {
                    request.headers.insert(AUTHORIZATION, bearer_value(&token)?);
                }
                Slot::TunnelToken => {
                    let mut value = HeaderValue::from_str(&token).map_err(|_| {
                        ApiError::InvalidRequest("tunnel token is not a valid header value".into())
                    })?;
                    value.set_sensitive(true);
                    request
                        .headers
                        .insert(HeaderName::from_static(TUNNEL_TOKEN_HEADER), value);
                }
            }
            trace!(path = %request.path, %scope, slot = ?rule.slot, "Credential attached");
        }
        if scope == Scope::TunnelClientOrServer {
            self.route_to_peer(request)?;
        }
        Ok(scope)
    }

    /// Send proxy pass-through requests to the selected federation peer.
    /// An explicit base URL wins; the peer token is only used when no
    /// other credential filled the bearer.
    fn route_to_peer(&self, request: &mut ApiRequest) -> Result<(), ApiError> {
        if !request.path.starts_with(PROXY_PREFIX) {
            return Ok(());
        }
        let Some(peer) = self.store.tunnel_server_context() else {
            return Ok(());
        };

        if request.options.base_url.is_none() {
            request.options.base_url = Some(peer.base_url);
        }
        if let Some(token) = peer.token {
            if !request.headers.contains_key(AUTHORIZATION) {
                request.headers.insert(AUTHORIZATION, bearer_value(&token)?);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;

    use super::*;
    use crate::api::RequestOptions;
    use crate::auth::{MemoryBackend, TokenPair, TunnelServerContext};

    fn authenticator() -> (RequestAuthenticator, Arc<CredentialStore>) {
        let store = Arc::new(CredentialStore::open(Box::new(MemoryBackend::new())));
        (RequestAuthenticator::new(RouteTable::default(), store.clone()), store)
    }

    fn auth(a: &RequestAuthenticator, path: &str) -> ApiRequest {
        let mut request = ApiRequest::new(Method::GET, path);
        a.authenticate(&mut request).expect("authenticate");
        request
    }

    #[test]
    fn test_primary_attaches_access_when_present() {
        let (a, store) = authenticator();
        assert_eq!(auth(&a, "/api/v1/docker/env").bearer(), None);

        store.set(CredentialKey::Access, "A1");
        assert_eq!(auth(&a, "/api/v1/docker/env").bearer(), Some("A1"));
    }

    #[test]
    fn test_tunnel_client_or_server_precedence() {
        let (a, store) = authenticator();
        store.set(CredentialKey::TunnelServer, "TS");
        assert_eq!(auth(&a, "/api/v1/tunnel/domains").bearer(), Some("TS"));

        store.set(CredentialKey::Access, "A1");
        assert_eq!(auth(&a, "/api/v1/tunnel/domains").bearer(), Some("A1"));
    }

    #[test]
    fn test_tunnel_generic_attaches_side_channel() {
        let (a, store) = authenticator();
        store.set_session(TokenPair::new("A1", "R1"));
        store.set(CredentialKey::Tunnel, "T1");
        store.set(CredentialKey::TunnelServer, "TS");

        let request = auth(&a, "/api/v1/tunnel/list");
        assert_eq!(request.bearer(), Some("A1"));
        assert_eq!(
            request.headers.get(TUNNEL_TOKEN_HEADER).and_then(|v| v.to_str().ok()),
            Some("T1")
        );
    }

    #[test]
    fn test_unscoped_and_bypass_attach_nothing() {
        let (a, store) = authenticator();
        store.set_session(TokenPair::new("A1", "R1"));
        store.set(CredentialKey::Tunnel, "T1");

        let request = auth(&a, "/api/v1/user/sign/in");
        assert!(request.headers.is_empty());

        let mut bypassed = ApiRequest::new(Method::POST, "/api/v1/docker/env")
            .with_options(RequestOptions::bypass_auth());
        assert_eq!(a.authenticate(&mut bypassed).expect("authenticate"), Scope::Primary);
        assert!(bypassed.headers.is_empty());
    }

    #[test]
    fn test_proxy_requests_follow_selected_peer() {
        let (a, store) = authenticator();
        store.set_tunnel_server_context(TunnelServerContext::new("https://peer.example.com", Some("P1".into())));

        let proxied = auth(&a, "/api/v1/tunnel/proxy/domains");
        assert_eq!(proxied.options.base_url.as_deref(), Some("https://peer.example.com"));
        assert_eq!(proxied.bearer(), Some("P1"));

        // Local tunnel-server endpoints stay on this instance
        let local = auth(&a, "/api/v1/tunnel/domains");
        assert_eq!(local.options.base_url, None);
        assert_eq!(local.bearer(), None);

        store.set(CredentialKey::Access, "A1");
        let mut explicit = ApiRequest::new(Method::GET, "/api/v1/tunnel/proxy/domains")
            .with_options(RequestOptions::default().with_base_url("https://other.example.com"));
        a.authenticate(&mut explicit).expect("authenticate");
        assert_eq!(explicit.options.base_url.as_deref(), Some("https://other.example.com"));
        assert_eq!(explicit.bearer(), Some("A1"));
    }

    #[test]
    fn test_skip_policy_still_authenticates() {
        let (a, store) = authenticator();
        store.set(CredentialKey::Access, "A1");
        let mut identity = ApiRequest::new(Method::GET, "/api/v1/auth/me")
            .with_options(RequestOptions::skip_auth_policy());
        a.authenticate(&mut identity).expect("authenticate");
        assert_eq!(identity.bearer(), Some("A1"));
    }
}
