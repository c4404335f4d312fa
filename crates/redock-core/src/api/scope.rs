//! Request classification by target path.

use std::fmt;

/// Which credential a request carries and which recovery policy applies
/// when it is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Console endpoints guarded by the primary session
    Primary,
    /// Internal proxy pass-through to a federation peer, and the tunnel
    /// server API of this instance
    TunnelClientOrServer,
    /// Legacy tunnel endpoints
    TunnelGeneric,
    /// Public endpoints; nothing is attached
    Unscoped,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scope::Primary => "primary",
            Scope::TunnelClientOrServer => "tunnel client/server",
            Scope::TunnelGeneric => "tunnel",
            Scope::Unscoped => "unscoped",
        };
        f.write_str(name)
    }
}

pub const RENEW_PATH: &str = "/api/v1/token/renew";
pub const SIGN_IN_PATH: &str = "/api/v1/user/sign/in";
pub const SIGN_OUT_PATH: &str = "/api/v1/user/sign/out";
pub const AUTH_ME_PATH: &str = "/api/v1/auth/me";
pub const TUNNEL_LOGIN_PATH: &str = "/api/v1/tunnel/login";

/// Pass-through to the selected federation peer
pub const PROXY_PREFIX: &str = "/api/v1/tunnel/proxy/";

const DEFAULT_ROUTES: &[(&str, Scope)] = &[
    (PROXY_PREFIX, Scope::TunnelClientOrServer),
    ("/api/v1/tunnel/domains", Scope::TunnelClientOrServer),
    ("/api/v1/tunnel/user_info", Scope::TunnelClientOrServer),
    (TUNNEL_LOGIN_PATH, Scope::Unscoped),
    ("/api/v1/tunnel/register", Scope::Unscoped),
    ("/api/v1/tunnel/auth/login", Scope::Unscoped),
    ("/api/v1/tunnel/auth/register", Scope::Unscoped),
    ("/api/v1/tunnel/auth/callback", Scope::Unscoped),
    ("/api/v1/tunnel/", Scope::TunnelGeneric),
    (SIGN_IN_PATH, Scope::Unscoped),
    ("/api/v1/user/sign/up", Scope::Unscoped),
    ("/api/v1/auth/setup", Scope::Unscoped),
    (RENEW_PATH, Scope::Unscoped),
];

/// Prefix table mapping paths to scopes.
///
/// Entries are kept sorted longest-prefix-first, so the result does not
/// depend on the order they were declared in. Paths matching no entry are
/// `Primary`.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<(String, Scope)>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTES.iter().map(|(p, s)| (p.to_string(), *s)))
    }
}

impl RouteTable {
    pub fn new(routes: impl IntoIterator<Item = (String, Scope)>) -> Self {
        let mut routes: Vec<(String, Scope)> = routes.into_iter().collect();
        // Ties broken on the prefix itself to stay deterministic
        routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        routes.dedup_by(|a, b| a.0 == b.0);
        Self { routes }
    }

    pub fn classify(&self, path: &str) -> Scope {
        let path = strip_query(path);
        self.routes
            .iter()
            .find(|(prefix, _)| prefix_matches(prefix, path))
            .map(|(_, scope)| *scope)
            .unwrap_or(Scope::Primary)
    }
}

pub(crate) fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

/// Segment-aware prefix test: `/a/login` matches `/a/login` and
/// `/a/login/x` but not `/a/login_status`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if !path.starts_with(prefix) {
        return false;
    }
    prefix.ends_with('/') || path.len() == prefix.len() || path[prefix.len()..].starts_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classification() {
        let table = RouteTable::default();
        assert_eq!(table.classify("/api/v1/docker/services"), Scope::Primary);
        assert_eq!(table.classify("/api/v1/tunnel/proxy/domains?server_id=3"), Scope::TunnelClientOrServer);
        assert_eq!(table.classify("/api/v1/tunnel/domains/12"), Scope::TunnelClientOrServer);
        assert_eq!(table.classify("/api/v1/tunnel/list"), Scope::TunnelGeneric);
        assert_eq!(table.classify("/api/v1/tunnel/login"), Scope::Unscoped);
        assert_eq!(table.classify("/api/v1/user/sign/in"), Scope::Unscoped);
        assert_eq!(table.classify("/api/v1/token/renew"), Scope::Unscoped);
    }

    #[test]
    fn test_prefix_is_segment_aware() {
        let table = RouteTable::default();
        assert_eq!(table.classify("/api/v1/tunnel/login_status"), Scope::TunnelGeneric);
        assert_eq!(table.classify("/api/v1/tunnel/domainsx"), Scope::TunnelGeneric);
        assert_eq!(table.classify("/api/v1/tunnel"), Scope::Primary);
    }

    #[test]
    fn test_declaration_order_does_not_matter() {
        let forward = RouteTable::new(vec![
            ("/api/v1/tunnel/".to_string(), Scope::TunnelGeneric),
            ("/api/v1/tunnel/proxy/".to_string(), Scope::TunnelClientOrServer),
        ]);
        let reversed = RouteTable::new(vec![
            ("/api/v1/tunnel/proxy/".to_string(), Scope::TunnelClientOrServer),
            ("/api/v1/tunnel/".to_string(), Scope::TunnelGeneric),
        ]);
        for path in ["/api/v1/tunnel/proxy/add", "/api/v1/tunnel/start", "/other"] {
            assert_eq!(forward.classify(path), reversed.classify(path));
        }
        assert_eq!(forward.classify("/api/v1/tunnel/proxy/add"), Scope::TunnelClientOrServer);
    }

    #[test]
    fn test_query_and_fragment_ignored() {
        let table = RouteTable::default();
        assert_eq!(table.classify("/api/v1/token/renew?x=1"), Scope::Unscoped);
        assert_eq!(table.classify("/api/v1/tunnel/login#top"), Scope::Unscoped);
    }
}
