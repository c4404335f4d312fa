use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Primary bearer pair issued by `/user/sign/in` and `/token/renew`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: non_empty(access.into()),
            refresh: non_empty(refresh.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

/// Externally selected federation peer. Lives in memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelServerContext {
    pub base_url: String,
    pub token: Option<String>,
}

impl TunnelServerContext {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.and_then(non_empty),
        }
    }
}

/// The persisted shape of the credential set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(default)]
    pub session: TokenPair,
    #[serde(default)]
    pub tunnel_token: Option<String>,
    #[serde(default)]
    pub tunnel_server_token: Option<String>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl StoredCredentials {
    pub fn is_empty(&self) -> bool {
        self.session.is_empty() && self.tunnel_token.is_none() && self.tunnel_server_token.is_none()
    }

    pub fn age_minutes(&self) -> Option<i64> {
        self.saved_at.map(|at| (Utc::now() - at).num_minutes())
    }

    /// Human readable age of the last write, e.g. "5m ago".
    pub fn age_display(&self) -> String {
        let Some(minutes) = self.age_minutes() else {
            return "never".to_string();
        };
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

/// Empty strings are treated as an absent credential.
pub(crate) fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
