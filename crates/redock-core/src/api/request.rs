use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::Serialize;

use super::error::ApiError;
use super::scope::strip_query;

/// Per-call flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Never redirect to login when this request fails terminally.
    /// Used by identity checks that are allowed to fail silently.
    pub skip_auth_policy: bool,
    /// Do not let the authenticator attach anything (renewal call)
    pub bypass_auth: bool,
    /// Send to this base URL instead of the configured one
    pub base_url: Option<String>,
}

impl RequestOptions {
    pub fn skip_auth_policy() -> Self {
        Self {
            skip_auth_policy: true,
            ..Default::default()
        }
    }

    pub fn bypass_auth() -> Self {
        Self {
            bypass_auth: true,
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// An outbound request as seen by the authenticator, the transport and
/// the refresh coordinator. Cloned for replay.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub headers: HeaderMap,
    pub options: RequestOptions,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: HeaderMap::new(),
            options: RequestOptions::default(),
            retried: false,
        }
    }

    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("body is not serializable: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn path_without_query(&self) -> &str {
        strip_query(&self.path)
    }

    /// Whether this request is already a replay after a credential renewal
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Copy for replay carrying the renewed bearer. The copy is marked
    /// retried; the flag is never cleared.
    pub(crate) fn replay_with(&self, access: &str) -> Result<Self, ApiError> {
        let mut replay = self.clone();
        replay.set_bearer(access)?;
        replay.retried = true;
        Ok(replay)
    }

    pub(crate) fn set_bearer(&mut self, token: &str) -> Result<(), ApiError> {
        let value = bearer_value(token)?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// The bearer token this request was sent with, if any
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

pub(crate) fn bearer_value(token: &str) -> Result<HeaderValue, ApiError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| ApiError::InvalidRequest("credential is not a valid header value".into()))?;
    value.set_sensitive(true);
    Ok(value)
}

/// What the transport got back. Non-2xx statuses are responses, not errors.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_marks_retried_and_sets_bearer() {
        let mut original = ApiRequest::new(Method::GET, "/api/v1/docker/env");
        original.set_bearer("A1").expect("header");
        assert!(!original.is_retried());

        let replay = original.replay_with("A2").expect("replay");
        assert!(replay.is_retried());
        assert_eq!(replay.bearer(), Some("A2"));
        assert_eq!(original.bearer(), Some("A1"));

        let again = replay.replay_with("A3").expect("replay");
        assert!(again.is_retried());
    }

    #[test]
    fn test_bearer_rejects_invalid_header() {
        let mut request = ApiRequest::new(Method::GET, "/x");
        assert!(matches!(
            request.set_bearer("bad\ntoken"),
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_with_json() {
        let request = ApiRequest::new(Method::POST, "/api/v1/docker/env")
            .with_json(&serde_json::json!({"env": "dev"}))
            .expect("json");
        assert_eq!(request.body, Some(serde_json::json!({"env": "dev"})));
    }
}
