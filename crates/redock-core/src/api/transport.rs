//! The wire. Everything above this module works on [`ApiRequest`] and
//! [`ApiResponse`] so the auth layers can be tested against a fake.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::debug;

use super::error::ApiError;
use super::request::{ApiRequest, ApiResponse};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request. Any HTTP status is `Ok`; `Err` means the request
    /// never produced a response.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Build around an existing client, sharing its connection pool
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url_for(&self, request: &ApiRequest) -> String {
        let base = request
            .options
            .base_url
            .as_deref()
            .map(|b| b.trim_end_matches('/'))
            .unwrap_or(&self.base_url);
        if request.path.starts_with('/') {
            format!("{}{}", base, request.path)
        } else {
            format!("{}/{}", base, request.path)
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = self.url_for(request);
        debug!(method = %request.method, url = %url, retried = request.is_retried(), "Sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header(header::ACCEPT, "application/json")
            .headers(request.headers.clone());
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(ApiResponse::new(status, body))
    }
}
