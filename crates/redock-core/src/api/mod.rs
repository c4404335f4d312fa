//! REST API access layer for the Redock backend.
//!
//! This module provides the `ApiClient` and the pieces it is built from:
//! - `RouteTable`: maps a request path to a credential `Scope`
//! - `RequestAuthenticator`: attaches the credential headers for a scope
//! - `RefreshCoordinator`: single-flight token renewal and request replay
//! - `Transport`: the wire, with a reqwest implementation
//!
//! The backend uses JWT bearer authentication. Access tokens are renewed
//! through `POST /api/v1/token/renew` with the stored refresh token.

pub mod authenticator;
pub mod client;
pub mod error;
pub mod refresh;
pub mod request;
pub mod scope;
pub mod transport;

pub use authenticator::{RequestAuthenticator, TUNNEL_TOKEN_HEADER};
pub use client::ApiClient;
pub use error::ApiError;
pub use refresh::{decide, AuthDecision, FailureContext, RefreshCoordinator, RefreshFailure};
pub use request::{ApiRequest, ApiResponse, RequestOptions};
pub use scope::{RouteTable, Scope, RENEW_PATH};
pub use transport::{ReqwestTransport, Transport};
