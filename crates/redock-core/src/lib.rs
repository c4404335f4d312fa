//! Core library for the Redock console.
//!
//! Authenticated access to a Redock instance: credential storage, request
//! classification and authentication, and single-flight token refresh.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, RequestOptions, Scope};
pub use config::Config;
