//! Credential renewal.
//!
//! This module provides:
//! - `Transport`: sends an already-authorized request
//! - `Renewer`: exchanges the durable login cookie for a fresh credential
//! - `RenewalCoordinator`: single-flight renewal and replay of requests
//!   that failed authentication

pub mod coordinator;

use async_trait::async_trait;

use crate::api::{ApiRequest, ApiResponse};
use crate::auth::{Credential, Identity};
use crate::error::Result;

pub use coordinator::{Phase, RenewalCoordinator};

/// Sends requests over the wire. Non-success statuses are returned as
/// responses, not errors; only transport failures are `Err`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// Result of a successful renewal call.
#[derive(Debug, Clone)]
pub struct Renewal {
    pub credential: Credential,
    /// Present when the server sends a fresh profile along with the token.
    pub identity: Option<Identity>,
}

/// Performs the external token-refresh call.
#[async_trait]
pub trait Renewer: Send + Sync {
    async fn renew(&self) -> Result<Renewal>;
}
