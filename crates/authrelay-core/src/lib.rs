//! Client-side session layer.
//!
//! Holds a short-lived access credential, attaches it to outgoing requests,
//! and recovers from expiry with a single coordinated renewal:
//!
//! - [`SessionStore`]: current credential and identity, with change stream
//! - [`authorize`]: attaches the bearer credential to a request
//! - [`RenewalCoordinator`]: single-flight renewal and FIFO replay on 401
//! - [`AccessGuard`]: synchronous entry check for protected areas
//! - [`ApiClient`] / [`AuthService`]: login, register, refresh and logout calls

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod guard;
pub mod renewal;

#[cfg(test)]
mod testing;

use std::sync::Arc;

pub use api::{authorize, ApiClient, ApiRequest, ApiResponse, RegisterRequest, RequestEnvelope};
pub use auth::{AuthService, Credential, Identity, SessionStore};
pub use config::Config;
pub use error::{Result, SessionError};
pub use guard::{Access, AccessGuard, Navigator};
pub use renewal::{Phase, Renewal, RenewalCoordinator, Renewer, Transport};

/// One store, one API client and one coordinator, wired together.
///
/// Build this once per process and hand out clones of its parts.
pub struct SessionLayer {
    pub store: Arc<SessionStore>,
    pub auth: AuthService,
    pub coordinator: RenewalCoordinator,
    login_route: String,
}

impl SessionLayer {
    pub fn new(config: &Config) -> Result<Self> {
        let api = ApiClient::new(config)?;
        let store = Arc::new(SessionStore::new());
        let shared_api = Arc::new(api.clone());
        let coordinator = RenewalCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&shared_api) as Arc<dyn Transport>,
            shared_api as Arc<dyn Renewer>,
        );

        Ok(Self {
            auth: AuthService::new(api, Arc::clone(&store)),
            store,
            coordinator,
            login_route: config.login_route.clone(),
        })
    }

    pub fn guard(&self, navigator: Arc<dyn Navigator>) -> AccessGuard {
        AccessGuard::with_login_route(Arc::clone(&self.store), navigator, self.login_route.clone())
    }
}
