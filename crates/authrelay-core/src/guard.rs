//! Entry check for protected areas.
//!
//! Consults the session store only. No network calls are made here, so an
//! expired-but-present credential still passes; the renewal coordinator
//! deals with that on the first request.

use std::sync::Arc;

use tracing::debug;

use crate::auth::SessionStore;

/// Default route users are sent to when they are not signed in.
pub const DEFAULT_LOGIN_ROUTE: &str = "/login";

/// Performs the redirect side effect for the hosting navigation layer.
pub trait Navigator: Send + Sync {
    fn redirect(&self, target: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Granted,
    Denied { redirect_to: String },
}

pub struct AccessGuard {
    store: Arc<SessionStore>,
    navigator: Arc<dyn Navigator>,
    login_route: String,
}

impl AccessGuard {
    pub fn new(store: Arc<SessionStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self::with_login_route(store, navigator, DEFAULT_LOGIN_ROUTE)
    }

    pub fn with_login_route(
        store: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
        login_route: impl Into<String>,
    ) -> Self {
        Self {
            store,
            navigator,
            login_route: login_route.into(),
        }
    }

    /// Decide without side effects.
    pub fn check(&self) -> Access {
        if self.store.is_authenticated() {
            Access::Granted
        } else {
            Access::Denied {
                redirect_to: self.login_route.clone(),
            }
        }
    }

    /// Decide, and trigger the redirect when entry is denied.
    pub fn can_enter(&self) -> bool {
        match self.check() {
            Access::Granted => true,
            Access::Denied { redirect_to } => {
                debug!(target_route = %redirect_to, "Access denied, redirecting");
                self.navigator.redirect(&redirect_to);
                false
            }
        }
    }
}
