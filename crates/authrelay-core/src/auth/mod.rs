//! Authentication state and the login/logout flows around it.
//!
//! This module provides:
//! - `SessionStore`: the in-memory credential and identity, with change notifications
//! - `AuthService`: login, registration and logout against the auth API
//!
//! Sessions live for the lifetime of the process only.

pub mod service;
pub mod session;

pub use service::AuthService;
pub use session::{Credential, Identity, SessionStore};
