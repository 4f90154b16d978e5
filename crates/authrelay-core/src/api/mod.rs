//! HTTP side of the session layer.
//!
//! `ApiClient` talks to the auth endpoints (login, register, refresh,
//! logout) and sends arbitrary requests as the default `Transport`.
//! `authorize` attaches the bearer credential to outgoing requests.

pub mod client;
pub mod request;

pub use client::{ApiClient, RegisterRequest};
pub use request::{authorize, ApiRequest, ApiResponse, RequestEnvelope};
