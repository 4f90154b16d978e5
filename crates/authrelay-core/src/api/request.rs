//! Request and response descriptors that flow through the session pipeline.
//!
//! Requests are plain data so they can be re-authorized and resent after a
//! renewal without going back to the caller.

use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::auth::SessionStore;
use crate::error::{Result, SessionError};

/// An outgoing request, independent of any particular transport.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The Authorization header value, if one is attached.
    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The only status the renewal coordinator reacts to.
    pub fn is_auth_failure(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            SessionError::MalformedPayload(format!("Failed to parse response body: {}", e))
        })
    }
}

/// A request in flight through the pipeline, with its retry marker.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    request: ApiRequest,
    retried: bool,
}

impl RequestEnvelope {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            retried: false,
        }
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    /// Has this request already been resent once after a renewal?
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Mark the envelope as a post-renewal resend.
    pub fn into_retry(self) -> Self {
        Self {
            request: self.request,
            retried: true,
        }
    }
}

/// Attach the current credential as a bearer token.
///
/// Returns the request unchanged when the store holds no credential. Any
/// stale Authorization header from a previous attempt is replaced.
pub fn authorize(request: &ApiRequest, store: &SessionStore) -> ApiRequest {
    let mut authorized = request.clone();
    let Some(token) = store.current_credential() else {
        return authorized;
    };

    match HeaderValue::from_str(&format!("Bearer {}", token)) {
        Ok(mut value) => {
            value.set_sensitive(true);
            authorized.headers.insert(header::AUTHORIZATION, value);
        }
        Err(_) => warn!(url = %request.url, "Credential is not a valid header value, sending without it"),
    }
    authorized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credential;
    use serde_json::json;

    #[test]
    fn test_authorize_without_credential_is_unchanged() {
        let store = SessionStore::new();
        let request = ApiRequest::get("http://api.test/items");
        let authorized = authorize(&request, &store);
        assert_eq!(authorized.authorization(), None);
        assert_eq!(authorized.url, request.url);
    }

    #[test]
    fn test_authorize_attaches_bearer_token() {
        let store = SessionStore::new();
        store.set_session(Credential::new("c1", 900), None);

        let authorized = authorize(&ApiRequest::get("http://api.test/items"), &store);
        assert_eq!(authorized.authorization(), Some("Bearer c1"));
    }

    #[test]
    fn test_authorize_replaces_stale_header() {
        let store = SessionStore::new();
        store.set_session(Credential::new("c2", 900), None);

        let stale = ApiRequest::get("http://api.test/items").header(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer c1"),
        );
        let authorized = authorize(&stale, &store);
        assert_eq!(authorized.authorization(), Some("Bearer c2"));
        assert_eq!(stale.authorization(), Some("Bearer c1"));
    }

    #[test]
    fn test_authorize_skips_unencodable_credential() {
        let store = SessionStore::new();
        store.set_session(Credential::new("bad\ntoken", 900), None);

        let authorized = authorize(&ApiRequest::get("http://api.test/items"), &store);
        assert_eq!(authorized.authorization(), None);
    }

    #[test]
    fn test_envelope_retry_marker() {
        let envelope = RequestEnvelope::new(ApiRequest::post("http://api.test/x").json(json!({})));
        assert!(!envelope.is_retried());
        assert!(envelope.into_retry().is_retried());
    }

    #[test]
    fn test_response_json_failure_is_malformed_payload() {
        let response = ApiResponse::new(StatusCode::OK, "not json");
        let parsed: Result<Value> = response.json();
        assert!(matches!(parsed, Err(SessionError::MalformedPayload(_))));
        assert!(response.is_success());
        assert!(!response.is_auth_failure());
        assert!(ApiResponse::new(StatusCode::UNAUTHORIZED, "").is_auth_failure());
    }
}
