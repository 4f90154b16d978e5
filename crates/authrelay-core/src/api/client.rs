//! API client for the authentication endpoints.
//!
//! This module provides the `ApiClient` struct for login, registration,
//! credential renewal and logout, and serves as the default `Transport`
//! for authenticated requests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{ApiRequest, ApiResponse};
use crate::auth::{Credential, Identity};
use crate::config::Config;
use crate::error::{Result, SessionError};
use crate::renewal::{Renewal, Renewer, Transport};

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "login";
const REGISTER_PATH: &str = "register";
const REFRESH_PATH: &str = "refresh";
const LOGOUT_PATH: &str = "logout";

const LOGIN_REJECTED_MESSAGE: &str = "Invalid e-mail or password.";
const REGISTER_REJECTED_MESSAGE: &str = "Invalid data. Check the information provided.";

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    senha: &'a str,
}

/// Account registration payload.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RegisterRequest {
    #[serde(rename = "nome")]
    pub display_name: String,
    #[serde(rename = "cnpj")]
    pub tax_id: String,
    pub email: String,
    #[serde(rename = "senha")]
    pub secret: String,
}

/// Login and refresh share one response shape.
#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
    #[serde(rename = "expiresIn")]
    expires_in: Option<i64>,
    usuario: Option<Value>,
}

impl AuthResponse {
    /// Reject anything that cannot become a usable session.
    fn validate(self) -> Result<(Credential, Option<Identity>)> {
        let token = self
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SessionError::MalformedPayload("missing accessToken".to_string()))?;

        let expires_in = match self.expires_in {
            Some(secs) if secs > 0 => secs,
            other => {
                return Err(SessionError::MalformedPayload(format!(
                    "expiresIn must be a positive number of seconds, got {:?}",
                    other
                )))
            }
        };

        let identity = match self.usuario {
            None | Some(Value::Null) => None,
            Some(value) => Some(Identity::from_value(value)?),
        };

        let credential = Credential::try_new(token, expires_in).ok_or_else(|| {
            SessionError::MalformedPayload(format!("expiresIn out of range: {}", expires_in))
        })?;
        Ok((credential, identity))
    }
}

/// HTTP client for the auth API.
/// Clone is cheap - reqwest::Client uses Arc internally, and clones share the cookie jar.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_base_url(
            &config.api_base_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(SessionError::Config(format!(
                "API base URL must be http(s), got {:?}",
                base_url
            )));
        }

        // The refresh endpoint authenticates with the durable cookie set at login.
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| SessionError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Read the body of a failed response for error reporting.
    async fn error_body(response: reqwest::Response) -> (StatusCode, String) {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        (status, body)
    }

    /// Authenticate and return the new credential and profile.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<(Credential, Option<Identity>)> {
        let response = self
            .client
            .post(self.endpoint(LOGIN_PATH))
            .header(header::ACCEPT, "application/json")
            .json(&LoginRequest {
                email: identifier,
                senha: secret,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, body) = Self::error_body(response).await;
            return Err(match status {
                StatusCode::UNAUTHORIZED => {
                    SessionError::CredentialRejected(LOGIN_REJECTED_MESSAGE.to_string())
                }
                _ => SessionError::from_status(status, &body),
            });
        }

        let auth: AuthResponse = response.json().await.map_err(|e| {
            SessionError::MalformedPayload(format!("Failed to parse login response: {}", e))
        })?;
        let session = auth.validate()?;
        info!("Logged in");
        Ok(session)
    }

    /// Create an account. The success body is not interpreted.
    pub async fn register(&self, payload: &RegisterRequest) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(REGISTER_PATH))
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, body) = Self::error_body(response).await;
            return Err(match status {
                StatusCode::BAD_REQUEST => {
                    SessionError::CredentialRejected(REGISTER_REJECTED_MESSAGE.to_string())
                }
                _ => SessionError::from_status(status, &body),
            });
        }

        info!("Account registered");
        Ok(())
    }

    /// Exchange the durable cookie for a fresh credential.
    pub async fn refresh(&self) -> Result<Renewal> {
        let response = self
            .client
            .post(self.endpoint(REFRESH_PATH))
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| SessionError::RenewalFailed(format!("refresh request failed: {}", e)))?;

        if !response.status().is_success() {
            let (status, _) = Self::error_body(response).await;
            return Err(SessionError::RenewalFailed(format!(
                "refresh rejected with status {}",
                status
            )));
        }

        let auth: AuthResponse = response.json().await.map_err(|e| {
            SessionError::MalformedPayload(format!("Failed to parse refresh response: {}", e))
        })?;
        let (credential, identity) = auth.validate()?;
        Ok(Renewal {
            credential,
            identity,
        })
    }

    pub async fn logout(&self) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(LOGOUT_PATH))
            .json(&json!({}))
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, body) = Self::error_body(response).await;
            return Err(SessionError::from_status(status, &body));
        }
        Ok(())
    }

    /// Fire the logout call without waiting for it. Its outcome is only logged.
    pub fn logout_in_background(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available, skipping remote logout");
            return;
        };
        let client = self.clone();
        handle.spawn(async move {
            match client.logout().await {
                Ok(()) => debug!("Remote logout acknowledged"),
                Err(e) => debug!(error = %e, "Remote logout failed"),
            }
        });
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        debug!(url = %request.url, status = status.as_u16(), "Response received");

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Renewer for ApiClient {
    async fn renew(&self) -> Result<Renewal> {
        self.refresh().await
    }
}
